//! Compounding penalty recalculation
//!
//! Penalties accrue monthly on the unpaid balance once a bill is past its
//! due date plus grace. The recalculator sweeps every bill of a client,
//! recomputes the expected penalty from scratch, and writes only upward
//! moves of more than one centavo. Penalties never recalculate downward
//! except through an explicit payment reversal. Runs are idempotent under a
//! frozen clock and safe to retry.

use crate::config::WaterConfig;
use crate::generator::{bill_doc, bills_collection};
use crate::models::{BillStatus, WaterBill};
use crate::{WaterError, WaterResult};
use audit::{AuditEntry, AuditLogger};
use chrono::NaiveDate;
use doc_store::{run_transaction, SharedStore, Store};
use fiscal_core::{calendar, Centavos};
use platform_contracts::Outcome;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Expected penalty on an overdue principal after `months_late` months.
///
/// Compound mode applies the monthly rate to the growing balance; simple
/// mode is linear on the principal. Fractional centavos truncate toward
/// zero, in the owner's favor.
pub fn compute_penalty(
    principal: Centavos,
    rate: Decimal,
    months_late: i32,
    compound: bool,
) -> Centavos {
    if principal <= Centavos::ZERO || months_late <= 0 {
        return Centavos::ZERO;
    }
    let principal_dec = Decimal::from(principal.raw());
    let total = if compound {
        let mut running = principal_dec;
        let mut total = Decimal::ZERO;
        for _ in 0..months_late {
            let monthly = running * rate;
            total += monthly;
            running += monthly;
        }
        total
    } else {
        principal_dec * rate * Decimal::from(months_late)
    };
    Centavos::new(total.floor().to_i64().unwrap_or(0))
}

/// Whole calendar months a bill is late as of `today`
pub fn months_late(due_date: NaiveDate, penalty_days: i64, today: NaiveDate) -> i32 {
    let trigger = due_date + chrono::Duration::days(penalty_days);
    if trigger >= today {
        return 0;
    }
    calendar::months_between(trigger, today).max(0)
}

/// Expected penalty for one unit entry as of a given date, without writing.
///
/// The payment distributor uses this for backdated previews; the persisted
/// bill keeps the live figure.
pub fn expected_penalty(
    unit: &crate::models::UnitBill,
    config: &WaterConfig,
    due_date: NaiveDate,
    as_of: NaiveDate,
) -> Centavos {
    let principal = (unit.current_charge - unit.paid_amount).max(Centavos::ZERO);
    compute_penalty(
        principal,
        config.penalty_rate,
        months_late(due_date, config.penalty_days, as_of),
        config.compound_penalty,
    )
}

/// Counters reported by one recalculation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenaltySummary {
    pub bills_scanned: usize,
    pub units_updated: usize,
    pub units_skipped_paid: usize,
    pub units_skipped_scope: usize,
    /// Net centavos added across all updates
    pub penalty_delta: Centavos,
}

/// Sweeps a client's bills and reconciles penalty amounts
#[derive(Clone)]
pub struct PenaltyRecalculator {
    store: SharedStore,
    audit: AuditLogger,
}

impl PenaltyRecalculator {
    pub fn new(store: SharedStore, audit: AuditLogger) -> Self {
        Self { store, audit }
    }

    /// Recalculate penalties for every bill of a client, optionally scoped
    /// to a unit subset (after a payment touches only those units).
    ///
    /// Returns the structured envelope the boundary layer maps to protocol
    /// codes: configuration problems as 400-kind, calculation as 500-kind.
    pub async fn recalculate(
        &self,
        client_id: &str,
        today: NaiveDate,
        unit_scope: Option<&[String]>,
    ) -> Outcome<PenaltySummary> {
        match self.run(client_id, today, unit_scope).await {
            Ok(summary) => Outcome::ok(summary),
            Err(err) => {
                tracing::error!(
                    client_id = %client_id,
                    error = %err,
                    "penalty recalculation failed"
                );
                Outcome::err(err.into())
            }
        }
    }

    async fn run(
        &self,
        client_id: &str,
        today: NaiveDate,
        unit_scope: Option<&[String]>,
    ) -> WaterResult<PenaltySummary> {
        let config = WaterConfig::load(&self.store, client_id).await?;
        let collection = bills_collection(client_id)?;
        let mut summary = PenaltySummary::default();

        for path in self.store.list_docs(&collection).await? {
            summary.bills_scanned += 1;
            let bill_id = path.id().to_string();
            let updated = run_transaction(&self.store, |tx| {
                let client_id = client_id.to_string();
                let bill_id = bill_id.clone();
                let config = config.clone();
                let scope: Option<Vec<String>> = unit_scope.map(|units| units.to_vec());
                Box::pin(async move {
                    recalc_bill(tx, &client_id, &bill_id, &config, today, scope.as_deref()).await
                })
            })
            .await?;

            summary.units_updated += updated.units_updated;
            summary.units_skipped_paid += updated.units_skipped_paid;
            summary.units_skipped_scope += updated.units_skipped_scope;
            summary.penalty_delta += updated.penalty_delta;
        }

        tracing::info!(
            client_id = %client_id,
            bills_scanned = summary.bills_scanned,
            units_updated = summary.units_updated,
            penalty_delta = summary.penalty_delta.raw(),
            "penalty recalculation complete"
        );
        if summary.units_updated > 0 {
            self.audit
                .record_best_effort(
                    client_id,
                    AuditEntry::new(
                        "waterbills",
                        "penaltyRecalc",
                        bills_collection(client_id)?.as_str(),
                        "system",
                    )
                    .metadata(serde_json::to_value(&summary).unwrap_or_default()),
                )
                .await;
        }
        Ok(summary)
    }
}

async fn recalc_bill(
    tx: &mut doc_store::Tx,
    client_id: &str,
    bill_id: &str,
    config: &WaterConfig,
    today: NaiveDate,
    unit_scope: Option<&[String]>,
) -> WaterResult<PenaltySummary> {
    let path = bill_doc(client_id, bill_id)?;
    let doc = tx
        .get(&path)
        .await?
        .ok_or_else(|| WaterError::BillNotFound(bill_id.to_string()))?;
    let mut bill: WaterBill = serde_json::from_value(doc.data)
        .map_err(|err| WaterError::Malformed(err.to_string()))?;

    let due_date = calendar::parse_civil_date(&bill.due_date)
        .map_err(|_| WaterError::Malformed(format!("bill {bill_id} due date '{}'", bill.due_date)))?;
    let late_months = months_late(due_date, config.penalty_days, today);

    let mut summary = PenaltySummary::default();
    for (unit_id, unit) in bill.bills.units.iter_mut() {
        if let Some(scope) = unit_scope {
            if !scope.iter().any(|candidate| candidate == unit_id) {
                summary.units_skipped_scope += 1;
                continue;
            }
        }
        if unit.status == BillStatus::Paid {
            summary.units_skipped_paid += 1;
            continue;
        }

        let principal = (unit.current_charge - unit.paid_amount).max(Centavos::ZERO);
        let expected = compute_penalty(
            principal,
            config.penalty_rate,
            late_months,
            config.compound_penalty,
        );

        // Upward-only, and only when the move is material
        if expected > unit.penalty_amount
            && (expected - unit.penalty_amount).raw() > 1
        {
            summary.penalty_delta += expected - unit.penalty_amount;
            unit.penalty_amount = expected;
            unit.last_penalty_update = Some(today.format("%Y-%m-%d").to_string());
            unit.refresh();
            summary.units_updated += 1;
        }
    }

    if summary.units_updated > 0 {
        bill.recompute_summary();
        let payload = serde_json::to_value(&bill)
            .map_err(|err| WaterError::Malformed(err.to_string()))?;
        tx.set(&path, payload);
    }
    Ok(summary)
}
