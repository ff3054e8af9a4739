//! Quarterly bill generation and payment application
//!
//! A bill for quarter Q requires readings for all three composing fiscal
//! months. Consumption is metered against the unit's last reading before
//! the quarter, searching back across the fiscal-year boundary. Previously
//! unpaid bills get a penalty sweep before the new bill is written, so a
//! new quarter never lands on stale penalty figures.

use crate::config::WaterConfig;
use crate::models::{BillPayment, BillStatus, BillSummary, BillsNode, UnitBill, WaterBill};
use crate::penalty::PenaltyRecalculator;
use crate::readings::{readings_doc, WaterReadings};
use crate::{WaterError, WaterResult};
use audit::{AuditEntry, AuditLogger};
use chrono::NaiveDate;
use doc_store::{server_timestamp, CollectionPath, DocPath, SharedStore, Store, StoreError, Tx};
use fiscal_core::{calendar, Centavos};
use serde_json::json;
use std::collections::BTreeMap;
use tenants::ClientConfig;

/// How many months back the prior-reading search goes
const PRIOR_LOOKBACK_MONTHS: u32 = 12;

pub fn bills_collection(client_id: &str) -> Result<CollectionPath, StoreError> {
    CollectionPath::parse(format!("clients/{client_id}/projects/waterBills/bills"))
}

pub fn bill_doc(client_id: &str, bill_id: &str) -> Result<DocPath, StoreError> {
    Ok(bills_collection(client_id)?.doc(bill_id)?)
}

/// Generation, retrieval, and payment application over quarterly bills
#[derive(Clone)]
pub struct WaterBillService {
    store: SharedStore,
    audit: AuditLogger,
}

impl WaterBillService {
    pub fn new(store: SharedStore, audit: AuditLogger) -> Self {
        Self { store, audit }
    }

    /// Generate the bill for one fiscal quarter.
    ///
    /// Fails with `MissingReadings` unless all three composing months have
    /// readings, and with `BillAlreadyExists` on duplicate generation;
    /// future quarters cannot be pre-generated.
    pub async fn generate(
        &self,
        config: &ClientConfig,
        fiscal_year: i32,
        quarter: u8,
        today: NaiveDate,
    ) -> WaterResult<WaterBill> {
        let client_id = config.client_id.as_str();
        let water = WaterConfig::load(&self.store, client_id).await?;
        let months = calendar::quarter_months(quarter)?;

        // Reconcile penalties on everything already outstanding first
        let recalculator = PenaltyRecalculator::new(self.store.clone(), self.audit.clone());
        recalculator
            .recalculate(client_id, today, None)
            .await
            .into_result()
            .map_err(|failure| WaterError::Config {
                client_id: client_id.to_string(),
                reason: failure.message,
            })?;

        let mut month_readings = Vec::with_capacity(3);
        let mut missing = Vec::new();
        for fiscal_month in months {
            match self.load_readings(client_id, fiscal_year, fiscal_month).await? {
                Some(readings) => month_readings.push(readings),
                None => missing.push(fiscal_month),
            }
        }
        if !missing.is_empty() {
            return Err(WaterError::MissingReadings {
                quarter: format!("{fiscal_year}-Q{quarter}"),
                missing,
            });
        }

        let due_date = quarter_due_date(config, &water, fiscal_year, quarter)?;
        let mut units: BTreeMap<String, UnitBill> = BTreeMap::new();
        let final_month = &month_readings[2];
        for (unit_id, &current_reading) in &final_month.readings {
            let prior = self
                .prior_reading(client_id, fiscal_year, months[0], unit_id)
                .await?;
            let (car, boat) = wash_counts(&month_readings, unit_id);
            units.insert(
                unit_id.clone(),
                build_unit_bill(&water, prior, current_reading, car, boat),
            );
        }

        let mut bill = WaterBill {
            fiscal_year,
            quarter,
            bill_date: Some(server_timestamp()),
            due_date: due_date.format("%Y-%m-%d").to_string(),
            config_snapshot: water,
            bills: BillsNode { units },
            summary: BillSummary::default(),
        };
        bill.recompute_summary();

        let bill_id = bill.doc_id();
        let path = bill_doc(client_id, &bill_id)?;
        let payload = serde_json::to_value(&bill)
            .map_err(|err| WaterError::Malformed(err.to_string()))?;
        match self.store.create(&path, payload).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                return Err(WaterError::BillAlreadyExists(bill_id));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            client_id = %client_id,
            bill_id = %bill_id,
            units = bill.summary.unit_count,
            total_charged = bill.summary.total_charged.raw(),
            "water bill generated"
        );
        self.audit
            .record_best_effort(
                client_id,
                AuditEntry::new("waterbills", "generateBill", bills_collection(client_id)?.as_str(), "system")
                    .doc_id(&bill_id)
                    .metadata(json!({
                        "totalCharged": bill.summary.total_charged,
                        "unitCount": bill.summary.unit_count,
                    })),
            )
            .await;
        Ok(bill)
    }

    pub async fn get(&self, client_id: &str, bill_id: &str) -> WaterResult<WaterBill> {
        let path = bill_doc(client_id, bill_id)?;
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| WaterError::BillNotFound(bill_id.to_string()))?;
        serde_json::from_value(doc.data).map_err(|err| WaterError::Malformed(err.to_string()))
    }

    /// All bills of a client, in document-id (chronological) order
    pub async fn list(&self, client_id: &str) -> WaterResult<Vec<WaterBill>> {
        let collection = bills_collection(client_id)?;
        let mut bills = Vec::new();
        for path in self.store.list_docs(&collection).await? {
            if let Some(doc) = self.store.get(&path).await? {
                bills.push(
                    serde_json::from_value(doc.data)
                        .map_err(|err| WaterError::Malformed(err.to_string()))?,
                );
            }
        }
        Ok(bills)
    }

    /// Bills that still carry unpaid unit entries
    pub async fn list_open(&self, client_id: &str) -> WaterResult<Vec<WaterBill>> {
        Ok(self
            .list(client_id)
            .await?
            .into_iter()
            .filter(WaterBill::has_unpaid_units)
            .collect())
    }

    /// Stage one payment onto a unit's bill entry inside the caller's
    /// store transaction. Portions must not exceed the respective
    /// outstanding amounts; rounding never leaks into credit here.
    pub async fn apply_payment_in(
        tx: &mut Tx,
        client_id: &str,
        bill_id: &str,
        unit_id: &str,
        base_portion: Centavos,
        penalty_portion: Centavos,
        transaction_id: &str,
        payment_date: NaiveDate,
    ) -> WaterResult<UnitBill> {
        let path = bill_doc(client_id, bill_id)?;
        let doc = tx
            .get(&path)
            .await?
            .ok_or_else(|| WaterError::BillNotFound(bill_id.to_string()))?;
        let mut bill: WaterBill = serde_json::from_value(doc.data)
            .map_err(|err| WaterError::Malformed(err.to_string()))?;

        let unit = bill
            .bills
            .units
            .get_mut(unit_id)
            .ok_or_else(|| WaterError::UnitNotBilled {
                bill_id: bill_id.to_string(),
                unit_id: unit_id.to_string(),
            })?;

        if base_portion > unit.outstanding_base() {
            return Err(WaterError::Overpayment {
                bill_id: bill_id.to_string(),
                unit_id: unit_id.to_string(),
                amount: base_portion,
                outstanding: unit.outstanding_base(),
            });
        }
        if penalty_portion > unit.outstanding_penalty() {
            return Err(WaterError::Overpayment {
                bill_id: bill_id.to_string(),
                unit_id: unit_id.to_string(),
                amount: penalty_portion,
                outstanding: unit.outstanding_penalty(),
            });
        }

        unit.base_paid += base_portion;
        unit.penalty_paid += penalty_portion;
        unit.payments.push(BillPayment {
            transaction_id: transaction_id.to_string(),
            amount: base_portion + penalty_portion,
            base_charge_paid: base_portion,
            penalty_paid: penalty_portion,
            date: payment_date.format("%Y-%m-%d").to_string(),
        });
        unit.refresh();
        let updated = unit.clone();

        bill.recompute_summary();
        let payload = serde_json::to_value(&bill)
            .map_err(|err| WaterError::Malformed(err.to_string()))?;
        tx.set(&path, payload);
        Ok(updated)
    }

    /// Stage the reversal of every payment entry referencing a transaction
    /// across all units of one bill. Returns how many entries cleared.
    pub async fn reverse_payment_in(
        tx: &mut Tx,
        client_id: &str,
        bill_id: &str,
        transaction_id: &str,
    ) -> WaterResult<usize> {
        let path = bill_doc(client_id, bill_id)?;
        let doc = tx
            .get(&path)
            .await?
            .ok_or_else(|| WaterError::BillNotFound(bill_id.to_string()))?;
        let mut bill: WaterBill = serde_json::from_value(doc.data)
            .map_err(|err| WaterError::Malformed(err.to_string()))?;

        let mut cleared = 0;
        for unit in bill.bills.units.values_mut() {
            let mut removed_base = Centavos::ZERO;
            let mut removed_penalty = Centavos::ZERO;
            let before = unit.payments.len();
            unit.payments.retain(|payment| {
                if payment.transaction_id == transaction_id {
                    removed_base += payment.base_charge_paid;
                    removed_penalty += payment.penalty_paid;
                    false
                } else {
                    true
                }
            });
            if unit.payments.len() != before {
                unit.base_paid = (unit.base_paid - removed_base).max(Centavos::ZERO);
                unit.penalty_paid = (unit.penalty_paid - removed_penalty).max(Centavos::ZERO);
                unit.refresh();
                cleared += before - unit.payments.len();
            }
        }

        if cleared > 0 {
            bill.recompute_summary();
            let payload = serde_json::to_value(&bill)
                .map_err(|err| WaterError::Malformed(err.to_string()))?;
            tx.set(&path, payload);
        }
        Ok(cleared)
    }

    async fn load_readings(
        &self,
        client_id: &str,
        fiscal_year: i32,
        fiscal_month: u32,
    ) -> WaterResult<Option<WaterReadings>> {
        let path = readings_doc(client_id, fiscal_year, fiscal_month)?;
        match self.store.get(&path).await? {
            Some(doc) => Ok(Some(
                serde_json::from_value(doc.data)
                    .map_err(|err| WaterError::Malformed(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Latest reading for a unit strictly before a fiscal month, looking
    /// back across the fiscal-year boundary
    async fn prior_reading(
        &self,
        client_id: &str,
        fiscal_year: i32,
        fiscal_month: u32,
        unit_id: &str,
    ) -> WaterResult<Option<i64>> {
        let mut year = fiscal_year;
        let mut month = fiscal_month as i32;
        for _ in 0..PRIOR_LOOKBACK_MONTHS {
            month -= 1;
            if month < 0 {
                month = 11;
                year -= 1;
            }
            if let Some(readings) = self.load_readings(client_id, year, month as u32).await? {
                if let Some(value) = readings.readings.get(unit_id) {
                    return Ok(Some(*value));
                }
            }
        }
        Ok(None)
    }
}

fn wash_counts(months: &[WaterReadings], unit_id: &str) -> (u32, u32) {
    months.iter().fold((0, 0), |(car, boat), readings| {
        match readings.washes.get(unit_id) {
            Some(counts) => (car + counts.car_washes, boat + counts.boat_washes),
            None => (car, boat),
        }
    })
}

fn build_unit_bill(
    water: &WaterConfig,
    prior: Option<i64>,
    current: i64,
    car_washes: u32,
    boat_washes: u32,
) -> UnitBill {
    let baseline = prior.unwrap_or(current);
    let consumption = current - baseline;
    let billable = consumption.max(0);

    let consumption_charge = water.rate_per_m3 * billable
        + water.car_wash_rate * car_washes as i64
        + water.boat_wash_rate * boat_washes as i64;
    let current_charge = consumption_charge.max(water.minimum_charge);

    let mut unit = UnitBill {
        prior_reading: baseline,
        current_reading: current,
        consumption,
        car_wash_count: car_washes,
        boat_wash_count: boat_washes,
        current_charge,
        penalty_amount: Centavos::ZERO,
        total_amount: Centavos::ZERO,
        paid_amount: Centavos::ZERO,
        base_paid: Centavos::ZERO,
        penalty_paid: Centavos::ZERO,
        status: BillStatus::Unpaid,
        payments: Vec::new(),
        meter_reset: consumption < 0,
        no_prior_baseline: prior.is_none(),
        last_penalty_update: None,
    };
    unit.refresh();
    unit
}

fn quarter_due_date(
    config: &ClientConfig,
    water: &WaterConfig,
    fiscal_year: i32,
    quarter: u8,
) -> WaterResult<NaiveDate> {
    let first_month = calendar::quarter_months(quarter)?[0];
    let (year, month) =
        calendar::calendar_month_of(fiscal_year, first_month, config.fiscal_year_start_month)?;
    NaiveDate::from_ymd_opt(year, month, water.due_day).ok_or_else(|| WaterError::Config {
        client_id: config.client_id.clone(),
        reason: format!("dueDay {} invalid for {year}-{month:02}", water.due_day),
    })
}
