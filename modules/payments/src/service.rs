//! Payment service
//!
//! Preview plans against a snapshot; commit re-reads everything inside one
//! store transaction, verifies the snapshot signature, and stages the
//! transaction document, bill updates, dues slots, credit movement, and
//! audit record together. Reversal is the admin path behind deleting a
//! payment transaction; the compensating ledger updates land in the same
//! store transaction as the delete.

use crate::obligations::{collect_obligations, ObligationTarget};
use crate::plan::{build_plan, snapshot_signature, PaymentPlan, PlanPolicy};
use crate::{PaymentError, PaymentResult};
use audit::{AuditEntry, AuditLogger};
use chrono::NaiveDate;
use credit_rs::CreditBalanceService;
use doc_store::{run_transaction, server_timestamp, SharedStore, Store, StoreError};
use dues_rs::{dues_doc, DuesRecord, DuesService, SlotFill};
use fiscal_core::{calendar, Centavos, IdGenerator};
use security::Principal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tenants::ClientConfig;
use transactions_rs::service::{transaction_doc, transactions_collection};
use transactions_rs::{validate_draft, Allocation, Transaction, TransactionDraft, SPLIT_CATEGORY};
use waterbills_rs::{bill_doc, PenaltyRecalculator, WaterBill, WaterBillService};

/// Attempts at a fresh transaction id when the store reports a collision
const COMMIT_ID_ATTEMPTS: usize = 3;

/// Result of a committed payment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecorded {
    pub transaction_id: String,
    pub plan: PaymentPlan,
}

/// The payment distributor
#[derive(Clone)]
pub struct PaymentService {
    store: SharedStore,
    audit: AuditLogger,
    ids: Arc<IdGenerator>,
    credit: CreditBalanceService,
    dues: DuesService,
    bills: WaterBillService,
    recalculator: PenaltyRecalculator,
    policy: PlanPolicy,
}

impl PaymentService {
    pub fn new(store: SharedStore, audit: AuditLogger, ids: Arc<IdGenerator>) -> Self {
        Self {
            credit: CreditBalanceService::new(store.clone()),
            dues: DuesService::new(store.clone(), audit.clone()),
            bills: WaterBillService::new(store.clone(), audit.clone()),
            recalculator: PenaltyRecalculator::new(store.clone(), audit.clone()),
            store,
            audit,
            ids,
            policy: PlanPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PlanPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Compute a proposed distribution without persisting anything.
    ///
    /// A live preview first runs the penalty recalculator surgically for
    /// the unit so the stored figures are current. A backdated `as_of`
    /// instead recalculates penalties in memory as of that date, and the
    /// stored bills keep their live figures.
    pub async fn preview(
        &self,
        principal: &Principal,
        config: &ClientConfig,
        unit_id: &str,
        amount: Centavos,
        today: NaiveDate,
        as_of: Option<NaiveDate>,
        selected_month: Option<(i32, u32)>,
    ) -> PaymentResult<PaymentPlan> {
        security::ensure_client_access(principal, &config.client_id)?;
        let effective = as_of.unwrap_or(today);

        // Clients without water billing have no config and nothing to sweep
        let mut bills = self.bills.list_open(&config.client_id).await?;
        if as_of.is_none() && !bills.is_empty() {
            let scope = [unit_id.to_string()];
            self.recalculator
                .recalculate(&config.client_id, today, Some(&scope))
                .await
                .into_result()
                .map_err(|failure| PaymentError::Malformed(failure.message))?;
            bills = self.bills.list_open(&config.client_id).await?;
        }

        self.dues
            .ensure_year(
                config,
                unit_id,
                calendar::fiscal_year(effective, config.fiscal_year_start_month)?,
            )
            .await?;
        let dues_years = self.load_dues_years(config, unit_id, effective).await?;
        let cutoff = cutoff_date(config, selected_month)?;
        let obligations = collect_obligations(unit_id, &bills, &dues_years, as_of, cutoff);

        let credit_balance = self.credit.preview(&config.client_id, unit_id).await?;
        build_plan(unit_id, amount, credit_balance, &obligations, self.policy)
    }

    /// Persist a payment in one store transaction.
    ///
    /// `expected_signature` carries the preview's snapshot fingerprint;
    /// when the in-transaction state no longer matches, the commit fails
    /// `Stale` instead of distributing against figures the caller never
    /// saw.
    pub async fn commit(
        &self,
        principal: &Principal,
        config: &ClientConfig,
        unit_id: &str,
        amount: Centavos,
        today: NaiveDate,
        as_of: Option<NaiveDate>,
        selected_month: Option<(i32, u32)>,
        expected_signature: Option<&str>,
        payment_method: Option<&str>,
        notes: Option<&str>,
    ) -> PaymentResult<PaymentRecorded> {
        security::ensure_client_access(principal, &config.client_id)?;
        let payment_date = as_of.unwrap_or(today);
        let fiscal_year = calendar::fiscal_year(payment_date, config.fiscal_year_start_month)?;
        self.dues.ensure_year(config, unit_id, fiscal_year).await?;

        // Settle against true current penalties, whatever the payment date.
        // Clients without water billing have no config and nothing to sweep.
        let open_bill_ids: Vec<String> = self
            .bills
            .list_open(&config.client_id)
            .await?
            .iter()
            .map(WaterBill::doc_id)
            .collect();
        if !open_bill_ids.is_empty() {
            let scope = [unit_id.to_string()];
            self.recalculator
                .recalculate(&config.client_id, today, Some(&scope))
                .await
                .into_result()
                .map_err(|failure| PaymentError::Malformed(failure.message))?;
        }
        let cutoff = cutoff_date(config, selected_month)?;

        let mut last_err: Option<PaymentError> = None;
        for _ in 0..COMMIT_ID_ATTEMPTS {
            let txn_id = self.ids.transaction_id(Some(payment_instant(config, payment_date)));
            let result = self
                .commit_once(
                    principal,
                    config,
                    unit_id,
                    amount,
                    payment_date,
                    as_of,
                    &open_bill_ids,
                    cutoff,
                    expected_signature,
                    payment_method,
                    notes,
                    &txn_id,
                )
                .await;
            match result {
                Err(PaymentError::Store(StoreError::AlreadyExists(_))) => {
                    last_err = Some(PaymentError::Store(StoreError::AlreadyExists(txn_id)));
                }
                other => return other,
            }
        }
        Err(last_err.unwrap_or(PaymentError::Stale))
    }

    async fn commit_once(
        &self,
        principal: &Principal,
        config: &ClientConfig,
        unit_id: &str,
        amount: Centavos,
        payment_date: NaiveDate,
        penalty_as_of: Option<NaiveDate>,
        open_bill_ids: &[String],
        cutoff: Option<NaiveDate>,
        expected_signature: Option<&str>,
        payment_method: Option<&str>,
        notes: Option<&str>,
        txn_id: &str,
    ) -> PaymentResult<PaymentRecorded> {
        let client_id = config.client_id.clone();
        let policy = self.policy;
        let audit = self.audit.clone();
        let dues_year_candidates = dues_year_candidates(config, payment_date)?;

        let recorded = run_transaction(&self.store, |tx| {
            let client_id = client_id.clone();
            let unit_id = unit_id.to_string();
            let txn_id = txn_id.to_string();
            let open_bill_ids = open_bill_ids.to_vec();
            let dues_year_candidates = dues_year_candidates.clone();
            let payment_method = payment_method.map(str::to_string);
            let notes = notes.map(str::to_string);
            let expected_signature = expected_signature.map(str::to_string);
            let user_id = principal.user_id.clone();
            let audit = audit.clone();
            Box::pin(async move {
                // Re-read the contention hotspots through the transaction
                // so the commit carries version preconditions on them
                let mut bills = Vec::new();
                for bill_id in &open_bill_ids {
                    let path = bill_doc(&client_id, bill_id)?;
                    if let Some(doc) = tx.get(&path).await? {
                        let bill: WaterBill = serde_json::from_value(doc.data)
                            .map_err(|err| PaymentError::Malformed(err.to_string()))?;
                        bills.push(bill);
                    }
                }
                let mut dues_years: Vec<(i32, DuesRecord)> = Vec::new();
                for year in &dues_year_candidates {
                    let path = dues_doc(&client_id, &unit_id, *year)?;
                    if let Some(doc) = tx.get(&path).await? {
                        let record: DuesRecord = serde_json::from_value(doc.data)
                            .map_err(|err| PaymentError::Malformed(err.to_string()))?;
                        dues_years.push((*year, record));
                    }
                }

                let credit_path = credit_rs::credit_doc(&client_id, &unit_id)?;
                let credit_balance = match tx.get(&credit_path).await? {
                    Some(doc) => doc
                        .data
                        .get("balance")
                        .and_then(|v| v.as_i64())
                        .map(Centavos::new)
                        .unwrap_or(Centavos::ZERO),
                    None => Centavos::ZERO,
                };

                // Backdated payments distribute against the penalty figures
                // recomputed as of the backdate; the bills themselves keep
                // their live penalty amounts
                let obligations =
                    collect_obligations(&unit_id, &bills, &dues_years, penalty_as_of, cutoff);
                if let Some(expected) = expected_signature.as_deref() {
                    let current = snapshot_signature(credit_balance, &obligations);
                    if current != expected {
                        return Err(PaymentError::Stale);
                    }
                }

                let plan = build_plan(&unit_id, amount, credit_balance, &obligations, policy)?;
                if plan.allocations.is_empty()
                    && plan.credit_added.is_zero()
                    && plan.credit_used.is_zero()
                {
                    return Err(PaymentError::InsufficientObligations { unit_id });
                }

                // The transaction document
                let allocations = plan_allocations(&plan);
                let draft = TransactionDraft {
                    date: payment_date.format("%Y-%m-%d").to_string(),
                    amount,
                    category_id: SPLIT_CATEGORY.to_string(),
                    category_name: None,
                    allocations: Some(allocations),
                    payment_method: payment_method.clone(),
                    account_id: None,
                    vendor_id: None,
                    unit_id: Some(unit_id.clone()),
                    notes: notes.clone(),
                    pay_seq: None,
                };
                validate_draft(&draft)?;
                let txn = draft.into_transaction(txn_id.clone());
                let txn_path = transaction_doc(&client_id, &txn_id)?;
                let mut payload = serde_json::to_value(&txn)
                    .map_err(|err| PaymentError::Malformed(err.to_string()))?;
                payload["createdAt"] = server_timestamp();
                tx.create(&txn_path, payload);

                // Water bills: one application per touched bill
                for (bill_id, (base, penalty)) in water_portions(&plan) {
                    WaterBillService::apply_payment_in(
                        tx,
                        &client_id,
                        &bill_id,
                        &unit_id,
                        base,
                        penalty,
                        &txn_id,
                        payment_date,
                    )
                    .await?;
                }

                // Dues slots: one application per touched fiscal year
                for (year, fills) in dues_fills(&plan) {
                    DuesService::apply_payment_in(
                        tx,
                        &client_id,
                        &unit_id,
                        year,
                        &fills,
                        &txn_id,
                        payment_date,
                        payment_method.as_deref(),
                        None,
                    )
                    .await?;
                }

                // Net credit movement
                let credit_delta = plan.credit_added - plan.credit_used;
                if !credit_delta.is_zero() {
                    let reason = if credit_delta.is_negative() {
                        "credit_used"
                    } else {
                        "credit_added"
                    };
                    CreditBalanceService::apply_in(
                        tx, &client_id, &unit_id, credit_delta, &txn_id, reason,
                    )
                    .await?;
                }

                audit
                    .record_in(
                        tx,
                        &client_id,
                        AuditEntry::new(
                            "payments",
                            "recordPayment",
                            transactions_collection(&client_id)?.as_str(),
                            &user_id,
                        )
                        .doc_id(&txn_id)
                        .metadata(json!({
                            "unitId": unit_id,
                            "amount": amount,
                            "appliedToPenalties": plan.applied_to_penalties,
                            "creditAdded": plan.credit_added,
                            "creditUsed": plan.credit_used,
                        })),
                    )
                    .map_err(|err| PaymentError::Malformed(err.to_string()))?;

                Ok(PaymentRecorded { transaction_id: txn_id, plan })
            })
        })
        .await?;

        tracing::info!(
            client_id = %config.client_id,
            unit_id = %unit_id,
            transaction_id = %recorded.transaction_id,
            amount = amount.raw(),
            applied_to_penalties = recorded.plan.applied_to_penalties.raw(),
            credit_added = recorded.plan.credit_added.raw(),
            "payment committed"
        );
        Ok(recorded)
    }

    /// Delete a payment transaction with its compensating reversals: dues
    /// slots clear, bill payments roll back, credit restores, all in the
    /// same store transaction as the delete. Admin only.
    pub async fn reverse(
        &self,
        principal: &Principal,
        config: &ClientConfig,
        txn_id: &str,
    ) -> PaymentResult<()> {
        security::ensure_admin(principal, &config.client_id)?;
        let client_id = config.client_id.clone();

        let txn_path = transaction_doc(&client_id, txn_id)?;
        let doc = self
            .store
            .get(&txn_path)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(txn_id.to_string()))?;
        let txn: Transaction = serde_json::from_value(doc.data)
            .map_err(|err| PaymentError::Malformed(err.to_string()))?;
        if !txn.has_payment_allocations() {
            return Err(PaymentError::NotAPayment(txn_id.to_string()));
        }
        let unit_id = txn
            .unit_id
            .clone()
            .ok_or_else(|| PaymentError::Malformed(format!("payment {txn_id} has no unitId")))?;

        let bill_ids = reversal_bill_ids(&txn);
        let dues_years = reversal_dues_years(&txn);
        let credit_delta = reversal_credit_delta(&txn);
        let audit = self.audit.clone();
        let user_id = principal.user_id.clone();

        run_transaction(&self.store, |tx| {
            let client_id = client_id.clone();
            let unit_id = unit_id.clone();
            let txn_id = txn_id.to_string();
            let txn_path = txn_path.clone();
            let bill_ids = bill_ids.clone();
            let dues_years = dues_years.clone();
            let audit = audit.clone();
            let user_id = user_id.clone();
            Box::pin(async move {
                if tx.get(&txn_path).await?.is_none() {
                    return Err(PaymentError::TransactionNotFound(txn_id));
                }

                for bill_id in &bill_ids {
                    WaterBillService::reverse_payment_in(tx, &client_id, bill_id, &txn_id).await?;
                }
                for year in &dues_years {
                    DuesService::reverse_payment_in(tx, &client_id, &unit_id, *year, &txn_id)
                        .await?;
                }
                if !credit_delta.is_zero() {
                    CreditBalanceService::apply_in(
                        tx,
                        &client_id,
                        &unit_id,
                        -credit_delta,
                        &txn_id,
                        "reversal",
                    )
                    .await?;
                }
                tx.delete(&txn_path);

                audit
                    .record_in(
                        tx,
                        &client_id,
                        AuditEntry::new(
                            "payments",
                            "reversePayment",
                            transactions_collection(&client_id)?.as_str(),
                            &user_id,
                        )
                        .doc_id(&txn_id)
                        .metadata(json!({ "unitId": unit_id })),
                    )
                    .map_err(|err| PaymentError::Malformed(err.to_string()))?;
                Ok(())
            })
        })
        .await?;

        tracing::info!(
            client_id = %config.client_id,
            txn_id = %txn_id,
            "payment reversed and deleted"
        );
        Ok(())
    }

    async fn load_dues_years(
        &self,
        config: &ClientConfig,
        unit_id: &str,
        effective: NaiveDate,
    ) -> PaymentResult<Vec<(i32, DuesRecord)>> {
        let mut years = Vec::new();
        for year in dues_year_candidates(config, effective)? {
            if let Some(record) = self
                .dues
                .get_year(&config.client_id, unit_id, year)
                .await?
            {
                years.push((year, record));
            }
        }
        Ok(years)
    }
}

/// The payment date combined with the current time-of-day, for the id stem
fn payment_instant(
    config: &ClientConfig,
    payment_date: NaiveDate,
) -> chrono::DateTime<chrono::FixedOffset> {
    let tz = config.timezone();
    let now = chrono::Utc::now().with_timezone(&tz);
    calendar::civil_midnight(payment_date, tz) + (now.time() - chrono::NaiveTime::MIN)
}

/// Prior and current fiscal year: leftover obligations can reach back one
fn dues_year_candidates(config: &ClientConfig, effective: NaiveDate) -> PaymentResult<Vec<i32>> {
    let current = calendar::fiscal_year(effective, config.fiscal_year_start_month)?;
    Ok(vec![current - 1, current])
}

fn cutoff_date(
    config: &ClientConfig,
    selected_month: Option<(i32, u32)>,
) -> PaymentResult<Option<NaiveDate>> {
    let Some((fiscal_year, month)) = selected_month else {
        return Ok(None);
    };
    let index = month
        .checked_sub(1)
        .ok_or(PaymentError::Dues(dues_rs::DuesError::InvalidMonth(month)))?;
    Ok(Some(calendar::first_day_of_fiscal_month(
        fiscal_year,
        index,
        config.fiscal_year_start_month,
    )?))
}

/// Render the plan as signed transaction allocations
fn plan_allocations(plan: &PaymentPlan) -> Vec<Allocation> {
    let mut allocations = Vec::new();
    for planned in &plan.allocations {
        let target = &planned.obligation.target;
        let metadata = match target {
            ObligationTarget::WaterPenalty { bill_id } | ObligationTarget::WaterBase { bill_id } => {
                json!({ "billId": bill_id })
            }
            ObligationTarget::HoaMonth { fiscal_year, month } => {
                json!({ "fiscalYear": fiscal_year, "month": month })
            }
        };
        allocations.push(Allocation {
            target_id: target.target_id(),
            target_name: target.target_name(),
            kind: target.allocation_type(),
            category_id: target.category_id().to_string(),
            amount: planned.amount,
            metadata: Some(metadata),
        });
    }
    if !plan.credit_used.is_zero() {
        allocations.push(Allocation {
            target_id: "creditBalance".to_string(),
            target_name: "Credit balance used".to_string(),
            kind: transactions_rs::AllocationType::CreditUsed,
            category_id: "creditBalance".to_string(),
            amount: -plan.credit_used,
            metadata: None,
        });
    }
    if !plan.credit_added.is_zero() {
        allocations.push(Allocation {
            target_id: "creditBalance".to_string(),
            target_name: "Credit balance added".to_string(),
            kind: transactions_rs::AllocationType::CreditAdded,
            category_id: "creditBalance".to_string(),
            amount: plan.credit_added,
            metadata: None,
        });
    }
    allocations
}

/// Per-bill (base, penalty) portions of a plan
fn water_portions(plan: &PaymentPlan) -> BTreeMap<String, (Centavos, Centavos)> {
    let mut portions: BTreeMap<String, (Centavos, Centavos)> = BTreeMap::new();
    for planned in &plan.allocations {
        match &planned.obligation.target {
            ObligationTarget::WaterBase { bill_id } => {
                portions.entry(bill_id.clone()).or_default().0 += planned.amount;
            }
            ObligationTarget::WaterPenalty { bill_id } => {
                portions.entry(bill_id.clone()).or_default().1 += planned.amount;
            }
            ObligationTarget::HoaMonth { .. } => {}
        }
    }
    portions
}

/// Per-fiscal-year dues fills of a plan
fn dues_fills(plan: &PaymentPlan) -> BTreeMap<i32, Vec<SlotFill>> {
    let mut fills: BTreeMap<i32, Vec<SlotFill>> = BTreeMap::new();
    for planned in &plan.allocations {
        if let ObligationTarget::HoaMonth { fiscal_year, month } = &planned.obligation.target {
            fills
                .entry(*fiscal_year)
                .or_default()
                .push(SlotFill { month: *month, amount: planned.amount });
        }
    }
    fills
}

fn reversal_bill_ids(txn: &Transaction) -> Vec<String> {
    let mut ids: Vec<String> = txn
        .allocations()
        .iter()
        .filter_map(|allocation| {
            allocation
                .metadata
                .as_ref()
                .and_then(|meta| meta.get("billId"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

fn reversal_dues_years(txn: &Transaction) -> Vec<i32> {
    let mut years: Vec<i32> = txn
        .allocations()
        .iter()
        .filter_map(|allocation| {
            allocation
                .metadata
                .as_ref()
                .and_then(|meta| meta.get("fiscalYear"))
                .and_then(|v| v.as_i64())
                .map(|y| y as i32)
        })
        .collect();
    years.sort_unstable();
    years.dedup();
    years
}

/// Net credit movement the original payment made
fn reversal_credit_delta(txn: &Transaction) -> Centavos {
    txn.allocations()
        .iter()
        .filter(|allocation| {
            matches!(
                allocation.kind,
                transactions_rs::AllocationType::CreditUsed
                    | transactions_rs::AllocationType::CreditAdded
            )
        })
        .map(|allocation| allocation.amount)
        .sum()
}
