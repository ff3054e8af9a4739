//! Dues service
//!
//! Provisioning, payment application, and reversal over per-year dues
//! records. Payment application is exposed both as a standalone operation
//! and as a `*_in` variant that stages into a caller-owned store
//! transaction, which is how the payment distributor composes dues slots,
//! water bills, and credit movements into one atomic commit.

use crate::models::{DuesPayment, DuesRecord, MONTHS_PER_YEAR};
use audit::{AuditEntry, AuditLogger};
use chrono::NaiveDate;
use doc_store::{run_transaction, DocPath, SharedStore, Store, StoreError, Tx};
use fiscal_core::{calendar, CalendarError, Centavos};
use platform_contracts::ErrorKind;
use serde_json::json;
use std::collections::BTreeMap;
use tenants::{ClientConfig, DuesFrequency, TenantError, UnitsDirectory};
use thiserror::Error;

/// Errors from the dues ledger
#[derive(Debug, Error)]
pub enum DuesError {
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    #[error("no dues record for unit {unit_id} fiscal year {fiscal_year}")]
    YearNotProvisioned { unit_id: String, fiscal_year: i32 },

    #[error("fiscal month must be 1..=12, got {0}")]
    InvalidMonth(u32),

    #[error("payment amount for month {month} must be positive, got {amount}")]
    NonPositiveAmount { month: u32, amount: Centavos },

    #[error("dues record malformed: {0}")]
    Malformed(String),

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tenant(#[from] TenantError),
}

impl DuesError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DuesError::UnitNotFound(_) | DuesError::YearNotProvisioned { .. } => ErrorKind::NotFound,
            DuesError::InvalidMonth(_) | DuesError::NonPositiveAmount { .. } => {
                ErrorKind::InvalidInput
            }
            DuesError::Malformed(_) => ErrorKind::Integrity,
            DuesError::Calendar(_) => ErrorKind::InvalidInput,
            DuesError::Store(err) if err.is_transient() => ErrorKind::Transient,
            DuesError::Store(_) => ErrorKind::Integrity,
            DuesError::Tenant(TenantError::NotFound(_)) => ErrorKind::NotFound,
            DuesError::Tenant(_) => ErrorKind::ConfigError,
        }
    }
}

pub type DuesResult<T> = Result<T, DuesError>;

/// One month's share of an incoming payment
#[derive(Debug, Clone, Copy)]
pub struct SlotFill {
    /// Fiscal month, 1-based
    pub month: u32,
    pub amount: Centavos,
}

/// Dues record document path; the fiscal year is a 4-digit document id
pub fn dues_doc(client_id: &str, unit_id: &str, fiscal_year: i32) -> Result<DocPath, StoreError> {
    DocPath::parse(format!(
        "clients/{client_id}/units/{unit_id}/dues/{fiscal_year:04}"
    ))
}

/// Scheduled amounts, payment slots, and reversal over dues records
#[derive(Clone)]
pub struct DuesService {
    store: SharedStore,
    audit: AuditLogger,
    units: UnitsDirectory,
}

impl DuesService {
    pub fn new(store: SharedStore, audit: AuditLogger) -> Self {
        let units = UnitsDirectory::new(store.clone());
        Self { store, audit, units }
    }

    /// Idempotently provision a unit's dues record for a fiscal year.
    ///
    /// The scheduled amount copies from the unit; due dates seed as the
    /// first civil day of each fiscal month's calendar month. For quarterly
    /// clients only the first slot of each quarter carries the
    /// authoritative due date.
    pub async fn ensure_year(
        &self,
        config: &ClientConfig,
        unit_id: &str,
        fiscal_year: i32,
    ) -> DuesResult<DuesRecord> {
        let path = dues_doc(&config.client_id, unit_id, fiscal_year)?;
        if let Some(doc) = self.store.get(&path).await? {
            return parse_record(doc.data);
        }

        let unit = self
            .units
            .get(&config.client_id, unit_id)
            .await
            .map_err(|err| match err {
                TenantError::NotFound(_) => DuesError::UnitNotFound(unit_id.to_string()),
                other => other.into(),
            })?;

        let record = build_record(config, unit.scheduled_dues_amount, fiscal_year)?;
        let payload = serde_json::to_value(&record)
            .map_err(|err| DuesError::Malformed(err.to_string()))?;
        match self.store.create(&path, payload).await {
            Ok(()) => {
                tracing::info!(
                    client_id = %config.client_id,
                    unit_id = %unit_id,
                    fiscal_year,
                    "dues record provisioned"
                );
                self.audit
                    .record_best_effort(
                        &config.client_id,
                        AuditEntry::new(
                            "dues",
                            "ensureYear",
                            path.parent_collection().as_str(),
                            "system",
                        )
                        .doc_id(path.id())
                        .metadata(json!({ "scheduledAmount": record.scheduled_amount })),
                    )
                    .await;
                Ok(record)
            }
            // Concurrent provisioning of the same year: take the winner's
            Err(StoreError::AlreadyExists(_)) => {
                let doc = self
                    .store
                    .get(&path)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(path.as_str().to_string()))?;
                parse_record(doc.data)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Stage payment slots into a caller-owned store transaction.
    ///
    /// Fills add to the slot amounts; a slot flips to paid once it covers
    /// the scheduled amount. `total_paid` is recomputed from the slots.
    pub async fn apply_payment_in(
        tx: &mut Tx,
        client_id: &str,
        unit_id: &str,
        fiscal_year: i32,
        fills: &[SlotFill],
        transaction_id: &str,
        payment_date: NaiveDate,
        payment_method: Option<&str>,
        reference: Option<&str>,
    ) -> DuesResult<DuesRecord> {
        for fill in fills {
            if !(1..=MONTHS_PER_YEAR as u32).contains(&fill.month) {
                return Err(DuesError::InvalidMonth(fill.month));
            }
            if fill.amount <= Centavos::ZERO {
                return Err(DuesError::NonPositiveAmount {
                    month: fill.month,
                    amount: fill.amount,
                });
            }
        }

        let path = dues_doc(client_id, unit_id, fiscal_year)?;
        let doc = tx
            .get(&path)
            .await?
            .ok_or_else(|| DuesError::YearNotProvisioned {
                unit_id: unit_id.to_string(),
                fiscal_year,
            })?;
        let mut record = parse_record(doc.data)?;

        let date = payment_date.format("%Y-%m-%d").to_string();
        for fill in fills {
            let scheduled = record.scheduled_amount;
            let slot = record
                .slot_mut(fill.month)
                .ok_or(DuesError::InvalidMonth(fill.month))?;
            slot.amount += fill.amount;
            slot.base_paid += fill.amount;
            slot.paid = slot.amount >= scheduled;
            slot.date = Some(date.clone());
            slot.transaction_id = Some(transaction_id.to_string());
            slot.payment_method = payment_method.map(str::to_string);
            slot.reference = reference.map(str::to_string);
        }
        record.recompute_total();

        let payload = serde_json::to_value(&record)
            .map_err(|err| DuesError::Malformed(err.to_string()))?;
        tx.set(&path, payload);
        Ok(record)
    }

    /// Record a payment as its own store transaction
    pub async fn record_payment(
        &self,
        config: &ClientConfig,
        unit_id: &str,
        fiscal_year: i32,
        fills: Vec<SlotFill>,
        transaction_id: &str,
        payment_date: NaiveDate,
        payment_method: Option<&str>,
        reference: Option<&str>,
    ) -> DuesResult<DuesRecord> {
        self.ensure_year(config, unit_id, fiscal_year).await?;

        let client_id = config.client_id.clone();
        let record = run_transaction(&self.store, |tx| {
            let client_id = client_id.clone();
            let unit_id = unit_id.to_string();
            let fills = fills.clone();
            let transaction_id = transaction_id.to_string();
            let payment_method = payment_method.map(str::to_string);
            let reference = reference.map(str::to_string);
            Box::pin(async move {
                Self::apply_payment_in(
                    tx,
                    &client_id,
                    &unit_id,
                    fiscal_year,
                    &fills,
                    &transaction_id,
                    payment_date,
                    payment_method.as_deref(),
                    reference.as_deref(),
                )
                .await
            })
        })
        .await?;

        tracing::info!(
            client_id = %config.client_id,
            unit_id = %unit_id,
            fiscal_year,
            transaction_id = %transaction_id,
            total_paid = record.total_paid.raw(),
            "dues payment recorded"
        );
        self.audit
            .record_best_effort(
                &config.client_id,
                AuditEntry::new(
                    "dues",
                    "recordPayment",
                    dues_doc(&config.client_id, unit_id, fiscal_year)?.as_str(),
                    "system",
                )
                .metadata(json!({
                    "transactionId": transaction_id,
                    "months": fills.iter().map(|fill| fill.month).collect::<Vec<_>>(),
                })),
            )
            .await;
        Ok(record)
    }

    /// Stage the reversal of every slot referencing `transaction_id`.
    ///
    /// Returns the cleared record; clearing keeps the seeded due dates so
    /// the record matches its freshly provisioned shape.
    pub async fn reverse_payment_in(
        tx: &mut Tx,
        client_id: &str,
        unit_id: &str,
        fiscal_year: i32,
        transaction_id: &str,
    ) -> DuesResult<DuesRecord> {
        let path = dues_doc(client_id, unit_id, fiscal_year)?;
        let doc = tx
            .get(&path)
            .await?
            .ok_or_else(|| DuesError::YearNotProvisioned {
                unit_id: unit_id.to_string(),
                fiscal_year,
            })?;
        let mut record = parse_record(doc.data)?;

        let mut cleared = 0;
        for slot in &mut record.payments {
            if slot.transaction_id.as_deref() == Some(transaction_id) {
                slot.clear();
                cleared += 1;
            }
        }
        record.recompute_total();

        if cleared > 0 {
            let payload = serde_json::to_value(&record)
                .map_err(|err| DuesError::Malformed(err.to_string()))?;
            tx.set(&path, payload);
        }
        tracing::info!(
            client_id = %client_id,
            unit_id = %unit_id,
            fiscal_year,
            transaction_id = %transaction_id,
            cleared,
            "dues payment reversed"
        );
        Ok(record)
    }

    /// Reverse a payment as its own store transaction
    pub async fn reverse_payment(
        &self,
        client_id: &str,
        unit_id: &str,
        fiscal_year: i32,
        transaction_id: &str,
    ) -> DuesResult<DuesRecord> {
        let record = run_transaction(&self.store, |tx| {
            let client_id = client_id.to_string();
            let unit_id = unit_id.to_string();
            let transaction_id = transaction_id.to_string();
            Box::pin(async move {
                Self::reverse_payment_in(tx, &client_id, &unit_id, fiscal_year, &transaction_id)
                    .await
            })
        })
        .await?;

        self.audit
            .record_best_effort(
                client_id,
                AuditEntry::new(
                    "dues",
                    "reversePayment",
                    dues_doc(client_id, unit_id, fiscal_year)?.as_str(),
                    "system",
                )
                .metadata(json!({ "transactionId": transaction_id })),
            )
            .await;
        Ok(record)
    }

    /// Load one unit's record without provisioning
    pub async fn get_year(
        &self,
        client_id: &str,
        unit_id: &str,
        fiscal_year: i32,
    ) -> DuesResult<Option<DuesRecord>> {
        let path = dues_doc(client_id, unit_id, fiscal_year)?;
        match self.store.get(&path).await? {
            Some(doc) => Ok(Some(parse_record(doc.data)?)),
            None => Ok(None),
        }
    }

    /// All units' records for one fiscal year
    pub async fn list_year(
        &self,
        client_id: &str,
        fiscal_year: i32,
    ) -> DuesResult<BTreeMap<String, DuesRecord>> {
        let mut records = BTreeMap::new();
        for unit in self.units.list(client_id).await? {
            if let Some(record) = self.get_year(client_id, &unit.unit_id, fiscal_year).await? {
                records.insert(unit.unit_id, record);
            }
        }
        Ok(records)
    }
}

fn parse_record(data: serde_json::Value) -> DuesResult<DuesRecord> {
    let record: DuesRecord =
        serde_json::from_value(data).map_err(|err| DuesError::Malformed(err.to_string()))?;
    if record.payments.len() != MONTHS_PER_YEAR {
        return Err(DuesError::Malformed(format!(
            "expected {} payment slots, found {}",
            MONTHS_PER_YEAR,
            record.payments.len()
        )));
    }
    Ok(record)
}

fn build_record(
    config: &ClientConfig,
    scheduled_amount: Centavos,
    fiscal_year: i32,
) -> DuesResult<DuesRecord> {
    let start_month = config.fiscal_year_start_month;
    let mut payments = Vec::with_capacity(MONTHS_PER_YEAR);
    for index in 0..MONTHS_PER_YEAR as u32 {
        let carries_due_date = match config.dues_frequency {
            DuesFrequency::Monthly => true,
            DuesFrequency::Quarterly => index % 3 == 0,
        };
        let due_date = if carries_due_date {
            Some(calendar::first_day_of_fiscal_month(
                fiscal_year,
                index,
                start_month,
            )?)
        } else {
            None
        };
        payments.push(DuesPayment::empty(index + 1, due_date));
    }
    Ok(DuesRecord {
        scheduled_amount,
        total_paid: Centavos::ZERO,
        payments,
    })
}
