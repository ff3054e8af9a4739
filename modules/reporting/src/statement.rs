//! Statement of account
//!
//! A chronological per-unit ledger for one fiscal year: charge rows
//! synthesized from HOA scheduled amounts and water bills, payment rows
//! from the transactions that reference the unit, and a running balance
//! from zero. Charges sort before payments on the same civil date. Charge
//! rows only appear once their effective due date has arrived; for
//! quarterly clients a quarter shows all-or-nothing.

use crate::{ReportError, ReportResult};
use chrono::NaiveDate;
use credit_rs::CreditBalanceService;
use doc_store::{Op, Query, SharedStore, Store};
use dues_rs::DuesService;
use fiscal_core::{calendar, Centavos};
use platform_contracts::ExchangeRateProvider;
use rust_decimal::Decimal;
use security::Principal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tenants::ClientConfig;
use transactions_rs::service::transactions_collection;
use transactions_rs::{AllocationType, Transaction};
use waterbills_rs::{BillStatus, WaterBillService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowKind {
    Charge,
    Payment,
}

/// One statement line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementRow {
    pub date: NaiveDate,
    pub kind: RowKind,
    pub description: String,
    /// Charges positive, payments positive (subtracted from the balance)
    pub amount: Centavos,
    pub running_balance: Centavos,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// The assembled statement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    pub client_id: String,
    pub unit_id: String,
    pub fiscal_year: i32,
    pub as_of: NaiveDate,
    pub rows: Vec<StatementRow>,
    pub total_charges: Centavos,
    pub total_payments: Centavos,
    pub credit_balance: Centavos,
    pub final_balance: Centavos,
    /// Reference rate of the display currency against USD, when a provider
    /// is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_rate: Option<Decimal>,
}

/// Builds statements of account
pub struct StatementService {
    store: SharedStore,
    dues: DuesService,
    bills: WaterBillService,
    credit: CreditBalanceService,
    rates: Option<Arc<dyn ExchangeRateProvider>>,
}

impl StatementService {
    pub fn new(store: SharedStore, dues: DuesService, bills: WaterBillService) -> Self {
        Self {
            credit: CreditBalanceService::new(store.clone()),
            store,
            dues,
            bills,
            rates: None,
        }
    }

    pub fn with_rates(mut self, rates: Arc<dyn ExchangeRateProvider>) -> Self {
        self.rates = Some(rates);
        self
    }

    pub async fn build(
        &self,
        principal: &Principal,
        config: &ClientConfig,
        unit_id: &str,
        fiscal_year: i32,
        as_of: NaiveDate,
    ) -> ReportResult<Statement> {
        security::ensure_client_access(principal, &config.client_id)?;
        let client_id = config.client_id.as_str();

        let mut rows: Vec<StatementRow> = Vec::new();

        // HOA charges: visible months at their (derived) due dates
        let dues_record = self.dues.get_year(client_id, unit_id, fiscal_year).await?;
        if let Some(record) = &dues_record {
            let mut quarter_due: Option<NaiveDate> = None;
            let due_dates: Vec<Option<NaiveDate>> = record
                .payments
                .iter()
                .map(|slot| {
                    let own = slot
                        .due_date
                        .as_deref()
                        .and_then(|d| calendar::parse_civil_date(d).ok());
                    if let Some(date) = own {
                        quarter_due = Some(date);
                    }
                    own.or(quarter_due)
                })
                .collect();

            for month in record.visible_months(as_of, config.dues_frequency) {
                let Some(due) = due_dates.get((month - 1) as usize).copied().flatten() else {
                    continue;
                };
                rows.push(StatementRow {
                    date: due,
                    kind: RowKind::Charge,
                    description: format!("HOA dues, fiscal month {month}"),
                    amount: record.scheduled_amount,
                    running_balance: Centavos::ZERO,
                    transaction_id: None,
                });
            }
        }

        // Water charges: bills of this fiscal year, once due
        for bill in self.bills.list(client_id).await? {
            if bill.fiscal_year != fiscal_year {
                continue;
            }
            let Ok(due) = calendar::parse_civil_date(&bill.due_date) else {
                continue;
            };
            let Some(unit) = bill.bills.units.get(unit_id) else {
                continue;
            };
            if due > as_of && unit.status != BillStatus::Paid {
                continue;
            }
            rows.push(StatementRow {
                date: due,
                kind: RowKind::Charge,
                description: format!("Water bill {}", bill.doc_id()),
                amount: unit.current_charge,
                running_balance: Centavos::ZERO,
                transaction_id: None,
            });
            if unit.penalty_amount > Centavos::ZERO {
                let penalty_date = unit
                    .last_penalty_update
                    .as_deref()
                    .and_then(|d| calendar::parse_civil_date(d).ok())
                    .unwrap_or(due);
                rows.push(StatementRow {
                    date: penalty_date.min(as_of),
                    kind: RowKind::Charge,
                    description: format!("Late penalty, water bill {}", bill.doc_id()),
                    amount: unit.penalty_amount,
                    running_balance: Centavos::ZERO,
                    transaction_id: None,
                });
            }
        }

        // Payments: one row per transaction referencing this unit
        let (from, to) = calendar::fiscal_year_bounds(
            fiscal_year,
            config.fiscal_year_start_month,
            config.timezone(),
        )?;
        let payments = self
            .unit_transactions(
                client_id,
                unit_id,
                from.date_naive(),
                to.date_naive(),
            )
            .await?;
        for txn in &payments {
            let Ok(date) = calendar::parse_civil_date(&txn.date) else {
                continue;
            };
            if date > as_of {
                continue;
            }
            let applied = applied_to_obligations(txn);
            if applied.is_zero() {
                continue;
            }
            rows.push(StatementRow {
                date,
                kind: RowKind::Payment,
                description: payment_description(txn),
                amount: applied,
                running_balance: Centavos::ZERO,
                transaction_id: Some(txn.id.clone()),
            });
        }

        // Charges precede payments on the same civil date
        rows.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| row_rank(a.kind).cmp(&row_rank(b.kind)))
                .then_with(|| a.description.cmp(&b.description))
        });

        // Credit offsets the closing balance
        let credit_balance = self.credit.get(client_id, unit_id).await?.balance;
        if credit_balance > Centavos::ZERO {
            rows.push(StatementRow {
                date: as_of,
                kind: RowKind::Payment,
                description: "Credit balance on account".to_string(),
                amount: credit_balance,
                running_balance: Centavos::ZERO,
                transaction_id: None,
            });
        }

        let mut running = Centavos::ZERO;
        let mut total_charges = Centavos::ZERO;
        let mut total_payments = Centavos::ZERO;
        for row in &mut rows {
            match row.kind {
                RowKind::Charge => {
                    running += row.amount;
                    total_charges += row.amount;
                }
                RowKind::Payment => {
                    running -= row.amount;
                    total_payments += row.amount;
                }
            }
            row.running_balance = running;
        }

        let reference_rate = match &self.rates {
            Some(provider) => match provider.rate("USD", &config.display_currency, as_of).await {
                Ok(rate) => Some(rate),
                Err(err) => {
                    tracing::debug!(
                        client_id = %config.client_id,
                        error = %err,
                        "reference rate unavailable; statement proceeds without it"
                    );
                    None
                }
            },
            None => None,
        };

        Ok(Statement {
            client_id: client_id.to_string(),
            unit_id: unit_id.to_string(),
            fiscal_year,
            as_of,
            rows,
            total_charges,
            total_payments,
            credit_balance,
            final_balance: running,
            reference_rate,
        })
    }

    async fn unit_transactions(
        &self,
        client_id: &str,
        unit_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ReportResult<Vec<Transaction>> {
        let collection = transactions_collection(client_id)?;
        let docs = self
            .store
            .query(
                &collection,
                Query::new()
                    .filter("unitId", Op::Eq, serde_json::json!(unit_id))
                    .filter("date", Op::Ge, serde_json::json!(from.format("%Y-%m-%d").to_string()))
                    .filter("date", Op::Le, serde_json::json!(to.format("%Y-%m-%d").to_string())),
            )
            .await?;
        let mut transactions = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.path.id().to_string();
            let mut txn: Transaction = serde_json::from_value(doc.data)
                .map_err(|err| ReportError::Malformed(err.to_string()))?;
            txn.id = id;
            transactions.push(txn);
        }
        transactions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(transactions)
    }
}

fn row_rank(kind: RowKind) -> u8 {
    match kind {
        RowKind::Charge => 0,
        RowKind::Payment => 1,
    }
}

/// The portion of a payment that settled obligations (credit movements are
/// reflected by the closing credit row instead)
fn applied_to_obligations(txn: &Transaction) -> Centavos {
    if txn.allocations().is_empty() {
        return txn.amount.max(Centavos::ZERO);
    }
    txn.allocations()
        .iter()
        .filter(|allocation| {
            matches!(
                allocation.kind,
                AllocationType::HoaMonth
                    | AllocationType::WaterConsumption
                    | AllocationType::WaterPenalty
            )
        })
        .map(|allocation| allocation.amount)
        .sum()
}

fn payment_description(txn: &Transaction) -> String {
    let targets: Vec<&str> = txn
        .allocations()
        .iter()
        .filter(|allocation| {
            matches!(
                allocation.kind,
                AllocationType::HoaMonth
                    | AllocationType::WaterConsumption
                    | AllocationType::WaterPenalty
            )
        })
        .map(|allocation| allocation.target_name.as_str())
        .collect();
    if targets.is_empty() {
        "Payment received".to_string()
    } else {
        format!("Payment: {}", targets.join(", "))
    }
}
