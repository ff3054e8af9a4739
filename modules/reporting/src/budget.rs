//! Budget vs actual
//!
//! Actuals aggregate by category, with split allocations contributing
//! individually. Annual budgets prorate by the elapsed fraction of the
//! fiscal year. Variance is sign-aware: for income, actual above budget is
//! favorable; for expense, spending below budget is favorable.
//! Special-assessment categories report separately, splitting collections
//! from expenditures with a net fund balance.

use crate::{ReportError, ReportResult};
use chrono::{DateTime, FixedOffset};
use doc_store::{CollectionPath, Op, Query, SharedStore, Store};
use fiscal_core::{calendar, Centavos};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use security::Principal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tenants::ClientConfig;
use transactions_rs::service::transactions_collection;
use transactions_rs::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CategoryKind {
    Income,
    Expense,
}

/// One category's comparison line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetLine {
    pub category_id: String,
    pub category_name: String,
    pub kind: CategoryKind,
    pub annual_budget: Centavos,
    pub ytd_budget: Centavos,
    /// Signed net flow observed in the fiscal year to date
    pub actual: Centavos,
    /// Positive is favorable for both kinds
    pub variance: Centavos,
}

/// The third table: special assessments and project funds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialAssessments {
    pub collections: Vec<BudgetLine>,
    pub expenditures: Vec<BudgetLine>,
    pub net_fund_balance: Centavos,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetReport {
    pub client_id: String,
    pub fiscal_year: i32,
    pub percent_elapsed: Decimal,
    pub income: Vec<BudgetLine>,
    pub expense: Vec<BudgetLine>,
    pub special: SpecialAssessments,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryDoc {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: CategoryKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BudgetDoc {
    category_id: String,
    fiscal_year: i32,
    annual_amount: Centavos,
}

fn categories_collection(client_id: &str) -> Result<CollectionPath, doc_store::StoreError> {
    CollectionPath::parse(format!("clients/{client_id}/categories"))
}

fn budgets_collection(client_id: &str) -> Result<CollectionPath, doc_store::StoreError> {
    CollectionPath::parse(format!("clients/{client_id}/budgets"))
}

/// Whether a category belongs in the special-assessment table
fn is_special(category_id: &str) -> bool {
    category_id.starts_with("projects") || category_id == "special_assessments"
}

/// Builds the budget-vs-actual comparison
pub struct BudgetReportService {
    store: SharedStore,
}

impl BudgetReportService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn build(
        &self,
        principal: &Principal,
        config: &ClientConfig,
        fiscal_year: i32,
        now: DateTime<FixedOffset>,
    ) -> ReportResult<BudgetReport> {
        security::ensure_client_access(principal, &config.client_id)?;
        let client_id = config.client_id.as_str();

        let categories = self.load_categories(client_id).await?;
        let budgets = self.load_budgets(client_id, fiscal_year).await?;
        let actuals = self.load_actuals(config, fiscal_year).await?;

        let (start, end) = calendar::fiscal_year_bounds(
            fiscal_year,
            config.fiscal_year_start_month,
            config.timezone(),
        )?;
        let percent_elapsed = elapsed_fraction(start, end, now);

        let mut income = Vec::new();
        let mut expense = Vec::new();
        let mut special = SpecialAssessments::default();

        for (category_id, category) in &categories {
            let annual = budgets.get(category_id).copied().unwrap_or(Centavos::ZERO);
            let actual = actuals.get(category_id).copied().unwrap_or(Centavos::ZERO);
            if annual.is_zero() && actual.is_zero() {
                continue;
            }

            let ytd_budget = prorate(annual, percent_elapsed);
            let variance = match category.kind {
                CategoryKind::Income => actual - ytd_budget,
                CategoryKind::Expense => ytd_budget - actual.abs(),
            };
            let line = BudgetLine {
                category_id: category_id.clone(),
                category_name: category.name.clone(),
                kind: category.kind,
                annual_budget: annual,
                ytd_budget,
                actual,
                variance,
            };

            if is_special(category_id) {
                match category.kind {
                    CategoryKind::Income => special.collections.push(line),
                    CategoryKind::Expense => special.expenditures.push(line),
                }
            } else {
                match category.kind {
                    CategoryKind::Income => income.push(line),
                    CategoryKind::Expense => expense.push(line),
                }
            }
        }

        special.net_fund_balance = special
            .collections
            .iter()
            .map(|line| line.actual)
            .sum::<Centavos>()
            - special
                .expenditures
                .iter()
                .map(|line| line.actual.abs())
                .sum::<Centavos>();

        Ok(BudgetReport {
            client_id: client_id.to_string(),
            fiscal_year,
            percent_elapsed,
            income,
            expense,
            special,
        })
    }

    async fn load_categories(
        &self,
        client_id: &str,
    ) -> ReportResult<BTreeMap<String, CategoryDoc>> {
        let mut categories = BTreeMap::new();
        for path in self.store.list_docs(&categories_collection(client_id)?).await? {
            if let Some(doc) = self.store.get(&path).await? {
                let category: CategoryDoc = serde_json::from_value(doc.data)
                    .map_err(|err| ReportError::Malformed(err.to_string()))?;
                categories.insert(path.id().to_string(), category);
            }
        }
        Ok(categories)
    }

    async fn load_budgets(
        &self,
        client_id: &str,
        fiscal_year: i32,
    ) -> ReportResult<BTreeMap<String, Centavos>> {
        let docs = self
            .store
            .query(
                &budgets_collection(client_id)?,
                Query::new().filter("fiscalYear", Op::Eq, serde_json::json!(fiscal_year)),
            )
            .await?;
        let mut budgets = BTreeMap::new();
        for doc in docs {
            let budget: BudgetDoc = serde_json::from_value(doc.data)
                .map_err(|err| ReportError::Malformed(err.to_string()))?;
            if budget.fiscal_year == fiscal_year {
                budgets.insert(budget.category_id, budget.annual_amount);
            }
        }
        Ok(budgets)
    }

    /// Signed net flow per category; split allocations contribute each
    async fn load_actuals(
        &self,
        config: &ClientConfig,
        fiscal_year: i32,
    ) -> ReportResult<BTreeMap<String, Centavos>> {
        let (from, to) = calendar::fiscal_year_bounds(
            fiscal_year,
            config.fiscal_year_start_month,
            config.timezone(),
        )?;
        let docs = self
            .store
            .query(
                &transactions_collection(&config.client_id)?,
                Query::new()
                    .filter(
                        "date",
                        Op::Ge,
                        serde_json::json!(from.date_naive().format("%Y-%m-%d").to_string()),
                    )
                    .filter(
                        "date",
                        Op::Le,
                        serde_json::json!(to.date_naive().format("%Y-%m-%d").to_string()),
                    ),
            )
            .await?;

        let mut actuals: BTreeMap<String, Centavos> = BTreeMap::new();
        for doc in docs {
            let txn: Transaction = serde_json::from_value(doc.data)
                .map_err(|err| ReportError::Malformed(err.to_string()))?;
            if txn.is_split() {
                for allocation in txn.allocations() {
                    *actuals.entry(allocation.category_id.clone()).or_default() +=
                        allocation.amount;
                }
            } else {
                *actuals.entry(txn.category_id.clone()).or_default() += txn.amount;
            }
        }
        Ok(actuals)
    }
}

/// Fraction of the fiscal year elapsed at `now`, clamped to 0..=1
fn elapsed_fraction(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    now: DateTime<FixedOffset>,
) -> Decimal {
    let total = (end - start).num_seconds();
    if total <= 0 {
        return Decimal::ONE;
    }
    let elapsed = (now - start).num_seconds().clamp(0, total);
    Decimal::from(elapsed) / Decimal::from(total)
}

/// Year-to-date share of an annual amount
fn prorate(annual: Centavos, fraction: Decimal) -> Centavos {
    let scaled = (Decimal::from(annual.raw()) * fraction)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Centavos::new(scaled.to_i64().unwrap_or(0))
}
