//! Report aggregation over seeded ledgers

use audit::AuditLogger;
use chrono::NaiveDate;
use doc_store::{DocPath, MemoryStore, SharedStore, Store};
use dues_rs::{DuesService, SlotFill};
use fiscal_core::{calendar, Centavos};
use reporting_rs::{BudgetReportService, CategoryKind, RowKind, StatementService};
use security::Principal;
use serde_json::json;
use std::sync::Arc;
use tenants::{ClientConfig, DuesFrequency};
use waterbills_rs::WaterBillService;

fn date(text: &str) -> NaiveDate {
    calendar::parse_civil_date(text).unwrap()
}

fn monthly_client() -> ClientConfig {
    ClientConfig {
        client_id: "MTC".into(),
        display_name: "Marina Turquesa".into(),
        fiscal_year_start_month: 1,
        display_currency: "MXN".into(),
        dues_frequency: DuesFrequency::Monthly,
        dues_grace_days: 10,
        timezone_offset_hours: -5,
    }
}

async fn seed_doc(store: &SharedStore, path: &str, data: serde_json::Value) {
    store.set(&DocPath::parse(path).unwrap(), data).await.unwrap();
}

fn services(store: &SharedStore) -> (StatementService, DuesService) {
    let audit = AuditLogger::new(store.clone());
    let dues = DuesService::new(store.clone(), audit.clone());
    let bills = WaterBillService::new(store.clone(), audit);
    (
        StatementService::new(store.clone(), dues.clone(), bills),
        dues,
    )
}

#[tokio::test]
async fn test_statement_running_balance_reconciles() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    seed_doc(
        &store,
        "clients/MTC/units/1C",
        json!({ "unitNumber": "1C", "scheduledDuesAmount": 460000 }),
    )
    .await;
    let (statements, dues) = services(&store);
    let config = monthly_client();
    let admin = Principal::super_admin("ops");

    dues.ensure_year(&config, "1C", 2025).await.unwrap();
    // January paid in full by one transaction
    dues.record_payment(
        &config,
        "1C",
        2025,
        vec![SlotFill { month: 1, amount: Centavos::new(460000) }],
        "2025-01-05_100000_000",
        date("2025-01-05"),
        None,
        None,
    )
    .await
    .unwrap();
    seed_doc(
        &store,
        "clients/MTC/transactions/2025-01-05_100000_000",
        json!({
            "date": "2025-01-05",
            "amount": 460000,
            "categoryId": "-split-",
            "unitId": "1C",
            "allocations": [{
                "targetId": "2025:01",
                "targetName": "HOA dues 2025 month 1",
                "type": "hoa_month",
                "categoryId": "hoaDues",
                "amount": 460000,
            }],
        }),
    )
    .await;

    let statement = statements
        .build(&admin, &config, "1C", 2025, date("2025-03-15"))
        .await
        .unwrap();

    // Jan, Feb, Mar charges visible; one payment row
    let charges: Vec<_> = statement
        .rows
        .iter()
        .filter(|row| row.kind == RowKind::Charge)
        .collect();
    assert_eq!(charges.len(), 3);
    assert_eq!(statement.total_charges, Centavos::new(1380000));
    assert_eq!(statement.total_payments, Centavos::new(460000));
    // Outstanding Feb + Mar
    assert_eq!(statement.final_balance, Centavos::new(920000));

    // Charge on 2025-01-01 precedes the payment on 2025-01-05
    assert_eq!(statement.rows[0].kind, RowKind::Charge);
    assert_eq!(statement.rows[0].date, date("2025-01-01"));
    assert_eq!(statement.rows[1].kind, RowKind::Payment);
    assert_eq!(statement.rows[1].running_balance, Centavos::ZERO);

    // Running balance is cumulative and ends at the final balance
    let last = statement.rows.last().unwrap();
    assert_eq!(last.running_balance, statement.final_balance);
}

#[tokio::test]
async fn test_statement_charge_sorts_before_same_day_payment() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    seed_doc(
        &store,
        "clients/MTC/units/1C",
        json!({ "unitNumber": "1C", "scheduledDuesAmount": 460000 }),
    )
    .await;
    let (statements, dues) = services(&store);
    let config = monthly_client();
    let admin = Principal::super_admin("ops");

    dues.ensure_year(&config, "1C", 2025).await.unwrap();
    dues.record_payment(
        &config,
        "1C",
        2025,
        vec![SlotFill { month: 1, amount: Centavos::new(460000) }],
        "2025-01-01_090000_000",
        date("2025-01-01"),
        None,
        None,
    )
    .await
    .unwrap();
    seed_doc(
        &store,
        "clients/MTC/transactions/2025-01-01_090000_000",
        json!({
            "date": "2025-01-01",
            "amount": 460000,
            "categoryId": "-split-",
            "unitId": "1C",
            "allocations": [{
                "targetId": "2025:01",
                "targetName": "HOA dues 2025 month 1",
                "type": "hoa_month",
                "categoryId": "hoaDues",
                "amount": 460000,
            }],
        }),
    )
    .await;

    let statement = statements
        .build(&admin, &config, "1C", 2025, date("2025-01-01"))
        .await
        .unwrap();
    assert_eq!(statement.rows.len(), 2);
    assert_eq!(statement.rows[0].kind, RowKind::Charge);
    assert_eq!(statement.rows[1].kind, RowKind::Payment);
    assert_eq!(statement.final_balance, Centavos::ZERO);
}

#[tokio::test]
async fn test_budget_vs_actual_variance_signs() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let config = monthly_client();
    let admin = Principal::super_admin("ops");

    seed_doc(
        &store,
        "clients/MTC/categories/hoaIncome",
        json!({ "name": "HOA Dues Income", "type": "income" }),
    )
    .await;
    seed_doc(
        &store,
        "clients/MTC/categories/maintenance",
        json!({ "name": "Maintenance", "type": "expense" }),
    )
    .await;
    seed_doc(
        &store,
        "clients/MTC/budgets/2025-hoaIncome",
        json!({ "categoryId": "hoaIncome", "fiscalYear": 2025, "annualAmount": 5520000 }),
    )
    .await;
    seed_doc(
        &store,
        "clients/MTC/budgets/2025-maintenance",
        json!({ "categoryId": "maintenance", "fiscalYear": 2025, "annualAmount": 1200000 }),
    )
    .await;

    seed_doc(
        &store,
        "clients/MTC/transactions/2025-03-01_100000_000",
        json!({ "date": "2025-03-01", "amount": 3000000, "categoryId": "hoaIncome" }),
    )
    .await;
    seed_doc(
        &store,
        "clients/MTC/transactions/2025-04-01_100000_000",
        json!({ "date": "2025-04-01", "amount": -800000, "categoryId": "maintenance" }),
    )
    .await;

    // Exactly half the fiscal year elapsed
    let tz = calendar::default_offset();
    let (start, end) = calendar::fiscal_year_bounds(2025, 1, tz).unwrap();
    let midpoint = start + (end - start) / 2;

    let report = BudgetReportService::new(store.clone())
        .build(&admin, &config, 2025, midpoint)
        .await
        .unwrap();

    let income = &report.income[0];
    assert_eq!(income.category_id, "hoaIncome");
    assert_eq!(income.kind, CategoryKind::Income);
    assert_eq!(income.ytd_budget, Centavos::new(2760000));
    assert_eq!(income.actual, Centavos::new(3000000));
    assert_eq!(income.variance, Centavos::new(240000));

    let expense = &report.expense[0];
    assert_eq!(expense.category_id, "maintenance");
    assert_eq!(expense.ytd_budget, Centavos::new(600000));
    assert_eq!(expense.actual, Centavos::new(-800000));
    assert_eq!(expense.variance, Centavos::new(-200000));
}

#[tokio::test]
async fn test_budget_split_allocations_count_per_category() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let config = monthly_client();
    let admin = Principal::super_admin("ops");

    seed_doc(
        &store,
        "clients/MTC/categories/maintenance",
        json!({ "name": "Maintenance", "type": "expense" }),
    )
    .await;
    seed_doc(
        &store,
        "clients/MTC/categories/utilities",
        json!({ "name": "Utilities", "type": "expense" }),
    )
    .await;
    seed_doc(
        &store,
        "clients/MTC/transactions/2025-02-10_120000_000",
        json!({
            "date": "2025-02-10",
            "amount": -50000,
            "categoryId": "-split-",
            "allocations": [
                { "targetId": "m", "targetName": "Maintenance", "type": "other",
                  "categoryId": "maintenance", "amount": -30000 },
                { "targetId": "u", "targetName": "Utilities", "type": "other",
                  "categoryId": "utilities", "amount": -20000 },
            ],
        }),
    )
    .await;

    let tz = calendar::default_offset();
    let (start, end) = calendar::fiscal_year_bounds(2025, 1, tz).unwrap();
    let report = BudgetReportService::new(store.clone())
        .build(&admin, &config, 2025, start + (end - start) / 2)
        .await
        .unwrap();

    let by_id: std::collections::HashMap<_, _> = report
        .expense
        .iter()
        .map(|line| (line.category_id.as_str(), line.actual))
        .collect();
    assert_eq!(by_id["maintenance"], Centavos::new(-30000));
    assert_eq!(by_id["utilities"], Centavos::new(-20000));
}

#[tokio::test]
async fn test_special_assessments_report_separately() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let config = monthly_client();
    let admin = Principal::super_admin("ops");

    seed_doc(
        &store,
        "clients/MTC/categories/special_assessments",
        json!({ "name": "Special Assessments", "type": "income" }),
    )
    .await;
    seed_doc(
        &store,
        "clients/MTC/categories/projectsRoof",
        json!({ "name": "Roof Project", "type": "expense" }),
    )
    .await;
    seed_doc(
        &store,
        "clients/MTC/transactions/2025-02-01_100000_000",
        json!({ "date": "2025-02-01", "amount": 900000, "categoryId": "special_assessments" }),
    )
    .await;
    seed_doc(
        &store,
        "clients/MTC/transactions/2025-03-01_100000_000",
        json!({ "date": "2025-03-01", "amount": -350000, "categoryId": "projectsRoof" }),
    )
    .await;

    let tz = calendar::default_offset();
    let (_, end) = calendar::fiscal_year_bounds(2025, 1, tz).unwrap();
    let report = BudgetReportService::new(store.clone())
        .build(&admin, &config, 2025, end)
        .await
        .unwrap();

    assert!(report.income.is_empty());
    assert!(report.expense.is_empty());
    assert_eq!(report.special.collections.len(), 1);
    assert_eq!(report.special.expenditures.len(), 1);
    assert_eq!(report.special.net_fund_balance, Centavos::new(550000));
}
