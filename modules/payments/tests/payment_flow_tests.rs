//! End-to-end payment distribution flows over the in-memory store

use audit::AuditLogger;
use chrono::NaiveDate;
use credit_rs::CreditBalanceService;
use doc_store::{DocPath, MemoryStore, SharedStore, Store};
use dues_rs::DuesService;
use fiscal_core::{calendar, Centavos, IdGenerator};
use payments_rs::{PaymentError, PaymentService};
use security::Principal;
use serde_json::json;
use std::sync::Arc;
use tenants::{ClientConfig, DuesFrequency};
use transactions_rs::AllocationType;
use waterbills_rs::{water_config_doc, BillStatus, WaterBillService, WaterReadings, WaterReadingsService};

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

fn quarterly_client() -> ClientConfig {
    ClientConfig {
        client_id: "AVII".into(),
        display_name: "Apartamentos Villas".into(),
        fiscal_year_start_month: 7,
        display_currency: "MXN".into(),
        dues_frequency: DuesFrequency::Quarterly,
        dues_grace_days: 10,
        timezone_offset_hours: -5,
    }
}

struct Harness {
    store: SharedStore,
    payments: PaymentService,
    credit: CreditBalanceService,
    dues: DuesService,
    bills: WaterBillService,
    readings: WaterReadingsService,
    admin: Principal,
}

fn harness() -> Harness {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let audit = AuditLogger::new(store.clone());
    let ids = Arc::new(IdGenerator::new(calendar::default_offset()));
    Harness {
        payments: PaymentService::new(store.clone(), audit.clone(), ids),
        credit: CreditBalanceService::new(store.clone()),
        dues: DuesService::new(store.clone(), audit.clone()),
        bills: WaterBillService::new(store.clone(), audit.clone()),
        readings: WaterReadingsService::new(store.clone(), audit),
        store,
        admin: Principal::super_admin("ops"),
    }
}

async fn seed_unit(store: &SharedStore, client_id: &str, unit_id: &str, scheduled: i64) {
    store
        .set(
            &DocPath::parse(format!("clients/{client_id}/units/{unit_id}")).unwrap(),
            json!({ "unitNumber": unit_id, "scheduledDuesAmount": scheduled }),
        )
        .await
        .unwrap();
}

async fn seed_water(harness: &Harness) {
    harness
        .store
        .set(
            &water_config_doc("AVII").unwrap(),
            json!({
                "ratePerM3": 5000,
                "minimumCharge": 0,
                "penaltyRate": "0.05",
                "penaltyDays": 10,
                "compoundPenalty": true,
                "dueDay": 10,
            }),
        )
        .await
        .unwrap();

    for (year, month, value) in [(2025, 11, 1749), (2026, 0, 1767), (2026, 1, 1774), (2026, 2, 1780)] {
        harness
            .readings
            .upsert(
                "AVII",
                year,
                month,
                WaterReadings {
                    readings: [("101".to_string(), value)].into_iter().collect(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    // Generated before the due date, so no penalties yet
    harness
        .bills
        .generate(&quarterly_client(), 2026, 1, date("2025-07-01"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_hoa_payment_with_credit_rollover() {
    let harness = harness();
    let config = monthly_client();
    seed_unit(&harness.store, "MTC", "1C", 460000).await;

    // The owner is paying dues through March; the remainder is credit
    let recorded = harness
        .payments
        .commit(
            &harness.admin,
            &config,
            "1C",
            Centavos::new(1500000),
            date("2025-02-01"),
            None,
            Some((2025, 3)),
            None,
            Some("transfer"),
            None,
        )
        .await
        .unwrap();

    // Three full months then credit; id carries the payment date
    assert!(recorded.transaction_id.starts_with("2025-02-01_"));
    let plan = &recorded.plan;
    assert_eq!(plan.applied_to_bills, Centavos::new(1380000));
    assert_eq!(plan.credit_added, Centavos::new(120000));
    assert_eq!(plan.new_credit_balance, Centavos::new(120000));

    let record = harness.dues.get_year("MTC", "1C", 2025).await.unwrap().unwrap();
    assert_eq!(record.total_paid, Centavos::new(1380000));
    for month in 1..=3 {
        let slot = record.slot(month).unwrap();
        assert!(slot.paid, "month {month} should be paid");
        assert_eq!(slot.transaction_id.as_deref(), Some(recorded.transaction_id.as_str()));
    }
    assert!(!record.slot(4).unwrap().paid);

    let balance = harness.credit.get("MTC", "1C").await.unwrap();
    assert_eq!(balance.balance, Centavos::new(120000));
    assert_eq!(balance.history.len(), 1);
    assert_eq!(balance.history[0].reason, "credit_added");
}

#[tokio::test]
async fn test_next_payment_consumes_rolled_credit() {
    let harness = harness();
    let config = monthly_client();
    seed_unit(&harness.store, "MTC", "1C", 460000).await;

    harness
        .payments
        .commit(
            &harness.admin, &config, "1C",
            Centavos::new(1500000), date("2025-02-01"),
            None, Some((2025, 3)), None, None, None,
        )
        .await
        .unwrap();

    // 3400.00 + 1200.00 credit covers exactly one more month
    let second = harness
        .payments
        .commit(
            &harness.admin, &config, "1C",
            Centavos::new(340000), date("2025-04-01"),
            None, None, None, None, None,
        )
        .await
        .unwrap();

    assert_eq!(second.plan.credit_used, Centavos::new(120000));
    assert_eq!(second.plan.credit_added, Centavos::ZERO);
    assert_eq!(second.plan.new_credit_balance, Centavos::ZERO);

    let record = harness.dues.get_year("MTC", "1C", 2025).await.unwrap().unwrap();
    assert!(record.slot(4).unwrap().paid);
    assert_eq!(harness.credit.get("MTC", "1C").await.unwrap().balance, Centavos::ZERO);
}

#[tokio::test]
async fn test_water_payment_distributes_penalty_first() {
    let harness = harness();
    let config = quarterly_client();
    seed_unit(&harness.store, "AVII", "101", 0).await;
    seed_water(&harness).await;

    // Two months past dueDate + penaltyDays (2025-07-20)
    let today = date("2025-09-20");
    let preview = harness
        .payments
        .preview(&harness.admin, &config, "101", Centavos::new(100000), today, None, None)
        .await
        .unwrap();

    assert_eq!(preview.applied_to_penalties, Centavos::new(15887));
    assert_eq!(preview.applied_to_bills, Centavos::new(84113));
    assert_eq!(preview.unpaid_remaining, Centavos::new(70887));

    let recorded = harness
        .payments
        .commit(
            &harness.admin, &config, "101",
            Centavos::new(100000), today,
            None, None, Some(&preview.signature), None, None,
        )
        .await
        .unwrap();

    let txn_alloc_kinds: Vec<AllocationType> = {
        let path = DocPath::parse(format!(
            "clients/AVII/transactions/{}",
            recorded.transaction_id
        ))
        .unwrap();
        let doc = harness.store.get(&path).await.unwrap().unwrap();
        let txn: transactions_rs::Transaction = serde_json::from_value(doc.data).unwrap();
        assert_eq!(txn.amount, Centavos::new(100000));
        txn.allocations().iter().map(|a| a.kind).collect()
    };
    assert_eq!(
        txn_alloc_kinds,
        vec![AllocationType::WaterPenalty, AllocationType::WaterConsumption]
    );

    let bill = harness.bills.get("AVII", "2026-Q1").await.unwrap();
    let unit = &bill.bills.units["101"];
    assert_eq!(unit.penalty_amount, Centavos::new(15887));
    assert_eq!(unit.paid_amount, Centavos::new(100000));
    assert_eq!(unit.penalty_paid, Centavos::new(15887));
    assert_eq!(unit.status, BillStatus::Unpaid);
    assert_eq!(unit.outstanding(), Centavos::new(70887));
}

#[tokio::test]
async fn test_stale_preview_is_rejected() {
    let harness = harness();
    let config = quarterly_client();
    seed_unit(&harness.store, "AVII", "101", 0).await;
    seed_water(&harness).await;
    let today = date("2025-09-20");

    let preview = harness
        .payments
        .preview(&harness.admin, &config, "101", Centavos::new(100000), today, None, None)
        .await
        .unwrap();

    // Someone else pays in between
    harness
        .payments
        .commit(
            &harness.admin, &config, "101",
            Centavos::new(50000), today,
            None, None, None, None, None,
        )
        .await
        .unwrap();

    let err = harness
        .payments
        .commit(
            &harness.admin, &config, "101",
            Centavos::new(100000), today,
            None, None, Some(&preview.signature), None, None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Stale));
}

#[tokio::test]
async fn test_reversal_restores_ledgers_and_deletes_transaction() {
    let harness = harness();
    let config = quarterly_client();
    seed_unit(&harness.store, "AVII", "101", 0).await;
    seed_water(&harness).await;
    let today = date("2025-09-20");

    let recorded = harness
        .payments
        .commit(
            &harness.admin, &config, "101",
            Centavos::new(200000), today,
            None, None, None, None, None,
        )
        .await
        .unwrap();
    // 170887 settles the bill, 29113 rolls to credit
    assert_eq!(recorded.plan.credit_added, Centavos::new(29113));
    let bill = harness.bills.get("AVII", "2026-Q1").await.unwrap();
    assert_eq!(bill.bills.units["101"].status, BillStatus::Paid);

    harness
        .payments
        .reverse(&harness.admin, &config, &recorded.transaction_id)
        .await
        .unwrap();

    let bill = harness.bills.get("AVII", "2026-Q1").await.unwrap();
    let unit = &bill.bills.units["101"];
    assert_eq!(unit.paid_amount, Centavos::ZERO);
    assert_eq!(unit.status, BillStatus::Unpaid);
    // Penalty stays: reversal clears payments, not accrual
    assert_eq!(unit.penalty_amount, Centavos::new(15887));
    assert!(unit.payments.is_empty());

    assert_eq!(harness.credit.get("AVII", "101").await.unwrap().balance, Centavos::ZERO);

    let txn_path = DocPath::parse(format!(
        "clients/AVII/transactions/{}",
        recorded.transaction_id
    ))
    .unwrap();
    assert!(harness.store.get(&txn_path).await.unwrap().is_none());
}

#[tokio::test]
async fn test_backdated_preview_recomputes_penalty_in_memory() {
    let harness = harness();
    let config = quarterly_client();
    seed_unit(&harness.store, "AVII", "101", 0).await;
    seed_water(&harness).await;

    // Live date is two months late, but the owner is settling as of one
    // month late
    let today = date("2025-09-20");
    let backdated = date("2025-08-20");
    let preview = harness
        .payments
        .preview(
            &harness.admin, &config, "101",
            Centavos::new(200000), today,
            Some(backdated), None,
        )
        .await
        .unwrap();

    // One month of 5% on 155000
    assert_eq!(preview.applied_to_penalties, Centavos::new(7750));
    assert_eq!(preview.applied_to_bills, Centavos::new(155000));

    // The stored bill was not touched by the backdated preview
    let bill = harness.bills.get("AVII", "2026-Q1").await.unwrap();
    assert_eq!(bill.bills.units["101"].penalty_amount, Centavos::ZERO);
}

#[tokio::test]
async fn test_zero_amount_with_no_obligations_is_rejected() {
    let harness = harness();
    let config = monthly_client();
    seed_unit(&harness.store, "MTC", "1C", 0).await;

    let err = harness
        .payments
        .commit(
            &harness.admin, &config, "1C",
            Centavos::ZERO, date("2025-02-01"),
            None, None, None, None, None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InsufficientObligations { .. }));
}

#[tokio::test]
async fn test_pure_credit_payment_when_nothing_is_open() {
    let harness = harness();
    let config = monthly_client();
    seed_unit(&harness.store, "MTC", "1C", 0).await;

    let recorded = harness
        .payments
        .commit(
            &harness.admin, &config, "1C",
            Centavos::new(250000), date("2025-02-01"),
            None, None, None, None, None,
        )
        .await
        .unwrap();
    assert_eq!(recorded.plan.credit_added, Centavos::new(250000));
    assert_eq!(
        harness.credit.get("MTC", "1C").await.unwrap().balance,
        Centavos::new(250000)
    );
}
