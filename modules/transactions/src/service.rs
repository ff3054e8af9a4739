//! Transaction service
//!
//! Creation assigns a sortable document id via the kernel generator and
//! relies on the store's write-if-absent create for cross-process
//! uniqueness: an id collision is not an error, it is a retry.

use crate::models::{Transaction, TransactionDraft};
use crate::validation::{validate_draft, ValidationError};
use audit::{AuditEntry, AuditLogger};
use chrono::NaiveDate;
use doc_store::{
    run_transaction, server_timestamp, CollectionPath, Direction, DocPath, Op, Query, SharedStore,
    Store, StoreError,
};
use fiscal_core::{calendar, IdGenerator};
use platform_contracts::ErrorKind;
use security::{AccessError, Principal};
use serde_json::json;
use std::sync::Arc;
use tenants::ClientConfig;
use thiserror::Error;

/// How many fresh ids to try when the store reports the id taken
const CREATE_ID_ATTEMPTS: usize = 5;

/// Errors from the transaction engine
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("transaction {0} carries payment allocations; delete it through the payments reversal path")]
    ProtectedAllocations(String),

    #[error("could not allocate a unique transaction id after {0} attempts")]
    IdExhausted(usize),
}

impl TransactionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransactionError::Validation(_) => ErrorKind::InvalidInput,
            TransactionError::Access(_) => ErrorKind::Forbidden,
            TransactionError::NotFound(_) => ErrorKind::NotFound,
            TransactionError::ProtectedAllocations(_) => ErrorKind::InvalidInput,
            TransactionError::IdExhausted(_) => ErrorKind::Conflict,
            TransactionError::Store(err) if err.is_transient() => ErrorKind::Transient,
            TransactionError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            TransactionError::Store(_) => ErrorKind::Integrity,
        }
    }
}

pub type TransactionResult<T> = Result<T, TransactionError>;

/// Optional list filters; the boundary layer turns fiscal years into civil
/// date ranges before calling in
#[derive(Debug, Clone, Default)]
pub struct TransactionFilters {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub unit_id: Option<String>,
    pub category_id: Option<String>,
    pub account_id: Option<String>,
    pub limit: Option<usize>,
}

/// Create/read/list/delete over the transactions collection
#[derive(Clone)]
pub struct TransactionService {
    store: SharedStore,
    audit: AuditLogger,
    ids: Arc<IdGenerator>,
}

pub fn transactions_collection(client_id: &str) -> Result<CollectionPath, StoreError> {
    CollectionPath::parse(format!("clients/{client_id}/transactions"))
}

pub fn transaction_doc(client_id: &str, txn_id: &str) -> Result<DocPath, StoreError> {
    DocPath::parse(format!("clients/{client_id}/transactions/{txn_id}"))
}

impl TransactionService {
    pub fn new(store: SharedStore, audit: AuditLogger, ids: Arc<IdGenerator>) -> Self {
        Self { store, audit, ids }
    }

    /// Validate, assign an id, and persist one transaction.
    ///
    /// The id carries the transaction's civil date with the current
    /// time-of-day, so ids sort chronologically and stay aligned with the
    /// ledger date. On an id collision (same process or another) the create
    /// retries with a fresh suffix.
    pub async fn create(
        &self,
        principal: &Principal,
        config: &ClientConfig,
        draft: TransactionDraft,
    ) -> TransactionResult<String> {
        security::ensure_client_access(principal, &config.client_id)?;
        validate_draft(&draft)?;

        let tz = config.timezone();
        let date = calendar::parse_civil_date(&draft.date)
            .map_err(|_| ValidationError::InvalidDate(draft.date.clone()))?;
        let midnight = calendar::civil_midnight(date, tz);

        let client_id = config.client_id.as_str();
        let mut last_err = None;
        for _ in 0..CREATE_ID_ATTEMPTS {
            let id = self.ids.transaction_id(Some(midnight + issued_time_of_day(tz)));
            let path = transaction_doc(client_id, &id)?;
            let txn = draft.clone().into_transaction(id.clone());
            let mut payload = serde_json::to_value(&txn)
                .map_err(|err| StoreError::InvalidDocument(err.to_string()))?;
            payload["createdAt"] = server_timestamp();

            match self.store.create(&path, payload).await {
                Ok(()) => {
                    tracing::info!(
                        client_id = %client_id,
                        txn_id = %id,
                        amount = txn.amount.raw(),
                        category_id = %txn.category_id,
                        "transaction created"
                    );
                    self.audit
                        .record_best_effort(
                            client_id,
                            AuditEntry::new(
                                "transactions",
                                "create",
                                transactions_collection(client_id)?.as_str(),
                                &principal.user_id,
                            )
                            .doc_id(&id)
                            .metadata(json!({ "amount": txn.amount, "categoryId": txn.category_id })),
                        )
                        .await;
                    return Ok(id);
                }
                Err(StoreError::AlreadyExists(_)) => {
                    last_err = Some(StoreError::AlreadyExists(path.as_str().to_string()));
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::error!(
            client_id = %client_id,
            error = ?last_err,
            "transaction id space exhausted"
        );
        Err(TransactionError::IdExhausted(CREATE_ID_ATTEMPTS))
    }

    pub async fn get(
        &self,
        principal: &Principal,
        client_id: &str,
        txn_id: &str,
    ) -> TransactionResult<Transaction> {
        security::ensure_client_access(principal, client_id)?;
        let path = transaction_doc(client_id, txn_id)?;
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| TransactionError::NotFound(txn_id.to_string()))?;
        let mut txn: Transaction = serde_json::from_value(doc.data)
            .map_err(|err| StoreError::InvalidDocument(err.to_string()))?;
        txn.id = txn_id.to_string();
        Ok(txn)
    }

    /// List transactions, newest filters first narrowed in the store query,
    /// ordered chronologically by document id.
    pub async fn list(
        &self,
        principal: &Principal,
        client_id: &str,
        filters: TransactionFilters,
    ) -> TransactionResult<Vec<Transaction>> {
        security::ensure_client_access(principal, client_id)?;
        let collection = transactions_collection(client_id)?;

        let mut query = Query::new().order_by("date", Direction::Asc);
        if let Some(from) = filters.date_from {
            query = query.filter("date", Op::Ge, json!(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = filters.date_to {
            query = query.filter("date", Op::Le, json!(to.format("%Y-%m-%d").to_string()));
        }
        if let Some(unit_id) = &filters.unit_id {
            query = query.filter("unitId", Op::Eq, json!(unit_id));
        }
        if let Some(category_id) = &filters.category_id {
            query = query.filter("categoryId", Op::Eq, json!(category_id));
        }
        if let Some(account_id) = &filters.account_id {
            query = query.filter("accountId", Op::Eq, json!(account_id));
        }
        if let Some(limit) = filters.limit {
            query = query.limit(limit);
        }

        let docs = self.store.query(&collection, query).await?;
        let mut transactions = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.path.id().to_string();
            let mut txn: Transaction = serde_json::from_value(doc.data)
                .map_err(|err| StoreError::InvalidDocument(err.to_string()))?;
            txn.id = id;
            transactions.push(txn);
        }
        // Document ids are the chronological tiebreaker within a date
        transactions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(transactions)
    }

    /// Admin-only delete of a non-payment transaction.
    ///
    /// Transactions whose allocations touch dues, water bills, or credit
    /// are refused here; the payments module deletes those together with
    /// their compensating reversals.
    pub async fn delete(
        &self,
        principal: &Principal,
        client_id: &str,
        txn_id: &str,
    ) -> TransactionResult<()> {
        security::ensure_admin(principal, client_id)?;
        let txn = self.get(principal, client_id, txn_id).await?;
        if txn.has_payment_allocations() {
            return Err(TransactionError::ProtectedAllocations(txn_id.to_string()));
        }

        let path = transaction_doc(client_id, txn_id)?;
        let audit = self.audit.clone();
        let user_id = principal.user_id.clone();
        run_transaction(&self.store, |tx| {
            let path = path.clone();
            let audit = audit.clone();
            let user_id = user_id.clone();
            let client_id = client_id.to_string();
            let txn_id = txn_id.to_string();
            Box::pin(async move {
                if tx.get(&path).await?.is_none() {
                    return Err(StoreError::NotFound(path.as_str().to_string()));
                }
                tx.delete(&path);
                audit
                    .record_in(
                        tx,
                        &client_id,
                        AuditEntry::new(
                            "transactions",
                            "delete",
                            transactions_collection(&client_id)?.as_str(),
                            &user_id,
                        )
                        .doc_id(&txn_id),
                    )
                    .map_err(|err| match err {
                        audit::AuditError::Store(store_err) => store_err,
                        other => StoreError::InvalidDocument(other.to_string()),
                    })?;
                Ok(())
            })
        })
        .await
        .map_err(|err| match err {
            StoreError::NotFound(_) => TransactionError::NotFound(txn_id.to_string()),
            other => other.into(),
        })?;

        tracing::info!(client_id = %client_id, txn_id = %txn_id, "transaction deleted");
        Ok(())
    }
}

/// Time-of-day component mixed into ids for same-day ordering
fn issued_time_of_day(tz: chrono::FixedOffset) -> chrono::Duration {
    let now = chrono::Utc::now().with_timezone(&tz);
    now.time() - chrono::NaiveTime::MIN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Allocation, AllocationType, SPLIT_CATEGORY};
    use doc_store::MemoryStore;
    use fiscal_core::Centavos;
    use security::Role;
    use tenants::DuesFrequency;

    fn test_config() -> ClientConfig {
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

    fn service() -> (TransactionService, SharedStore) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let audit = AuditLogger::new(store.clone());
        let ids = Arc::new(IdGenerator::new(calendar::default_offset()));
        (TransactionService::new(store.clone(), audit, ids), store)
    }

    fn expense_draft() -> TransactionDraft {
        TransactionDraft {
            date: "2025-02-01".into(),
            amount: Centavos::new(-50000),
            category_id: "maintenance".into(),
            category_name: Some("Maintenance".into()),
            allocations: None,
            payment_method: Some("check".into()),
            account_id: Some("bank-001".into()),
            vendor_id: Some("v-12".into()),
            unit_id: None,
            notes: None,
            pay_seq: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_dated_sortable_id() {
        let (service, _) = service();
        let admin = Principal::super_admin("ops");
        let id = service
            .create(&admin, &test_config(), expense_draft())
            .await
            .unwrap();
        // YYYY-MM-DD_HHMMSS_nnn with the ledger date as the prefix
        assert_eq!(&id[..11], "2025-02-01_");
        assert_eq!(id.len(), "2025-02-01_123045_678".len());

        let fetched = service.get(&admin, "AVII", &id).await.unwrap();
        assert_eq!(fetched.amount, Centavos::new(-50000));
        assert_eq!(fetched.category_id, "maintenance");
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn test_create_rejects_unbalanced_split() {
        let (service, _) = service();
        let admin = Principal::super_admin("ops");
        let mut draft = expense_draft();
        draft.category_id = SPLIT_CATEGORY.into();
        draft.allocations = Some(vec![Allocation {
            target_id: "maintenance".into(),
            target_name: "Maintenance".into(),
            kind: AllocationType::Other,
            category_id: "maintenance".into(),
            amount: Centavos::new(-30000),
            metadata: None,
        }]);
        let err = service.create(&admin, &test_config(), draft).await.unwrap_err();
        assert!(matches!(err, TransactionError::Validation(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_list_filters_by_unit_and_date() {
        let (service, _) = service();
        let admin = Principal::super_admin("ops");
        let config = test_config();

        for (date, unit) in [
            ("2025-01-15", Some("101")),
            ("2025-02-01", Some("101")),
            ("2025-02-01", Some("102")),
            ("2025-03-10", None),
        ] {
            let mut draft = expense_draft();
            draft.date = date.into();
            draft.unit_id = unit.map(str::to_string);
            service.create(&admin, &config, draft).await.unwrap();
        }

        let filters = TransactionFilters {
            date_from: Some(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()),
            unit_id: Some("101".into()),
            ..Default::default()
        };
        let listed = service.list(&admin, "AVII", filters).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].date, "2025-02-01");
        assert_eq!(listed[0].unit_id.as_deref(), Some("101"));
    }

    #[tokio::test]
    async fn test_delete_requires_admin() {
        let (service, _) = service();
        let admin = Principal::super_admin("ops");
        let config = test_config();
        let id = service.create(&admin, &config, expense_draft()).await.unwrap();

        let manager = Principal::with_role("maria", "AVII", Role::Manager);
        let err = service.delete(&manager, "AVII", &id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        service.delete(&admin, "AVII", &id).await.unwrap();
        assert!(matches!(
            service.get(&admin, "AVII", &id).await,
            Err(TransactionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_refuses_payment_transactions() {
        let (service, _) = service();
        let admin = Principal::super_admin("ops");
        let config = test_config();

        let mut draft = expense_draft();
        draft.amount = Centavos::new(100000);
        draft.category_id = SPLIT_CATEGORY.into();
        draft.unit_id = Some("101".into());
        draft.allocations = Some(vec![
            Allocation {
                target_id: "2026-Q1-penalty".into(),
                target_name: "Water penalty".into(),
                kind: AllocationType::WaterPenalty,
                category_id: "waterPenalties".into(),
                amount: Centavos::new(15887),
                metadata: None,
            },
            Allocation {
                target_id: "2026-Q1".into(),
                target_name: "Water consumption".into(),
                kind: AllocationType::WaterConsumption,
                category_id: "waterConsumption".into(),
                amount: Centavos::new(84113),
                metadata: None,
            },
        ]);
        let id = service.create(&admin, &config, draft).await.unwrap();

        let err = service.delete(&admin, "AVII", &id).await.unwrap_err();
        assert!(matches!(err, TransactionError::ProtectedAllocations(_)));
        // Still present
        assert!(service.get(&admin, "AVII", &id).await.is_ok());
    }

    #[tokio::test]
    async fn test_forbidden_without_property_access() {
        let (service, _) = service();
        let outsider = Principal::with_role("sam", "MTC", Role::Admin);
        let err = service
            .create(&outsider, &test_config(), expense_draft())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}
