//! Credit balance ledger
//!
//! A credit balance is a prepayment held against a unit, consumable by
//! future payments. One document per unit at
//! `clients/{c}/units/{u}/creditBalances/current` carries the balance and
//! an ordered history of deltas, each referencing the transaction that
//! caused it. The balance never goes negative.
//!
//! Mutations happen only inside the store transaction of the originating
//! payment: callers pass their transaction handle to `apply_in`, so a
//! payment and its credit movement commit or abort together.

use doc_store::{server_timestamp, DocPath, SharedStore, Store, StoreError, Tx};
use fiscal_core::Centavos;
use platform_contracts::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from the credit ledger
#[derive(Debug, Error)]
pub enum CreditError {
    #[error("credit balance for unit {unit_id} would go negative: balance {balance} + delta {delta}")]
    NegativeBalance {
        unit_id: String,
        balance: Centavos,
        delta: Centavos,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("credit balance document malformed: {0}")]
    Malformed(String),
}

impl CreditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CreditError::NegativeBalance { .. } => ErrorKind::Integrity,
            CreditError::Malformed(_) => ErrorKind::Integrity,
            CreditError::Store(err) if err.is_transient() => ErrorKind::Transient,
            CreditError::Store(_) => ErrorKind::Integrity,
        }
    }
}

pub type CreditResult<T> = Result<T, CreditError>;

/// One credit movement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditHistoryEntry {
    /// Commit instant, server-assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    pub delta: Centavos,
    pub new_balance: Centavos,
    pub transaction_id: String,
    pub reason: String,
}

/// The persisted per-unit ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
    pub balance: Centavos,
    #[serde(default)]
    pub history: Vec<CreditHistoryEntry>,
}

/// Path of a unit's credit balance document.
///
/// The per-unit subcollection layout is the only one this system reads or
/// writes; the historical one-document-per-client layout is never mixed in.
pub fn credit_doc(client_id: &str, unit_id: &str) -> Result<DocPath, StoreError> {
    DocPath::parse(format!(
        "clients/{client_id}/units/{unit_id}/creditBalances/current"
    ))
}

/// Read and mutate per-unit credit balances
#[derive(Clone)]
pub struct CreditBalanceService {
    store: SharedStore,
}

impl CreditBalanceService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Current ledger for a unit; a unit with no document has zero credit
    pub async fn get(&self, client_id: &str, unit_id: &str) -> CreditResult<CreditBalance> {
        let path = credit_doc(client_id, unit_id)?;
        match self.store.get(&path).await? {
            Some(doc) => serde_json::from_value(doc.data)
                .map_err(|err| CreditError::Malformed(err.to_string())),
            None => Ok(CreditBalance::default()),
        }
    }

    /// Non-transactional balance read for previews and UI
    pub async fn preview(&self, client_id: &str, unit_id: &str) -> CreditResult<Centavos> {
        Ok(self.get(client_id, unit_id).await?.balance)
    }

    /// Stage a credit movement inside the caller's store transaction.
    ///
    /// Reads the current ledger through the transaction handle (so the
    /// commit carries a version precondition on it), rejects a negative
    /// result, appends history, and stages the new document. Returns the
    /// balance after the delta.
    pub async fn apply_in(
        tx: &mut Tx,
        client_id: &str,
        unit_id: &str,
        delta: Centavos,
        transaction_id: &str,
        reason: &str,
    ) -> CreditResult<Centavos> {
        let path = credit_doc(client_id, unit_id)?;
        let mut ledger = match tx.get(&path).await? {
            Some(doc) => serde_json::from_value::<CreditBalance>(doc.data)
                .map_err(|err| CreditError::Malformed(err.to_string()))?,
            None => CreditBalance::default(),
        };

        let new_balance = ledger.balance + delta;
        if new_balance.is_negative() {
            return Err(CreditError::NegativeBalance {
                unit_id: unit_id.to_string(),
                balance: ledger.balance,
                delta,
            });
        }

        ledger.history.push(CreditHistoryEntry {
            timestamp: Some(server_timestamp()),
            delta,
            new_balance,
            transaction_id: transaction_id.to_string(),
            reason: reason.to_string(),
        });
        ledger.balance = new_balance;

        let payload = serde_json::to_value(&ledger)
            .map_err(|err| CreditError::Malformed(err.to_string()))?;
        tx.set(&path, payload);

        tracing::debug!(
            client_id = %client_id,
            unit_id = %unit_id,
            delta = delta.raw(),
            new_balance = new_balance.raw(),
            "credit movement staged"
        );
        Ok(new_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_store::{run_transaction, MemoryStore};
    use std::sync::Arc;

    fn service() -> (CreditBalanceService, SharedStore) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        (CreditBalanceService::new(store.clone()), store)
    }

    async fn apply(
        store: &SharedStore,
        unit_id: &str,
        delta: i64,
        txn_id: &str,
        reason: &str,
    ) -> CreditResult<Centavos> {
        run_transaction(store, |tx| {
            let unit_id = unit_id.to_string();
            let txn_id = txn_id.to_string();
            let reason = reason.to_string();
            Box::pin(async move {
                CreditBalanceService::apply_in(
                    tx,
                    "AVII",
                    &unit_id,
                    Centavos::new(delta),
                    &txn_id,
                    &reason,
                )
                .await
            })
        })
        .await
    }

    #[tokio::test]
    async fn test_missing_ledger_defaults_to_zero() {
        let (service, _) = service();
        let ledger = service.get("AVII", "101").await.unwrap();
        assert_eq!(ledger.balance, Centavos::ZERO);
        assert!(ledger.history.is_empty());
        assert_eq!(service.preview("AVII", "101").await.unwrap(), Centavos::ZERO);
    }

    #[tokio::test]
    async fn test_apply_accumulates_history() {
        let (service, store) = service();
        apply(&store, "1C", 120000, "2025-02-01_120000_000", "credit_added")
            .await
            .unwrap();
        apply(&store, "1C", -46000, "2025-03-01_090000_000", "credit_used")
            .await
            .unwrap();

        let ledger = service.get("AVII", "1C").await.unwrap();
        assert_eq!(ledger.balance, Centavos::new(74000));
        assert_eq!(ledger.history.len(), 2);
        assert_eq!(ledger.history[0].new_balance, Centavos::new(120000));
        assert_eq!(ledger.history[1].delta, Centavos::new(-46000));
        assert_eq!(ledger.history[1].transaction_id, "2025-03-01_090000_000");

        // balance == Σ history deltas from zero
        let replayed: Centavos = ledger.history.iter().map(|entry| entry.delta).sum();
        assert_eq!(replayed, ledger.balance);

        // server timestamps resolved at commit
        assert!(ledger.history[0].timestamp.as_ref().unwrap().is_string());
    }

    #[tokio::test]
    async fn test_negative_balance_rejected_and_nothing_commits() {
        let (service, store) = service();
        apply(&store, "1C", 50000, "t-1", "credit_added").await.unwrap();

        let err = apply(&store, "1C", -60000, "t-2", "credit_used").await.unwrap_err();
        assert!(matches!(err, CreditError::NegativeBalance { .. }));
        assert_eq!(err.kind(), ErrorKind::Integrity);

        let ledger = service.get("AVII", "1C").await.unwrap();
        assert_eq!(ledger.balance, Centavos::new(50000));
        assert_eq!(ledger.history.len(), 1);
    }

    #[tokio::test]
    async fn test_draining_to_exactly_zero_is_allowed() {
        let (service, store) = service();
        apply(&store, "101", 70887, "t-1", "credit_added").await.unwrap();
        let balance = apply(&store, "101", -70887, "t-2", "credit_used").await.unwrap();
        assert_eq!(balance, Centavos::ZERO);
        assert_eq!(service.get("AVII", "101").await.unwrap().balance, Centavos::ZERO);
    }
}
