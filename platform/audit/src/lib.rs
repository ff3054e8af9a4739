//! # Audit
//!
//! Append-only audit trail for mutating operations.
//!
//! Every mutating operation writes one record describing who did what to
//! which document. Read-only operations do not log. Audit writes are
//! best-effort for ordinary operations (a failed audit write is logged and
//! the primary operation stands) but fatal for purge and import, where an
//! unaccounted mutation is worse than a halted run.

use chrono::{DateTime, Utc};
use doc_store::{server_timestamp, DocPath, SharedStore, Store, StoreError, Tx};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Errors writing or reading audit records
#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("audit entry invalid: {0}")]
    Invalid(String),
}

pub type AuditResult<T> = Result<T, AuditError>;

/// One audit record, as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Originating module (e.g. "transactions", "waterbills")
    pub module: String,
    /// Action verb (e.g. "create", "delete", "purge")
    pub action: String,
    /// Collection or document the action applied under
    pub parent_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Resolved to the store's commit instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AuditEntry {
    pub fn new(
        module: impl Into<String>,
        action: impl Into<String>,
        parent_path: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            parent_path: parent_path.into(),
            doc_id: None,
            user_id: user_id.into(),
            friendly_name: None,
            notes: None,
            metadata: None,
            timestamp: None,
        }
    }

    pub fn doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Writes audit records under `clients/{clientId}/auditLog`
#[derive(Clone)]
pub struct AuditLogger {
    store: SharedStore,
}

impl AuditLogger {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn entry_path(client_id: &str) -> AuditResult<DocPath> {
        let id = Uuid::new_v4().simple().to_string();
        Ok(DocPath::parse(format!("clients/{client_id}/auditLog/{id}"))?)
    }

    fn entry_payload(entry: &AuditEntry) -> AuditResult<Value> {
        let mut payload = serde_json::to_value(entry)
            .map_err(|err| AuditError::Invalid(err.to_string()))?;
        payload["timestamp"] = server_timestamp();
        Ok(payload)
    }

    /// Append one record; failures are the caller's problem.
    ///
    /// Purge and import use this: an audit failure aborts the run.
    pub async fn record(&self, client_id: &str, entry: AuditEntry) -> AuditResult<()> {
        let path = Self::entry_path(client_id)?;
        self.store.create(&path, Self::entry_payload(&entry)?).await?;
        Ok(())
    }

    /// Append one record, logging and swallowing failures.
    ///
    /// Ordinary mutating operations use this: the primary write stands even
    /// when the audit write does not.
    pub async fn record_best_effort(&self, client_id: &str, entry: AuditEntry) {
        let action = entry.action.clone();
        let module = entry.module.clone();
        if let Err(err) = self.record(client_id, entry).await {
            tracing::warn!(
                client_id = %client_id,
                module = %module,
                action = %action,
                error = %err,
                "audit write failed; primary operation unaffected"
            );
        }
    }

    /// Stage one record inside the caller's store transaction so the audit
    /// row commits atomically with the mutation it describes.
    pub fn record_in(&self, tx: &mut Tx, client_id: &str, entry: AuditEntry) -> AuditResult<()> {
        let path = Self::entry_path(client_id)?;
        tx.create(&path, Self::entry_payload(&entry)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_store::{CollectionPath, MemoryStore};
    use std::sync::Arc;

    fn logger_and_store() -> (AuditLogger, SharedStore) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        (AuditLogger::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_record_appends_under_audit_log() {
        let (logger, store) = logger_and_store();
        logger
            .record(
                "AVII",
                AuditEntry::new("transactions", "create", "clients/AVII/transactions", "u-1")
                    .doc_id("2026-01-01_120000_000")
                    .friendly_name("Water payment unit 101"),
            )
            .await
            .unwrap();

        let entries = store
            .list_docs(&CollectionPath::parse("clients/AVII/auditLog").unwrap())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);

        let doc = store.get(&entries[0]).await.unwrap().unwrap();
        assert_eq!(doc.data["module"], "transactions");
        assert_eq!(doc.data["action"], "create");
        assert_eq!(doc.data["docId"], "2026-01-01_120000_000");
        // Sentinel resolved to a concrete instant at commit
        assert!(doc.data["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_entries_never_overwrite() {
        let (logger, store) = logger_and_store();
        for n in 0..5 {
            logger
                .record(
                    "AVII",
                    AuditEntry::new("dues", "recordPayment", "clients/AVII/units/101/dues", "u-1")
                        .notes(format!("payment {n}")),
                )
                .await
                .unwrap();
        }
        let entries = store
            .list_docs(&CollectionPath::parse("clients/AVII/auditLog").unwrap())
            .await
            .unwrap();
        assert_eq!(entries.len(), 5);
    }
}
