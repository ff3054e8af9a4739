//! Recursive client purge
//!
//! A depth-first walk over `list_collections`/`list_docs`: children delete
//! before their parents, excluded collections survive the data pass and
//! purge as a terminal step, and ghost documents (subcollections without a
//! parent document) are detected along the way. Dry-run is the default;
//! nothing mutates without `execute`.

use crate::progress::{CancelFlag, PhaseCounter};
use crate::{ImportError, ImportResult};
use audit::{AuditEntry, AuditLogger};
use doc_store::{DocPath, SharedStore, Store};
use security::Principal;
use serde::{Deserialize, Serialize};
use tenants::client_doc;

#[derive(Debug, Clone)]
pub struct PurgeOptions {
    /// Mutate instead of counting
    pub execute: bool,
    /// Top-level collection ids kept during the data pass and purged last
    pub exclude: Vec<String>,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            execute: false,
            exclude: vec!["importMetadata".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSummary {
    pub scanned: usize,
    pub deleted: usize,
    pub ghost_docs: usize,
    pub dry_run: bool,
}

/// Deletes one client association and everything under it
pub struct PurgeOrchestrator {
    store: SharedStore,
    audit: AuditLogger,
}

impl PurgeOrchestrator {
    pub fn new(store: SharedStore, audit: AuditLogger) -> Self {
        Self { store, audit }
    }

    pub async fn purge(
        &self,
        principal: &Principal,
        client_id: &str,
        options: &PurgeOptions,
        cancel: &CancelFlag,
    ) -> ImportResult<PurgeSummary> {
        security::ensure_admin(principal, client_id)?;
        let root = client_doc(client_id)?;
        let mut summary = PurgeSummary {
            dry_run: !options.execute,
            ..Default::default()
        };
        let mut counter = PhaseCounter::new("purge", None);

        // Data pass: everything except the excluded collections
        let mut deferred = Vec::new();
        for collection in self.store.list_collections(&root).await? {
            if options.exclude.iter().any(|name| name == collection.id()) {
                deferred.push(collection);
                continue;
            }
            self.purge_collection(&root, collection.id(), options, cancel, &mut summary, &mut counter)
                .await?;
        }

        // Terminal step: the excluded collections themselves
        for collection in deferred {
            self.purge_collection(&root, collection.id(), options, cancel, &mut summary, &mut counter)
                .await?;
        }

        // Finally the client document
        if self.store.get(&root).await?.is_some() {
            summary.scanned += 1;
            if options.execute {
                self.store.delete(&root).await?;
                summary.deleted += 1;
            }
        }

        // Audit failures abort the purge: this record is the only trace
        // left of what was removed
        self.audit
            .record(
                client_id,
                AuditEntry::new("importctl", "purge", root.as_str(), &principal.user_id)
                    .notes(if options.execute { "executed" } else { "dry run" })
                    .metadata(serde_json::to_value(&summary).unwrap_or_default()),
            )
            .await?;

        tracing::info!(
            client_id = %client_id,
            scanned = summary.scanned,
            deleted = summary.deleted,
            ghost_docs = summary.ghost_docs,
            dry_run = summary.dry_run,
            "purge complete"
        );
        Ok(summary)
    }

    /// Depth-first removal of one collection under `parent`
    async fn purge_collection(
        &self,
        parent: &DocPath,
        collection_id: &str,
        options: &PurgeOptions,
        cancel: &CancelFlag,
        summary: &mut PurgeSummary,
        counter: &mut PhaseCounter,
    ) -> ImportResult<()> {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }
        let collection = parent.collection(collection_id)?;
        for doc_path in self.store.list_docs(&collection).await? {
            // Children first
            for subcollection in self.store.list_collections(&doc_path).await? {
                Box::pin(self.purge_collection(
                    &doc_path,
                    subcollection.id(),
                    options,
                    cancel,
                    summary,
                    counter,
                ))
                .await?;
            }

            summary.scanned += 1;
            match self.store.get(&doc_path).await? {
                Some(_) => {
                    if options.execute {
                        self.store.delete(&doc_path).await?;
                        summary.deleted += 1;
                    }
                    counter.success();
                }
                None => {
                    // Ghost: nothing to delete once its children are gone
                    summary.ghost_docs += 1;
                    counter.success();
                }
            }
        }
        Ok(())
    }
}
