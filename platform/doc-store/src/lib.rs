//! # Document Store Port
//!
//! A platform-level abstraction over the hierarchical document store.
//!
//! ## Why This Lives in Tier 1
//!
//! Every module persists through the same store capability, so the port is a
//! shared platform crate:
//! - Modules depend on `Arc<dyn Store>` and never on a concrete backend
//! - Config-driven swap between Postgres (production) and InMemory (dev/test)
//! - Atomicity is one primitive: `commit` applies version preconditions and
//!   staged writes together, or not at all
//!
//! ## Implementations
//!
//! - **PgStore**: production backend over a Postgres JSONB documents table
//! - **MemoryStore**: test/dev backend over an in-process ordered map
//!
//! Documents are addressed by slash-separated paths with alternating
//! collection and document segments (`clients/AVII/units/101/dues/2026`).
//! Sibling documents form a collection; a document may own subcollections.
//! A path can have descendants without the document itself existing, a
//! "ghost" document, an artifact the purge tooling detects and removes.

mod memory;
mod path;
mod pg;
mod query;
mod txn;

pub use memory::MemoryStore;
pub use path::{CollectionPath, DocPath};
pub use pg::{init_pool, PgStore};
pub use query::{Direction, Filter, Op, Query};
pub use txn::{run_transaction, Tx};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the store port
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document already exists: {0}")]
    AlreadyExists(String),

    #[error("transaction conflict: concurrent modification")]
    Conflict,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid document payload: {0}")]
    InvalidDocument(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether a retry of the surrounding transaction can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict | StoreError::Timeout(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A document snapshot read from the store
#[derive(Debug, Clone)]
pub struct Document {
    pub path: DocPath,
    pub data: Value,
    /// Monotonic per-document version, bumped on every write
    pub version: i64,
    pub update_time: DateTime<Utc>,
}

/// A version precondition checked atomically at commit.
///
/// `expected = None` asserts the document was absent when read.
#[derive(Debug, Clone)]
pub struct Precondition {
    pub path: DocPath,
    pub expected: Option<i64>,
}

/// A staged mutation applied atomically at commit
#[derive(Debug, Clone)]
pub enum Write {
    /// Create or replace the document
    Set { path: DocPath, data: Value },
    /// Write-if-absent; fails the commit with `AlreadyExists`
    Create { path: DocPath, data: Value },
    /// Shallow top-level field merge; fails the commit with `NotFound`
    Update { path: DocPath, fields: serde_json::Map<String, Value> },
    Delete { path: DocPath },
}

impl Write {
    pub fn path(&self) -> &DocPath {
        match self {
            Write::Set { path, .. }
            | Write::Create { path, .. }
            | Write::Update { path, .. }
            | Write::Delete { path } => path,
        }
    }
}

const SERVER_TIMESTAMP_KEY: &str = "__serverTimestamp";

/// Sentinel value replaced with the store's commit instant (RFC 3339)
pub fn server_timestamp() -> Value {
    serde_json::json!({ SERVER_TIMESTAMP_KEY: true })
}

/// Replace server-timestamp sentinels anywhere in `value` with `now`
pub(crate) fn resolve_server_timestamps(value: &mut Value, now: DateTime<Utc>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 && map.contains_key(SERVER_TIMESTAMP_KEY) {
                *value = Value::String(now.to_rfc3339());
                return;
            }
            for field in map.values_mut() {
                resolve_server_timestamps(field, now);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                resolve_server_timestamps(item, now);
            }
        }
        _ => {}
    }
}

/// Core document-store abstraction.
///
/// All persistence in the system goes through this trait; business crates
/// receive it as `SharedStore` via their constructors.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read one document
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>>;

    /// Paths of a collection's direct children, ordered by id. Includes
    /// ghost documents: ids that exist only as ancestors of deeper paths.
    async fn list_docs(&self, collection: &CollectionPath) -> StoreResult<Vec<DocPath>>;

    /// Subcollections under a document, including those of ghost documents
    async fn list_collections(&self, parent: &DocPath) -> StoreResult<Vec<CollectionPath>>;

    /// Filtered read over one collection
    async fn query(&self, collection: &CollectionPath, query: Query) -> StoreResult<Vec<Document>>;

    /// Atomically verify preconditions and apply writes
    async fn commit(&self, preconditions: Vec<Precondition>, writes: Vec<Write>) -> StoreResult<()>;

    /// Create or replace a single document outside a transaction
    async fn set(&self, path: &DocPath, data: Value) -> StoreResult<()> {
        self.commit(
            Vec::new(),
            vec![Write::Set { path: path.clone(), data }],
        )
        .await
    }

    /// Write-if-absent for a single document
    async fn create(&self, path: &DocPath, data: Value) -> StoreResult<()> {
        self.commit(
            Vec::new(),
            vec![Write::Create { path: path.clone(), data }],
        )
        .await
    }

    /// Shallow-merge fields into a single document
    async fn update(
        &self,
        path: &DocPath,
        fields: serde_json::Map<String, Value>,
    ) -> StoreResult<()> {
        self.commit(
            Vec::new(),
            vec![Write::Update { path: path.clone(), fields }],
        )
        .await
    }

    /// Delete a single document
    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        self.commit(Vec::new(), vec![Write::Delete { path: path.clone() }])
            .await
    }
}

/// How store handles are passed between components
pub type SharedStore = Arc<dyn Store>;
