//! Staged-write transactions with optimistic retry
//!
//! A `Tx` records a version precondition for every document it reads and
//! stages writes instead of applying them. `run_transaction` runs the body,
//! commits the stage atomically, and retries the whole body on conflict or
//! timeout with exponential backoff before surfacing the error.

use crate::{Document, DocPath, Precondition, SharedStore, StoreResult, Write};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Retry budget for conflicting or timed-out transaction bodies
const MAX_ATTEMPTS: u32 = 5;

/// Base backoff; doubles per attempt
const BACKOFF_BASE_MS: u64 = 25;

/// A transactional handle: reads record preconditions, writes are staged.
pub struct Tx {
    store: SharedStore,
    preconditions: Vec<Precondition>,
    writes: Vec<Write>,
    read_paths: HashSet<String>,
}

impl Tx {
    fn new(store: SharedStore) -> Self {
        Self {
            store,
            preconditions: Vec::new(),
            writes: Vec::new(),
            read_paths: HashSet::new(),
        }
    }

    /// Transactional read. The first read of each path records its version
    /// as a commit precondition; later reads see writes staged earlier in
    /// this transaction.
    pub async fn get(&mut self, path: &DocPath) -> StoreResult<Option<Document>> {
        let base = self.store.get(path).await?;
        if self.read_paths.insert(path.as_str().to_string()) {
            self.preconditions.push(Precondition {
                path: path.clone(),
                expected: base.as_ref().map(|doc| doc.version),
            });
        }

        // Overlay writes staged by this transaction
        let mut data = base.as_ref().map(|doc| doc.data.clone());
        for write in self.writes.iter().filter(|w| w.path() == path) {
            data = apply_staged(data, write);
        }
        Ok(match (data, base) {
            (Some(data), Some(mut doc)) => {
                doc.data = data;
                Some(doc)
            }
            (Some(data), None) => Some(Document {
                path: path.clone(),
                data,
                version: 0,
                update_time: chrono::Utc::now(),
            }),
            (None, _) => None,
        })
    }

    pub fn set(&mut self, path: &DocPath, data: Value) {
        self.writes.push(Write::Set { path: path.clone(), data });
    }

    pub fn create(&mut self, path: &DocPath, data: Value) {
        self.writes.push(Write::Create { path: path.clone(), data });
    }

    pub fn update(&mut self, path: &DocPath, fields: serde_json::Map<String, Value>) {
        self.writes.push(Write::Update { path: path.clone(), fields });
    }

    pub fn delete(&mut self, path: &DocPath) {
        self.writes.push(Write::Delete { path: path.clone() });
    }

    /// Number of staged writes (import progress accounting)
    pub fn staged_writes(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self) -> StoreResult<()> {
        self.store.commit(self.preconditions, self.writes).await
    }
}

fn apply_staged(base: Option<Value>, write: &Write) -> Option<Value> {
    match write {
        Write::Set { data, .. } | Write::Create { data, .. } => Some(data.clone()),
        Write::Delete { .. } => None,
        Write::Update { fields, .. } => {
            let mut current = base.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(map) = &mut current {
                for (key, value) in fields {
                    map.insert(key.clone(), value.clone());
                }
            }
            Some(current)
        }
    }
}

/// Run `body` inside a store transaction, retrying transient commit
/// failures (conflict, timeout) with exponential backoff.
///
/// The body may run more than once and must not carry side effects outside
/// the transaction handle. The error type is the caller's: domain errors
/// abort the transaction without retrying, store errors convert via `From`.
pub async fn run_transaction<T, E, F>(store: &SharedStore, mut body: F) -> Result<T, E>
where
    E: From<crate::StoreError>,
    F: for<'t> FnMut(&'t mut Tx) -> BoxFuture<'t, Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let mut tx = Tx::new(store.clone());
        match body(&mut tx).await {
            Ok(value) => match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(
                        attempt,
                        error = %err,
                        "transaction commit conflicted, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        BACKOFF_BASE_MS << (attempt - 1),
                    ))
                    .await;
                }
                Err(err) => return Err(err.into()),
            },
            Err(err) => return Err(err),
        }
    }
}
