//! In-memory implementation of the Store trait for testing and development

use crate::{
    query, resolve_server_timestamps, CollectionPath, DocPath, Document, Precondition, Query,
    Store, StoreError, StoreResult, Write,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredDoc {
    data: Value,
    version: i64,
    update_time: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, StoredDoc>,
}

/// Store implementation over an in-process ordered map
///
/// This implementation is suitable for:
/// - Unit and integration tests (no external dependencies)
/// - Local development without Docker
///
/// Commit takes one write guard across precondition checks and mutations,
/// so readers outside a transaction see either the full pre- or full
/// post-state. Document versions bump on every write.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Count of stored documents (test assertions)
    pub async fn len(&self) -> usize {
        self.inner.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.docs.is_empty()
    }
}

fn shallow_merge(base: &mut Value, fields: &serde_json::Map<String, Value>) {
    if let Value::Object(map) = base {
        for (key, value) in fields {
            map.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let inner = self.inner.read().await;
        Ok(inner.docs.get(path.as_str()).map(|stored| Document {
            path: path.clone(),
            data: stored.data.clone(),
            version: stored.version,
            update_time: stored.update_time,
        }))
    }

    async fn list_docs(&self, collection: &CollectionPath) -> StoreResult<Vec<DocPath>> {
        let prefix = format!("{}/", collection.as_str());
        let inner = self.inner.read().await;
        // Direct children, including ghost documents that exist only as
        // ancestors of deeper paths (the purge tooling needs to see them)
        let mut ids = BTreeSet::new();
        for key in inner.docs.range(prefix.clone()..).map(|(k, _)| k) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            if let Some(id) = rest.split('/').next() {
                ids.insert(id.to_string());
            }
        }
        ids.into_iter().map(|id| collection.doc(&id)).collect()
    }

    async fn list_collections(&self, parent: &DocPath) -> StoreResult<Vec<CollectionPath>> {
        let prefix = format!("{}/", parent.as_str());
        let inner = self.inner.read().await;
        let mut names = BTreeSet::new();
        for key in inner.docs.range(prefix.clone()..).map(|(k, _)| k) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            if let Some(name) = rest.split('/').next() {
                names.insert(name.to_string());
            }
        }
        names
            .into_iter()
            .map(|name| parent.collection(&name))
            .collect()
    }

    async fn query(&self, collection: &CollectionPath, query: Query) -> StoreResult<Vec<Document>> {
        let prefix = format!("{}/", collection.as_str());
        let inner = self.inner.read().await;
        let mut matched = Vec::new();
        for (key, stored) in inner.docs.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            if rest.contains('/') {
                continue;
            }
            if query.filters.iter().all(|f| query::matches(&stored.data, f)) {
                matched.push(Document {
                    path: DocPath::parse(key.clone())?,
                    data: stored.data.clone(),
                    version: stored.version,
                    update_time: stored.update_time,
                });
            }
        }

        if let Some((field, direction)) = &query.order_by {
            matched.sort_by(|a, b| {
                let left = query::lookup_field(&a.data, field).unwrap_or(&Value::Null);
                let right = query::lookup_field(&b.data, field).unwrap_or(&Value::Null);
                let ordering =
                    query::compare_values(left, right).unwrap_or(std::cmp::Ordering::Equal);
                match direction {
                    crate::Direction::Asc => ordering,
                    crate::Direction::Desc => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn commit(&self, preconditions: Vec<Precondition>, writes: Vec<Write>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        for precondition in &preconditions {
            let current = inner
                .docs
                .get(precondition.path.as_str())
                .map(|stored| stored.version);
            if current != precondition.expected {
                return Err(StoreError::Conflict);
            }
        }

        // Writes that can fail are validated before anything mutates,
        // tracking existence as earlier writes in the batch would leave it
        let mut staged_presence: std::collections::HashMap<&str, bool> =
            std::collections::HashMap::new();
        for write in &writes {
            let key = write.path().as_str();
            let exists = staged_presence
                .get(key)
                .copied()
                .unwrap_or_else(|| inner.docs.contains_key(key));
            match write {
                Write::Create { .. } if exists => {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                Write::Update { .. } if !exists => {
                    return Err(StoreError::NotFound(key.to_string()));
                }
                Write::Delete { .. } => {
                    staged_presence.insert(key, false);
                }
                _ => {
                    staged_presence.insert(key, true);
                }
            }
        }
        drop(staged_presence);

        for write in writes {
            match write {
                Write::Set { path, mut data } | Write::Create { path, mut data } => {
                    resolve_server_timestamps(&mut data, now);
                    let version = inner
                        .docs
                        .get(path.as_str())
                        .map(|stored| stored.version + 1)
                        .unwrap_or(1);
                    inner.docs.insert(
                        path.as_str().to_string(),
                        StoredDoc { data, version, update_time: now },
                    );
                }
                Write::Update { path, fields } => {
                    let stored = inner
                        .docs
                        .get_mut(path.as_str())
                        .expect("validated above");
                    let mut fields = fields;
                    for value in fields.values_mut() {
                        resolve_server_timestamps(value, now);
                    }
                    shallow_merge(&mut stored.data, &fields);
                    stored.version += 1;
                    stored.update_time = now;
                }
                Write::Delete { path } => {
                    inner.docs.remove(path.as_str());
                }
            }
        }
        Ok(())
    }
}
