//! Postgres implementation of the Store trait
//!
//! Documents live in a single `documents` table keyed by path, with the
//! payload in a JSONB column and a per-row version for optimistic
//! preconditions. Commit checks preconditions under `FOR UPDATE` row locks
//! and applies the staged writes in one SQL transaction.

use crate::{
    resolve_server_timestamps, CollectionPath, DocPath, Document, Op, Precondition, Query, Store,
    StoreError, StoreResult, Write,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Initialize a connection pool to the PostgreSQL database
///
/// # Connection Limits
/// - Production default: 10 connections
/// - Test mode: respects `DB_MAX_CONNECTIONS` env var (recommended: 1-2)
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let max_connections = std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(10);

    let acquire_timeout_secs = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Production store backend over a Postgres documents table
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the documents table and indexes if they do not exist
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                path        TEXT PRIMARY KEY,
                collection  TEXT NOT NULL,
                data        JSONB NOT NULL,
                version     BIGINT NOT NULL,
                updated_at  TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents (collection)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(err.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // unique_violation
            Some("23505") => StoreError::AlreadyExists(db.message().to_string()),
            // serialization_failure / deadlock_detected
            Some("40001") | Some("40P01") => StoreError::Conflict,
            _ => StoreError::Backend(err.to_string()),
        },
        _ => StoreError::Backend(err.to_string()),
    }
}

fn row_to_document(path: DocPath, row: &sqlx::postgres::PgRow) -> Document {
    Document {
        path,
        data: row.get::<Value, _>("data"),
        version: row.get::<i64, _>("version"),
        update_time: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

/// Render one filter as a SQL predicate over the JSONB payload.
///
/// Equality and membership compare as jsonb; range comparisons cast
/// numbers through `numeric` and everything else through text (ISO dates
/// and transaction ids order correctly as text).
fn filter_predicate(field_param: usize, value_param: usize, op: Op, value: &Value) -> String {
    let field = format!("${field_param}::text");
    let value_expr = format!("${value_param}::jsonb");
    match op {
        Op::Eq => format!("data -> {field} = {value_expr}"),
        Op::In => format!("data -> {field} <@ {value_expr}"),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let sql_op = match op {
                Op::Lt => "<",
                Op::Le => "<=",
                Op::Gt => ">",
                Op::Ge => ">=",
                _ => unreachable!(),
            };
            if value.is_number() {
                format!("(data ->> {field})::numeric {sql_op} ({value_expr} #>> '{{}}')::numeric")
            } else {
                format!("data ->> {field} {sql_op} ({value_expr} #>> '{{}}')")
            }
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT data, version, updated_at FROM documents WHERE path = $1")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(|row| row_to_document(path.clone(), &row)))
    }

    async fn list_docs(&self, collection: &CollectionPath) -> StoreResult<Vec<DocPath>> {
        // Direct children, including ghost documents that exist only as
        // ancestors of deeper paths (the purge tooling needs to see them)
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT doc_id FROM (
                SELECT substring(path FROM char_length($1) + 2) AS doc_id
                FROM documents WHERE collection = $1
                UNION
                SELECT split_part(substring(collection FROM char_length($1) + 2), '/', 1)
                FROM documents WHERE collection LIKE $1 || '/%'
            ) ids
            ORDER BY doc_id
            "#,
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|row| collection.doc(&row.get::<String, _>("doc_id")))
            .collect()
    }

    async fn list_collections(&self, parent: &DocPath) -> StoreResult<Vec<CollectionPath>> {
        // Direct subcollections: collection strings one segment below the
        // parent path, including those whose parent document is a ghost
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT collection FROM documents
            WHERE collection LIKE $1 || '/%'
              AND strpos(substring(collection FROM char_length($1) + 2), '/') = 0
            ORDER BY collection
            "#,
        )
        .bind(parent.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|row| CollectionPath::parse(row.get::<String, _>("collection")))
            .collect()
    }

    async fn query(&self, collection: &CollectionPath, query: Query) -> StoreResult<Vec<Document>> {
        let mut sql = String::from("SELECT path, data, version, updated_at FROM documents WHERE collection = $1");
        let mut param = 1usize;
        for filter in &query.filters {
            let field_param = param + 1;
            let value_param = param + 2;
            sql.push_str(" AND ");
            sql.push_str(&filter_predicate(field_param, value_param, filter.op, &filter.value));
            param += 2;
        }
        match &query.order_by {
            Some((field, direction)) => {
                param += 1;
                let dir = match direction {
                    crate::Direction::Asc => "ASC",
                    crate::Direction::Desc => "DESC",
                };
                sql.push_str(&format!(" ORDER BY data ->> ${param}::text {dir}"));
            }
            None => sql.push_str(" ORDER BY path"),
        }
        if query.limit.is_some() {
            param += 1;
            sql.push_str(&format!(" LIMIT ${param}"));
        }

        let mut prepared = sqlx::query(&sql).bind(collection.as_str());
        for filter in &query.filters {
            prepared = prepared.bind(filter.field.clone()).bind(filter.value.clone());
        }
        if let Some((field, _)) = &query.order_by {
            prepared = prepared.bind(field.clone());
        }
        if let Some(limit) = query.limit {
            prepared = prepared.bind(limit as i64);
        }

        let rows = prepared.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
        rows.iter()
            .map(|row| {
                let path = DocPath::parse(row.get::<String, _>("path"))?;
                Ok(row_to_document(path, row))
            })
            .collect()
    }

    async fn commit(&self, preconditions: Vec<Precondition>, writes: Vec<Write>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let now = Utc::now();

        for precondition in &preconditions {
            let row = sqlx::query("SELECT version FROM documents WHERE path = $1 FOR UPDATE")
                .bind(precondition.path.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            let current = row.map(|row| row.get::<i64, _>("version"));
            if current != precondition.expected {
                return Err(StoreError::Conflict);
            }
        }

        for write in writes {
            match write {
                Write::Set { path, mut data } => {
                    resolve_server_timestamps(&mut data, now);
                    sqlx::query(
                        r#"
                        INSERT INTO documents (path, collection, data, version, updated_at)
                        VALUES ($1, $2, $3, 1, $4)
                        ON CONFLICT (path) DO UPDATE
                        SET data = EXCLUDED.data,
                            version = documents.version + 1,
                            updated_at = EXCLUDED.updated_at
                        "#,
                    )
                    .bind(path.as_str())
                    .bind(path.parent_collection().as_str())
                    .bind(&data)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                }
                Write::Create { path, mut data } => {
                    resolve_server_timestamps(&mut data, now);
                    sqlx::query(
                        r#"
                        INSERT INTO documents (path, collection, data, version, updated_at)
                        VALUES ($1, $2, $3, 1, $4)
                        "#,
                    )
                    .bind(path.as_str())
                    .bind(path.parent_collection().as_str())
                    .bind(&data)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(|err| match map_sqlx_error(err) {
                        StoreError::AlreadyExists(_) => {
                            StoreError::AlreadyExists(path.as_str().to_string())
                        }
                        other => other,
                    })?;
                }
                Write::Update { path, fields } => {
                    let mut patch = Value::Object(fields);
                    resolve_server_timestamps(&mut patch, now);
                    let result = sqlx::query(
                        r#"
                        UPDATE documents
                        SET data = data || $2, version = version + 1, updated_at = $3
                        WHERE path = $1
                        "#,
                    )
                    .bind(path.as_str())
                    .bind(&patch)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                    if result.rows_affected() == 0 {
                        return Err(StoreError::NotFound(path.as_str().to_string()));
                    }
                }
                Write::Delete { path } => {
                    sqlx::query("DELETE FROM documents WHERE path = $1")
                        .bind(path.as_str())
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_predicates_render_expected_sql() {
        assert_eq!(
            filter_predicate(2, 3, Op::Eq, &json!("101")),
            "data -> $2::text = $3::jsonb"
        );
        assert_eq!(
            filter_predicate(2, 3, Op::In, &json!(["a", "b"])),
            "data -> $2::text <@ $3::jsonb"
        );
        assert_eq!(
            filter_predicate(4, 5, Op::Ge, &json!(100)),
            "(data ->> $4::text)::numeric >= ($5::jsonb #>> '{}')::numeric"
        );
        assert_eq!(
            filter_predicate(4, 5, Op::Lt, &json!("2026-01-01")),
            "data ->> $4::text < ($5::jsonb #>> '{}')"
        );
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StoreError::Timeout(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
    }
}
