//! Vector Store Adapter (C1): pooled, schema-managed access to the
//! `documents` table backed by Postgres + pgvector.
//!
//! Grounded on the teacher's `memory::SqliteMemoryStore` for the pool +
//! trait-free-inherent-methods shape, and on the pack's pgvector/sqlx usage
//! (vector similarity search via the `<=>` cosine-distance operator, values
//! bound as `pgvector::Vector`).

use crate::config::StoreConfig;
use crate::error::{Result, StorageError, WhereSpaceError};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::Serialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One row to be inserted for a document chunk
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub chunk_index: i32,
    pub content: String,
    pub content_preview: String,
    pub embedding: Vec<f32>,
}

/// A search hit (§4.1)
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub chunk_index: i32,
    pub content_preview: String,
    pub content: String,
    pub file_size: i64,
    pub similarity: f32,
}

/// One row per distinct `file_path` (§4.1 `list_documents`)
#[derive(Debug, Clone, Serialize)]
pub struct DocSummary {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub modified_time: f64,
    pub chunk_count: i64,
}

/// Metadata describing a document, shared by every one of its chunks (I1)
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub modified_time: f64,
}

const MAX_INSERT_BATCH: usize = 1_000;
const RETRY_ATTEMPTS: u32 = 3;

/// Classify a raw sqlx error into a `StorageError` variant, distinguishing
/// connection loss (retryable, §4.1) from query/constraint failures (not).
fn classify_sqlx_error(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageError::ConnectionFailed(e.to_string()),
        sqlx::Error::Database(db_err)
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation() =>
        {
            StorageError::Constraint(e.to_string())
        }
        _ => StorageError::QueryFailed(e.to_string()),
    }
}

/// Pooled Postgres + pgvector adapter, owned for the process lifetime
pub struct VectorStoreAdapter {
    pool: PgPool,
    embedding_dim: usize,
}

impl VectorStoreAdapter {
    /// Connect and size the pool per `StoreConfig` (min/max, §5)
    pub async fn connect(config: &StoreConfig, embedding_dim: usize) -> Result<Self> {
        info!(
            "connecting to vector store at {}:{} (pool {}..{})",
            config.db_host, config.db_port, config.pool_min, config.pool_max
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.pool_min)
            .max_connections(config.pool_max)
            .connect(&config.connection_string())
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool, embedding_dim })
    }

    /// Scoped acquisition of a pooled connection; the connection is released
    /// when `PoolConnection` is dropped at the end of this call regardless of
    /// whether `f` succeeded (§4.1 `with_connection`)
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(
            &'c mut sqlx::PgConnection,
        ) -> futures::future::BoxFuture<'c, Result<T>>,
    {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        f(&mut conn).await
    }

    /// Idempotently ensure the extension, table, and indexes exist (§4.1
    /// `init_schema`). If an existing table has a different embedding
    /// dimension the table is dropped and recreated; callers must pass
    /// `allow_schema_reset = true` or this returns `SchemaMismatch`.
    pub async fn init_schema(&self, allow_schema_reset: bool) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let existing_dim: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT atttypmod
            FROM pg_attribute
            JOIN pg_class ON pg_class.oid = pg_attribute.attrelid
            WHERE pg_class.relname = 'documents' AND pg_attribute.attname = 'embedding'
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if let Some(dim) = existing_dim {
            if dim as usize != self.embedding_dim {
                if !allow_schema_reset {
                    return Err(WhereSpaceError::SchemaMismatch(format!(
                        "existing table has embedding dimension {}, configured {}",
                        dim, self.embedding_dim
                    )));
                }
                warn!(
                    "embedding dimension changed ({} -> {}); dropping and recreating `documents` (data loss)",
                    dim, self.embedding_dim
                );
                sqlx::query("DROP TABLE IF EXISTS documents")
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
            }
        }

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id BIGSERIAL PRIMARY KEY,
                file_path TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                content_preview TEXT NOT NULL,
                chunk_content TEXT NOT NULL,
                file_size BIGINT NOT NULL,
                modified_time DOUBLE PRECISION NOT NULL,
                embedding VECTOR({}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (file_path, chunk_index)
            )
            "#,
            self.embedding_dim
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS documents_file_path_idx ON documents (file_path)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let chunk_count = self.count_chunks().await.unwrap_or(0);
        let lists = Self::ann_lists_for(chunk_count as u64);
        sqlx::query(&format!(
            r#"
            CREATE INDEX IF NOT EXISTS documents_embedding_ann_idx ON documents
            USING ivfflat (embedding vector_cosine_ops) WITH (lists = {})
            "#,
            lists
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Table-driven `lists` selection (§4.1)
    fn ann_lists_for(chunk_count: u64) -> u64 {
        if chunk_count <= 1_000 {
            50
        } else if chunk_count <= 10_000 {
            100
        } else if chunk_count <= 50_000 {
            (chunk_count as f64).sqrt().ceil() as u64
        } else {
            1_000
        }
    }

    /// Manual re-tune of the ANN index's `lists` parameter; not automatic
    pub async fn reindex(&self) -> Result<()> {
        let chunk_count = self.count_chunks().await?;
        let lists = Self::ann_lists_for(chunk_count as u64);
        info!("reindexing documents_embedding_ann_idx with lists={}", lists);
        sqlx::query("DROP INDEX IF EXISTS documents_embedding_ann_idx")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        sqlx::query(&format!(
            r#"
            CREATE INDEX documents_embedding_ann_idx ON documents
            USING ivfflat (embedding vector_cosine_ops) WITH (lists = {})
            "#,
            lists
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Delete all rows for `file_path` then insert `rows`, in one
    /// transaction, in pages of <= 1,000 (I4)
    pub async fn replace_document_chunks(
        &self,
        file_path: &str,
        meta: &DocumentMeta,
        rows: Vec<ChunkRow>,
    ) -> Result<()> {
        if rows.iter().any(|r| r.embedding.len() != self.embedding_dim) {
            return Err(WhereSpaceError::SchemaMismatch(
                "chunk embedding dimension does not match configured dimension".to_string(),
            ));
        }

        self.with_retry(|| async {
            let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;

            sqlx::query("DELETE FROM documents WHERE file_path = $1")
                .bind(file_path)
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx_error)?;

            for page in rows.chunks(MAX_INSERT_BATCH) {
                for row in page {
                    sqlx::query(
                        r#"
                        INSERT INTO documents
                            (file_path, chunk_index, file_name, file_type, content_preview,
                             chunk_content, file_size, modified_time, embedding, created_at)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
                        "#,
                    )
                    .bind(file_path)
                    .bind(row.chunk_index)
                    .bind(&meta.file_name)
                    .bind(&meta.file_type)
                    .bind(&row.content_preview)
                    .bind(&row.content)
                    .bind(meta.file_size)
                    .bind(meta.modified_time)
                    .bind(Vector::from(row.embedding.clone()))
                    .execute(&mut *tx)
                    .await
                    .map_err(classify_sqlx_error)?;
                }
            }

            tx.commit().await.map_err(classify_sqlx_error)?;
            Ok(())
        })
        .await
    }

    /// Vector similarity search, ordered by ascending cosine distance (§4.1)
    pub async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        min_similarity: f32,
        file_type_filter: Option<&str>,
    ) -> Result<Vec<Hit>> {
        let query_vector = Vector::from(embedding.to_vec());

        let rows: Vec<PgRow> = if let Some(file_type) = file_type_filter {
            sqlx::query(
                r#"
                SELECT file_path, file_name, file_type, chunk_index, content_preview,
                       chunk_content, file_size, 1 - (embedding <=> $1) AS similarity
                FROM documents
                WHERE file_type = $2 AND 1 - (embedding <=> $1) >= $3
                ORDER BY embedding <=> $1
                LIMIT $4
                "#,
            )
            .bind(&query_vector)
            .bind(file_type)
            .bind(min_similarity)
            .bind(top_k as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT file_path, file_name, file_type, chunk_index, content_preview,
                       chunk_content, file_size, 1 - (embedding <=> $1) AS similarity
                FROM documents
                WHERE 1 - (embedding <=> $1) >= $2
                ORDER BY embedding <=> $1
                LIMIT $3
                "#,
            )
            .bind(&query_vector)
            .bind(min_similarity)
            .bind(top_k as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| Hit {
                file_path: row.get("file_path"),
                file_name: row.get("file_name"),
                file_type: row.get("file_type"),
                chunk_index: row.get("chunk_index"),
                content_preview: row.get("content_preview"),
                content: row.get("chunk_content"),
                file_size: row.get("file_size"),
                similarity: row.get::<f64, _>("similarity") as f32,
            })
            .collect())
    }

    /// One row per distinct `file_path` (§4.1)
    pub async fn list_documents(&self) -> Result<Vec<DocSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT file_path, file_name, file_type, file_size, modified_time, COUNT(*) AS chunk_count
            FROM documents
            GROUP BY file_path, file_name, file_type, file_size, modified_time
            ORDER BY file_path
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| DocSummary {
                file_path: row.get("file_path"),
                file_name: row.get("file_name"),
                file_type: row.get("file_type"),
                file_size: row.get("file_size"),
                modified_time: row.get("modified_time"),
                chunk_count: row.get("chunk_count"),
            })
            .collect())
    }

    /// Single-statement delete; returns deleted row count
    pub async fn delete_document(&self, file_path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE file_path = $1")
            .bind(file_path)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Delete all rows; returns deleted row count
    pub async fn flush_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected())
    }

    pub async fn count_chunks(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(count)
    }

    pub async fn count_documents(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT file_path) FROM documents")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(count)
    }

    /// Look up the persisted `(file_size, modified_time)` for a document, used
    /// by the ingestion coordinator's `skip_existing` check (P6)
    pub async fn existing_meta(&self, file_path: &str) -> Result<Option<(i64, f64)>> {
        let row = sqlx::query(
            "SELECT file_size, modified_time FROM documents WHERE file_path = $1 LIMIT 1",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.map(|r| (r.get("file_size"), r.get("modified_time"))))
    }

    /// Bounded exponential backoff retry for transient connection loss (§4.1)
    async fn with_retry<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_millis(200);
        let mut last_err = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < RETRY_ATTEMPTS => {
                    warn!("transient storage error on attempt {attempt}: {e}; retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| WhereSpaceError::Internal("retry loop exhausted".into())))
    }
}

/// Creation timestamp helper used by tests that assert on row shape
#[allow(dead_code)]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ann_lists_table() {
        assert_eq!(VectorStoreAdapter::ann_lists_for(500), 50);
        assert_eq!(VectorStoreAdapter::ann_lists_for(1_000), 50);
        assert_eq!(VectorStoreAdapter::ann_lists_for(5_000), 100);
        assert_eq!(VectorStoreAdapter::ann_lists_for(10_000), 100);
        assert_eq!(VectorStoreAdapter::ann_lists_for(40_000), 200);
        assert_eq!(VectorStoreAdapter::ann_lists_for(200_000), 1_000);
    }
}
