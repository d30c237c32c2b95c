//! SQLite-backed [`VectorStore`] implementation.
//!
//! Chunks live in a single `chunks` table keyed by
//! `(knowledge_base_id, filename, chunk_index)` with the embedding stored
//! as a little-endian f32 BLOB. A document replacement runs as one
//! transaction (delete, then insert), and every query is a single
//! statement, so readers never see a half-replaced document.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use ragline_core::embedding::{blob_to_vec, vec_to_blob, Metric};
use ragline_core::models::{Chunk, DocumentSummary, RedactionSpan, ScoredChunk};
use ragline_core::store::{rank, validate_chunks, validate_query, VectorStore};
use ragline_core::{Error, Result};

use crate::migrate;

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
    metric: Metric,
}

impl SqliteStore {
    /// Wrap an already-migrated pool.
    pub fn new(pool: SqlitePool, dims: usize, metric: Metric) -> Self {
        Self { pool, dims, metric }
    }

    /// Create the schema if needed and verify it matches `dims`/`metric`.
    pub async fn open(pool: SqlitePool, dims: usize, metric: Metric) -> anyhow::Result<Self> {
        migrate::run_migrations(&pool, dims, metric).await?;
        Ok(Self::new(pool, dims, metric))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn store_err(e: sqlx::Error) -> Error {
    Error::VectorStoreFailure(e.to_string())
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let blob: Vec<u8> = row.try_get("embedding").map_err(store_err)?;
    let redactions_json: String = row.try_get("redactions_json").map_err(store_err)?;
    let redactions: Vec<RedactionSpan> = serde_json::from_str(&redactions_json)
        .map_err(|e| Error::VectorStoreFailure(format!("corrupt redaction metadata: {}", e)))?;
    let source_start: i64 = row.try_get("source_start").map_err(store_err)?;
    let source_end: i64 = row.try_get("source_end").map_err(store_err)?;

    Ok(Chunk {
        index: row.try_get("chunk_index").map_err(store_err)?,
        text: row.try_get("text").map_err(store_err)?,
        hash: row.try_get("hash").map_err(store_err)?,
        vector: blob_to_vec(&blob),
        source_start: source_start as usize,
        source_end: source_end as usize,
        redactions,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn dims(&self) -> usize {
        self.dims
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    async fn upsert_document(
        &self,
        knowledge_base_id: &str,
        filename: &str,
        chunks: &[Chunk],
    ) -> Result<()> {
        validate_chunks(chunks, self.dims)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query("DELETE FROM chunks WHERE knowledge_base_id = ? AND filename = ?")
            .bind(knowledge_base_id)
            .bind(filename)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        for chunk in chunks {
            let redactions_json = serde_json::to_string(&chunk.redactions)
                .map_err(|e| Error::VectorStoreFailure(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO chunks (knowledge_base_id, filename, chunk_index, text, hash,
                                    embedding, source_start, source_end, redactions_json,
                                    created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(knowledge_base_id)
            .bind(filename)
            .bind(chunk.index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&chunk.vector))
            .bind(chunk.source_start as i64)
            .bind(chunk.source_end as i64)
            .bind(redactions_json)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn query(
        &self,
        knowledge_base_id: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        validate_query(vector, self.dims)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT filename, chunk_index, text, hash, embedding,
                   source_start, source_end, redactions_json
            FROM chunks
            WHERE knowledge_base_id = ?
            "#,
        )
        .bind(knowledge_base_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            let score = self.metric.score(vector, &chunk.vector);
            candidates.push(ScoredChunk {
                knowledge_base_id: knowledge_base_id.to_string(),
                filename: row.try_get("filename").map_err(store_err)?,
                chunk,
                score,
            });
        }

        Ok(rank(candidates, k))
    }

    async fn remove(&self, knowledge_base_id: &str, filename: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE knowledge_base_id = ? AND filename = ?")
            .bind(knowledge_base_id)
            .bind(filename)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "document '{}' in knowledge base '{}'",
                filename, knowledge_base_id
            )));
        }
        Ok(result.rows_affected() as usize)
    }

    async fn count_chunks(&self, knowledge_base_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE knowledge_base_id = ?")
            .bind(knowledge_base_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(count as usize)
    }

    async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT filename, COUNT(*) AS chunk_count
            FROM chunks
            WHERE knowledge_base_id = ?
            GROUP BY filename
            ORDER BY filename ASC
            "#,
        )
        .bind(knowledge_base_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let chunk_count: i64 = row.try_get("chunk_count").map_err(store_err)?;
                Ok(DocumentSummary {
                    filename: row.try_get("filename").map_err(store_err)?,
                    chunk_count: chunk_count as usize,
                })
            })
            .collect()
    }

    async fn document_chunks(
        &self,
        knowledge_base_id: &str,
        filename: &str,
    ) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_index, text, hash, embedding, source_start, source_end, redactions_json
            FROM chunks
            WHERE knowledge_base_id = ? AND filename = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(knowledge_base_id)
        .bind(filename)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(row_to_chunk).collect()
    }
}
