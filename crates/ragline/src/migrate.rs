//! Schema creation for the SQLite vector store.
//!
//! The vector dimension and similarity metric are recorded in
//! `store_meta` the first time the schema is created. Reopening the
//! database with a different embedding configuration fails here, at
//! startup, instead of corrupting similarity scores later.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use ragline_core::embedding::Metric;

pub async fn run_migrations(pool: &SqlitePool, dims: usize, metric: Metric) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            knowledge_base_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            source_start INTEGER NOT NULL,
            source_end INTEGER NOT NULL,
            redactions_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            PRIMARY KEY (knowledge_base_id, filename, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_kb ON chunks(knowledge_base_id)")
        .execute(pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES ('dims', ?), ('metric', ?)")
        .bind(dims.to_string())
        .bind(metric.as_str())
        .execute(pool)
        .await?;

    let stored_dims: String =
        sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'dims'")
            .fetch_one(pool)
            .await?;
    let stored_metric: String =
        sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'metric'")
            .fetch_one(pool)
            .await?;

    if stored_dims != dims.to_string() {
        bail!(
            "embedding dimension mismatch: database was created for {} dimensions, configuration says {}",
            stored_dims,
            dims
        );
    }
    if stored_metric != metric.as_str() {
        bail!(
            "similarity metric mismatch: database was created with '{}', configuration says '{}'",
            stored_metric,
            metric
        );
    }

    Ok(())
}
