//! Vector store abstraction.
//!
//! The [`VectorStore`] trait defines every persistence operation the
//! ingestion and retrieval pipeline needs, enabling pluggable backends
//! (SQLite in the app crate, in-memory here).
//!
//! Every backend must make [`upsert_document`](VectorStore::upsert_document)
//! and [`remove`](VectorStore::remove) atomic with respect to readers: a
//! concurrent [`query`](VectorStore::query) observes either the complete
//! old chunk set of a document or the complete new one.

pub mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::embedding::Metric;
use crate::error::{Error, Result};
use crate::models::{Chunk, DocumentSummary, ScoredChunk};

/// Abstract chunk storage scoped by knowledge base.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](VectorStore::upsert_document) | Replace all chunks of a document |
/// | [`query`](VectorStore::query) | k-nearest chunks within one knowledge base |
/// | [`remove`](VectorStore::remove) | Delete all chunks of a document |
/// | [`count_chunks`](VectorStore::count_chunks) | Number of chunks in a knowledge base |
/// | [`list_documents`](VectorStore::list_documents) | Documents of a knowledge base |
/// | [`document_chunks`](VectorStore::document_chunks) | Chunks of one document in order |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Vector dimension fixed at schema creation.
    fn dims(&self) -> usize;

    /// Similarity metric fixed at schema creation.
    fn metric(&self) -> Metric;

    /// Atomically replace every chunk of `(knowledge_base_id, filename)`.
    async fn upsert_document(
        &self,
        knowledge_base_id: &str,
        filename: &str,
        chunks: &[Chunk],
    ) -> Result<()>;

    /// Return at most `k` chunks of `knowledge_base_id` nearest to
    /// `vector`, ordered by [`rank`].
    async fn query(
        &self,
        knowledge_base_id: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Delete every chunk of the document, returning how many were
    /// removed. Fails with [`Error::NotFound`] if there were none.
    async fn remove(&self, knowledge_base_id: &str, filename: &str) -> Result<usize>;

    async fn count_chunks(&self, knowledge_base_id: &str) -> Result<usize>;

    /// Documents in the knowledge base, sorted by filename.
    async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>>;

    /// Chunks of one document in index order (empty if absent).
    async fn document_chunks(&self, knowledge_base_id: &str, filename: &str)
        -> Result<Vec<Chunk>>;
}

/// Deterministic result order: score descending, then chunk index
/// ascending, then filename ascending. A NaN score ranks last.
pub fn compare_scored(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    a.score
        .is_nan()
        .cmp(&b.score.is_nan())
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.chunk.index.cmp(&b.chunk.index))
        .then_with(|| a.filename.cmp(&b.filename))
}

/// Sort candidates by [`compare_scored`] and keep the best `k`.
pub fn rank(mut candidates: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(compare_scored);
    candidates.truncate(k);
    candidates
}

/// Validate a chunk set before it is written: indices contiguous from 0
/// and every vector of the store's dimension.
pub fn validate_chunks(chunks: &[Chunk], dims: usize) -> Result<()> {
    for (position, chunk) in chunks.iter().enumerate() {
        if chunk.index != position as i64 {
            return Err(Error::VectorStoreFailure(format!(
                "chunk indices must be contiguous from 0: found {} at position {}",
                chunk.index, position
            )));
        }
        if chunk.vector.len() != dims {
            return Err(Error::VectorStoreFailure(format!(
                "chunk {} has a {}-dimensional vector, store expects {}",
                chunk.index,
                chunk.vector.len(),
                dims
            )));
        }
    }
    Ok(())
}

/// Validate a query vector against the store's dimension.
pub fn validate_query(vector: &[f32], dims: usize) -> Result<()> {
    if vector.len() != dims {
        return Err(Error::VectorStoreFailure(format!(
            "query vector has {} dimensions, store expects {}",
            vector.len(),
            dims
        )));
    }
    Ok(())
}
