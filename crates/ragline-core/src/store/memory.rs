//! In-memory [`VectorStore`] implementation for tests and embedding.
//!
//! Each document's chunk set is an `Arc<Vec<Chunk>>` swapped under a
//! `std::sync::RwLock`, so a replacement is a single pointer swap and a
//! query holding the read lock sees one consistent generation. Search is
//! brute force over the knowledge base.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::Metric;
use crate::error::{Error, Result};
use crate::models::{Chunk, DocumentSummary, ScoredChunk};

use super::{rank, validate_chunks, validate_query, VectorStore};

type Documents = BTreeMap<String, Arc<Vec<Chunk>>>;

/// In-memory vector store.
pub struct InMemoryStore {
    dims: usize,
    metric: Metric,
    knowledge_bases: RwLock<HashMap<String, Documents>>,
}

impl InMemoryStore {
    pub fn new(dims: usize, metric: Metric) -> Self {
        Self {
            dims,
            metric,
            knowledge_bases: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Documents>>> {
        self.knowledge_bases
            .read()
            .map_err(|_| Error::VectorStoreFailure("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Documents>>> {
        self.knowledge_bases
            .write()
            .map_err(|_| Error::VectorStoreFailure("store lock poisoned".into()))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
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
        let replacement = Arc::new(chunks.to_vec());

        let mut kbs = self.write()?;
        if replacement.is_empty() {
            if let Some(docs) = kbs.get_mut(knowledge_base_id) {
                docs.remove(filename);
            }
        } else {
            kbs.entry(knowledge_base_id.to_string())
                .or_default()
                .insert(filename.to_string(), replacement);
        }
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

        let kbs = self.read()?;
        let Some(docs) = kbs.get(knowledge_base_id) else {
            return Ok(Vec::new());
        };

        let candidates: Vec<ScoredChunk> = docs
            .iter()
            .flat_map(|(filename, chunks)| {
                chunks.iter().map(move |chunk| ScoredChunk {
                    knowledge_base_id: knowledge_base_id.to_string(),
                    filename: filename.clone(),
                    chunk: chunk.clone(),
                    score: self.metric.score(vector, &chunk.vector),
                })
            })
            .collect();

        Ok(rank(candidates, k))
    }

    async fn remove(&self, knowledge_base_id: &str, filename: &str) -> Result<usize> {
        let mut kbs = self.write()?;
        let removed = kbs
            .get_mut(knowledge_base_id)
            .and_then(|docs| docs.remove(filename))
            .map(|chunks| chunks.len())
            .unwrap_or(0);

        if removed == 0 {
            return Err(Error::NotFound(format!(
                "document '{}' in knowledge base '{}'",
                filename, knowledge_base_id
            )));
        }
        Ok(removed)
    }

    async fn count_chunks(&self, knowledge_base_id: &str) -> Result<usize> {
        let kbs = self.read()?;
        Ok(kbs
            .get(knowledge_base_id)
            .map(|docs| docs.values().map(|c| c.len()).sum())
            .unwrap_or(0))
    }

    async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>> {
        let kbs = self.read()?;
        Ok(kbs
            .get(knowledge_base_id)
            .map(|docs| {
                docs.iter()
                    .map(|(filename, chunks)| DocumentSummary {
                        filename: filename.clone(),
                        chunk_count: chunks.len(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn document_chunks(
        &self,
        knowledge_base_id: &str,
        filename: &str,
    ) -> Result<Vec<Chunk>> {
        let kbs = self.read()?;
        Ok(kbs
            .get(knowledge_base_id)
            .and_then(|docs| docs.get(filename))
            .map(|chunks| chunks.as_ref().clone())
            .unwrap_or_default())
    }
}
