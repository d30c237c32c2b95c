//! Query-time retrieval: embed the query, then ask the vector store for
//! the nearest chunks of one knowledge base.
//!
//! With `max_chunks_per_document` set, the engine over-fetches
//! `top_k * candidate_multiplier` candidates and keeps at most that many
//! chunks per filename, so one document cannot take every slot.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use ragline_core::embedding::Embedder;
use ragline_core::models::ScoredChunk;
use ragline_core::store::VectorStore;
use ragline_core::Result;

use crate::config::RetrievalConfig;

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
    max_chunks_per_document: Option<usize>,
    candidate_multiplier: usize,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            top_k: config.top_k,
            max_chunks_per_document: config.max_chunks_per_document,
            candidate_multiplier: config.candidate_multiplier.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Up to `top_k` chunks of `knowledge_base_id` ranked by similarity.
    pub async fn retrieve(&self, knowledge_base_id: &str, query: &str) -> Result<Vec<ScoredChunk>> {
        let vector = self.embedder.embed(query).await?;

        let results = match self.max_chunks_per_document {
            None => self.store.query(knowledge_base_id, &vector, self.top_k).await?,
            Some(cap) => {
                let candidates = self
                    .store
                    .query(
                        knowledge_base_id,
                        &vector,
                        self.top_k.saturating_mul(self.candidate_multiplier),
                    )
                    .await?;
                diversify(candidates, cap, self.top_k)
            }
        };

        debug!(
            knowledge_base_id,
            results = results.len(),
            top_k = self.top_k,
            "retrieved chunks"
        );
        Ok(results)
    }
}

/// Keep ranked candidates in order, at most `cap` per filename, then the
/// first `k`.
fn diversify(candidates: Vec<ScoredChunk>, cap: usize, k: usize) -> Vec<ScoredChunk> {
    let mut per_file: HashMap<String, usize> = HashMap::new();
    candidates
        .into_iter()
        .filter(|c| {
            let seen = per_file.entry(c.filename.clone()).or_insert(0);
            *seen += 1;
            *seen <= cap
        })
        .take(k)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragline_core::embedding::Metric;
    use ragline_core::models::Chunk;
    use ragline_core::store::memory::InMemoryStore;

    /// Embeds every query as `[1, 0]`.
    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn chunk(index: i64, vector: Vec<f32>) -> Chunk {
        Chunk {
            index,
            text: format!("chunk {}", index),
            hash: String::new(),
            vector,
            source_start: 0,
            source_end: 0,
            redactions: Vec::new(),
        }
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new(2, Metric::Cosine));
        let big: Vec<Chunk> = (0..5).map(|i| chunk(i, vec![1.0, 0.01 * i as f32])).collect();
        store.upsert_document("kb", "big.txt", &big).await.unwrap();
        store
            .upsert_document("kb", "small.txt", &[chunk(0, vec![0.5, 0.5])])
            .await
            .unwrap();
        store
            .upsert_document("other", "x.txt", &[chunk(0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
    }

    fn config(top_k: usize, cap: Option<usize>) -> RetrievalConfig {
        RetrievalConfig {
            top_k,
            max_chunks_per_document: cap,
            ..RetrievalConfig::default()
        }
    }

    #[tokio::test]
    async fn test_retrieve_respects_top_k_and_scope() {
        let store = seeded_store().await;
        let engine = RetrievalEngine::new(Arc::new(FixedEmbedder), store, &config(3, None));
        let results = engine.retrieve("kb", "anything").await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.knowledge_base_id == "kb"));
        assert!(results.iter().all(|r| r.filename == "big.txt"));
    }

    #[tokio::test]
    async fn test_diversity_cap_limits_one_document() {
        let store = seeded_store().await;
        let engine = RetrievalEngine::new(Arc::new(FixedEmbedder), store, &config(3, Some(2)));
        let results = engine.retrieve("kb", "anything").await.unwrap();
        let from_big = results.iter().filter(|r| r.filename == "big.txt").count();
        assert_eq!(from_big, 2);
        assert!(results.iter().any(|r| r.filename == "small.txt"));
    }

    #[tokio::test]
    async fn test_unknown_knowledge_base_is_empty() {
        let store = seeded_store().await;
        let engine = RetrievalEngine::new(Arc::new(FixedEmbedder), store, &config(3, None));
        assert!(engine.retrieve("nope", "q").await.unwrap().is_empty());
    }
}
