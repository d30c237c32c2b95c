//! Readers racing a document rewrite see either the whole old chunk set
//! or the whole new one, for every vector store backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use ragline::db;
use ragline::sqlite_store::SqliteStore;
use ragline_core::embedding::Metric;
use ragline_core::models::Chunk;
use ragline_core::store::memory::InMemoryStore;
use ragline_core::store::VectorStore;

const REWRITES: usize = 60;
const READERS: usize = 3;

fn version(tag: &str, count: usize) -> Vec<Chunk> {
    (0..count)
        .map(|i| Chunk {
            index: i as i64,
            text: format!("{}-{}", tag, i),
            hash: format!("{}-hash-{}", tag, i),
            vector: vec![1.0, i as f32],
            source_start: i * 10,
            source_end: i * 10 + 5,
            redactions: Vec::new(),
        })
        .collect()
}

/// A snapshot is whole when every text carries one tag and the count
/// matches that version.
fn assert_whole<'a>(texts: impl Iterator<Item = &'a str>) {
    let texts: Vec<&str> = texts.collect();
    let old = texts.iter().all(|t| t.starts_with("old-"));
    let new = texts.iter().all(|t| t.starts_with("new-"));
    match (old, new) {
        (true, _) if texts.len() == 3 => {}
        (_, true) if texts.len() == 2 => {}
        _ => panic!("mixed or partial snapshot: {:?}", texts),
    }
}

async fn check_rewrites_are_atomic(store: Arc<dyn VectorStore>) {
    let old = version("old", 3);
    let new = version("new", 2);
    store.upsert_document("kb", "doc.txt", &old).await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for reader in 0..READERS {
        let store = store.clone();
        let done = done.clone();
        readers.push(tokio::spawn(async move {
            let mut snapshots = 0usize;
            loop {
                let finished = done.load(Ordering::SeqCst);
                if reader % 2 == 0 {
                    let chunks = store.document_chunks("kb", "doc.txt").await.unwrap();
                    assert_whole(chunks.iter().map(|c| c.text.as_str()));
                } else {
                    let hits = store.query("kb", &[1.0, 0.0], 10).await.unwrap();
                    assert_whole(hits.iter().map(|h| h.chunk.text.as_str()));
                }
                snapshots += 1;
                if finished {
                    break;
                }
                tokio::task::yield_now().await;
            }
            snapshots
        }));
    }

    for i in 0..REWRITES {
        let next = if i % 2 == 0 { &new } else { &old };
        store.upsert_document("kb", "doc.txt", next).await.unwrap();
        tokio::task::yield_now().await;
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_store_readers_never_see_partial_rewrite() {
    let store = Arc::new(InMemoryStore::new(2, Metric::Cosine));
    check_rewrites_are_atomic(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_store_readers_never_see_partial_rewrite() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("ragline.sqlite")).await.unwrap();
    let store = Arc::new(SqliteStore::open(pool, 2, Metric::Cosine).await.unwrap());
    check_rewrites_are_atomic(store).await;
}
