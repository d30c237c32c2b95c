//! End-to-end behavior of the service facade with in-process backends:
//! memory object store, in-memory vector store, and deterministic fakes
//! for PII detection, embedding and generation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use ragline::config::{parse_config, Config};
use ragline::formats::ParserRegistry;
use ragline::models::{Generation, JobState, PiiSpan, PromptMessage, QaPair, ReportRequest};
use ragline::{Error, RagService, Result, ServiceParts};
use ragline_core::chunk::{normalize_text, reconstruct};
use ragline_core::embedding::{Embedder, Metric};
use ragline_core::prompt::Generator;
use ragline_core::redact::PiiDetector;
use ragline_core::source::{MemoryObjectStore, ObjectStore};
use ragline_core::store::memory::InMemoryStore;
use ragline_core::store::VectorStore;

const DIMS: usize = 64;
const CHUNK_OVERLAP: usize = 20;

fn test_config(top_k: usize) -> Config {
    let toml = format!(
        r#"
[db]
path = "unused.sqlite"

[store]
backend = "memory"

[object_store]
bucket = "bucket"
key_prefix = "knowledge"

[chunking]
chunk_size = 100
chunk_overlap = {overlap}

[pii]
categories = ["PERSON", "LOCATION"]
threshold = 0.9
max_retries = 0
backoff_base_ms = 1
backoff_max_ms = 1

[embedding]
model = "bag-of-words"
dims = {dims}
max_retries = 0
backoff_base_ms = 1
backoff_max_ms = 1

[generation]
max_retries = 0
backoff_base_ms = 1
backoff_max_ms = 1

[retrieval]
top_k = {top_k}

[jobs]
workers = 2
queue_capacity = 8
"#,
        overlap = CHUNK_OVERLAP,
        dims = DIMS,
        top_k = top_k,
    );
    parse_config(&toml).unwrap()
}

/// Flags fixed names with fixed confidences, reporting char offsets.
struct NameDetector;

const KNOWN_ENTITIES: &[(&str, &str, f32)] = &[
    ("John Smith", "PERSON", 0.99),
    ("Toronto", "LOCATION", 0.95),
    ("Acme", "ORGANIZATION", 0.99),
    ("Jane", "PERSON", 0.5),
];

#[async_trait]
impl PiiDetector for NameDetector {
    fn name(&self) -> &str {
        "names"
    }

    async fn detect(&self, text: &str, _categories: &[String]) -> Result<Vec<PiiSpan>> {
        let mut spans = Vec::new();
        for (needle, category, confidence) in KNOWN_ENTITIES {
            for (byte_pos, _) in text.match_indices(needle) {
                spans.push(PiiSpan {
                    offset: text[..byte_pos].chars().count(),
                    length: needle.chars().count(),
                    category: category.to_string(),
                    confidence: *confidence,
                });
            }
        }
        Ok(spans)
    }
}

/// Hashes lowercase words into a fixed number of buckets.
struct BagEmbedder {
    dims: usize,
}

#[async_trait]
impl Embedder for BagEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            vector[bucket % self.dims] += 1.0;
        }
        Ok(vector)
    }
}

/// Records every prompt it receives and answers with a fixed report.
#[derive(Default)]
struct RecordingGenerator {
    calls: Mutex<Vec<Vec<PromptMessage>>>,
}

impl RecordingGenerator {
    fn calls(&self) -> Vec<Vec<PromptMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, messages: &[PromptMessage]) -> Result<Generation> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(Generation {
            text: "Generated report.".to_string(),
            usage: None,
        })
    }
}

/// Object store whose reads block until released, while `hold` is set.
#[derive(Default)]
struct HeldObjectStore {
    inner: MemoryObjectStore,
    hold: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ObjectStore for HeldObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.get(bucket, key).await
    }
}

struct Harness {
    service: RagService,
    objects: Arc<HeldObjectStore>,
    store: Arc<InMemoryStore>,
    generator: Arc<RecordingGenerator>,
}

impl Harness {
    fn new() -> Self {
        Self::with_top_k(4)
    }

    fn with_top_k(top_k: usize) -> Self {
        let objects = Arc::new(HeldObjectStore::default());
        let store = Arc::new(InMemoryStore::new(DIMS, Metric::Cosine));
        let generator = Arc::new(RecordingGenerator::default());
        let parts = ServiceParts {
            store: store.clone(),
            objects: objects.clone(),
            detector: Arc::new(NameDetector),
            embedder: Arc::new(BagEmbedder { dims: DIMS }),
            generator: generator.clone(),
            parsers: ParserRegistry::with_builtins(),
        };
        let service = RagService::from_parts(&test_config(top_k), parts).unwrap();
        Self {
            service,
            objects,
            store,
            generator,
        }
    }

    fn put(&self, kb: &str, filename: &str, body: &str) {
        self.objects.inner.put(
            "bucket",
            &format!("knowledge/{}/{}", kb, filename),
            body.as_bytes().to_vec(),
        );
    }
}

fn long_document() -> String {
    let paragraphs = [
        "The deployment pipeline builds every crate in release mode before publishing artifacts.",
        "Each service owns its schema and applies migrations at startup without manual steps.",
        "Operators rotate credentials monthly. Rotation is scripted and audited by the platform team.",
        "Incident reviews are written within two days and shared with every engineering group.",
        "Capacity planning happens quarterly, based on traffic forecasts and storage growth.",
    ];
    paragraphs.join("\n\n")
}

fn report_request(kb: &str, qas: Vec<QaPair>) -> ReportRequest {
    ReportRequest {
        knowledge_base_id: kb.to_string(),
        prompt: vec![PromptMessage::new("system", "You write assessment reports.")],
        qas,
        scores: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_chunks_reconstruct_normalized_document() {
    let h = Harness::new();
    let raw = long_document();
    h.put("kb", "ops.txt", &raw);

    let job = h.service.ingest("kb", "ops.txt").await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.chunk_count > 1);

    let chunks = h.store.document_chunks("kb", "ops.txt").await.unwrap();
    assert_eq!(chunks.len(), job.chunk_count);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i as i64);
        assert!(chunk.text.chars().count() <= 100);
    }

    let normalized = normalize_text(&raw);
    let pieces: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(reconstruct(&pieces, CHUNK_OVERLAP), normalized);

    // Without redactions, source offsets slice the chunk text back out.
    for chunk in &chunks {
        assert_eq!(
            &normalized[chunk.source_start..chunk.source_end],
            chunk.text
        );
        assert!(chunk.redactions.is_empty());
    }
}

#[tokio::test]
async fn test_reingest_replaces_previous_chunks() {
    let h = Harness::new();
    h.put("kb", "notes.txt", &long_document());
    let first = h.service.ingest("kb", "notes.txt").await.unwrap();
    assert!(first.chunk_count > 1);
    assert_eq!(first.revision, 1);

    h.put("kb", "notes.txt", "A single short replacement line.");
    let second = h.service.ingest("kb", "notes.txt").await.unwrap();
    assert_eq!(second.chunk_count, 1);
    assert_eq!(second.revision, 2);
    assert_ne!(second.id, first.id);

    let chunks = h.store.document_chunks("kb", "notes.txt").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "A single short replacement line.");
    assert_eq!(h.store.count_chunks("kb").await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_reingest_keeps_previous_version() {
    let h = Harness::new();
    h.put("kb", "notes.txt", "Original content that should survive.");
    h.service.ingest("kb", "notes.txt").await.unwrap();

    h.put("kb", "notes.txt", "   \n\n  ");
    let err = h.service.ingest("kb", "notes.txt").await.unwrap_err();
    assert!(matches!(err, Error::ParseFailure(_)));

    let status = h.service.get_status("kb", "notes.txt").unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.error_kind.as_deref(), Some("ParseFailure"));
    assert_eq!(status.revision, 1);

    let chunks = h.store.document_chunks("kb", "notes.txt").await.unwrap();
    assert_eq!(chunks[0].text, "Original content that should survive.");
}

#[tokio::test]
async fn test_concurrent_ingestion_of_one_document_runs_one_job() {
    let h = Harness::new();
    h.put("kb", "held.txt", "Content behind a slow object store.");
    h.objects.hold.store(true, Ordering::SeqCst);

    let job_id = h.service.ingest_async("kb", "held.txt").await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), h.objects.entered.notified())
        .await
        .expect("worker never reached the object store");
    assert_eq!(
        h.service.get_status("kb", "held.txt").unwrap().state,
        JobState::Running
    );

    let repeats = futures::future::join_all(
        (0..8).map(|_| h.service.ingest_async("kb", "held.txt")),
    )
    .await;
    for id in repeats {
        assert_eq!(id.unwrap(), job_id);
    }

    match h.service.ingest("kb", "held.txt").await {
        Err(Error::AlreadyInProgress { job_id: active }) => assert_eq!(active, job_id),
        other => panic!("expected AlreadyInProgress, got {:?}", other),
    }
    assert!(matches!(
        h.service.remove("kb", "held.txt").await,
        Err(Error::AlreadyInProgress { .. })
    ));

    h.objects.hold.store(false, Ordering::SeqCst);
    h.objects.release.notify_one();

    let mut job = h.service.get_status("kb", "held.txt").unwrap();
    for _ in 0..500 {
        if job.state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        job = h.service.get_status("kb", "held.txt").unwrap();
    }
    assert_eq!(job.id, job_id);
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.revision, 1);
    assert_eq!(h.store.document_chunks("kb", "held.txt").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_person_and_location_redacted_at_threshold() {
    let h = Harness::new();
    h.put(
        "kb",
        "profile.txt",
        "John Smith moved to Toronto to join Acme. Jane stayed behind.",
    );
    h.service.ingest("kb", "profile.txt").await.unwrap();

    let chunks = h.store.document_chunks("kb", "profile.txt").await.unwrap();
    assert_eq!(chunks.len(), 1);
    let chunk = &chunks[0];
    assert_eq!(
        chunk.text,
        "[REDACTED:PERSON] moved to [REDACTED:LOCATION] to join Acme. Jane stayed behind."
    );

    let categories: Vec<&str> = chunk.redactions.iter().map(|r| r.category.as_str()).collect();
    assert_eq!(categories, vec!["PERSON", "LOCATION"]);
    // Offsets point into the original, unredacted text.
    assert_eq!(
        (chunk.redactions[0].start, chunk.redactions[0].end),
        (0, 10)
    );
    assert_eq!(
        (chunk.redactions[1].start, chunk.redactions[1].end),
        (20, 27)
    );
}

#[tokio::test]
async fn test_reingesting_redacted_text_changes_nothing() {
    let h = Harness::new();
    h.put("kb", "a.txt", "John Smith visited Toronto.");
    h.service.ingest("kb", "a.txt").await.unwrap();
    let once = h.store.document_chunks("kb", "a.txt").await.unwrap()[0]
        .text
        .clone();

    h.put("kb", "b.txt", &once);
    h.service.ingest("kb", "b.txt").await.unwrap();
    let twice = &h.store.document_chunks("kb", "b.txt").await.unwrap()[0];

    assert_eq!(twice.text, once);
    assert!(twice.redactions.is_empty());
}

#[tokio::test]
async fn test_retrieval_is_bounded_and_scoped_to_knowledge_base() {
    let h = Harness::with_top_k(2);
    h.put("alpha", "rust.md", "Rust crates are published with cargo.");
    h.put("alpha", "cargo.md", "Cargo resolves crates and builds them.");
    h.put("alpha", "misc.txt", "Lunch is served at noon on Fridays.");
    h.put("beta", "rust.md", "Rust crates are published with cargo.");
    for (kb, file) in [
        ("alpha", "rust.md"),
        ("alpha", "cargo.md"),
        ("alpha", "misc.txt"),
        ("beta", "rust.md"),
    ] {
        h.service.ingest(kb, file).await.unwrap();
    }

    let results = h.service.retrieve("alpha", "rust crates cargo").await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.knowledge_base_id == "alpha"));
    assert!(results[0].score >= results[1].score);

    assert!(h.service.retrieve("gamma", "rust").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_report_on_empty_knowledge_base_is_no_context() {
    let h = Harness::new();
    let request = report_request(
        "empty",
        vec![QaPair {
            question: "What is deployed?".to_string(),
            answer: "Everything.".to_string(),
        }],
    );
    let err = h.service.generate_report(&request).await.unwrap_err();
    assert!(matches!(err, Error::NoContextFound(ref kb) if kb == "empty"));
    assert!(h.generator.calls().is_empty());
}

#[tokio::test]
async fn test_report_uses_context_and_redacts_answers() {
    let h = Harness::new();
    h.put("kb", "ops.md", &long_document());
    h.put("other", "secret.txt", "Credentials rotation secret of another tenant.");
    h.service.ingest("kb", "ops.md").await.unwrap();
    h.service.ingest("other", "secret.txt").await.unwrap();

    let request = report_request(
        "kb",
        vec![QaPair {
            question: "How are credentials rotated?".to_string(),
            answer: "John Smith rotates them from Toronto.".to_string(),
        }],
    );
    let response = h.service.generate_report(&request).await.unwrap();
    assert_eq!(response.message, "Generated report.");
    assert_eq!(response.knowledge_base_id, "kb");
    assert_eq!(response.references, vec!["ops.md".to_string()]);

    let calls = h.generator.calls();
    assert_eq!(calls.len(), 1);
    let messages = &calls[0];
    assert_eq!(messages[0].role, "system");
    let body = &messages.last().unwrap().text;
    assert!(body.contains("(Source: ops.md)"));
    assert!(!body.contains("secret.txt"));
    assert!(body.contains("Answer: [REDACTED:PERSON] rotates them from [REDACTED:LOCATION]."));
    assert!(!body.contains("John Smith"));
}

#[tokio::test]
async fn test_remove_unknown_document_is_not_found() {
    let h = Harness::new();
    let err = h.service.remove("kb", "never.txt").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_removed_document_is_no_longer_retrieved() {
    let h = Harness::new();
    h.put("kb", "gone.txt", "Rotation runbook for credentials.");
    h.put("kb", "kept.txt", "Capacity planning for storage growth.");
    h.service.ingest("kb", "gone.txt").await.unwrap();
    h.service.ingest("kb", "kept.txt").await.unwrap();

    h.service.remove("kb", "gone.txt").await.unwrap();

    let results = h.service.retrieve("kb", "rotation runbook credentials").await.unwrap();
    assert!(results.iter().all(|r| r.filename != "gone.txt"));
    assert!(!results.is_empty());

    let stats = h.service.stats("kb").await.unwrap();
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.files, vec!["kept.txt".to_string()]);
}

#[tokio::test]
async fn test_unsupported_extension_fails_before_fetch() {
    let h = Harness::new();
    h.objects.hold.store(true, Ordering::SeqCst);
    let err = h.service.ingest("kb", "binary.exe").await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(_)));
    assert!(h
        .service
        .list_supported_formats()
        .contains(&".pdf".to_string()));
}

#[tokio::test]
async fn test_embedder_dimension_mismatch_is_config_error() {
    let parts = ServiceParts {
        store: Arc::new(InMemoryStore::new(DIMS, Metric::Cosine)),
        objects: Arc::new(MemoryObjectStore::new()),
        detector: Arc::new(NameDetector),
        embedder: Arc::new(BagEmbedder { dims: DIMS + 1 }),
        generator: Arc::new(RecordingGenerator::default()),
        parsers: ParserRegistry::with_builtins(),
    };
    match RagService::from_parts(&test_config(4), parts) {
        Err(Error::Config(msg)) => assert!(msg.contains("dimensions")),
        Err(other) => panic!("expected Config error, got {:?}", other),
        Ok(_) => panic!("expected Config error"),
    }
}

#[tokio::test]
async fn test_redact_texts_applies_policy_in_order() {
    let h = Harness::new();
    let texts = vec![
        "John Smith met Jane in Toronto.".to_string(),
        "Acme hired them.".to_string(),
    ];
    let redacted = h.service.redact_texts(&texts).await.unwrap();
    assert_eq!(
        redacted,
        vec![
            "[REDACTED:PERSON] met Jane in [REDACTED:LOCATION].".to_string(),
            "Acme hired them.".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_abandoned_ingest_still_finishes() {
    let h = Harness::new();
    h.put("kb", "slow.txt", "Quarterly access review checklist.");
    h.objects.hold.store(true, Ordering::SeqCst);

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), h.service.ingest("kb", "slow.txt")).await;
    assert!(abandoned.is_err());
    h.objects.entered.notified().await;
    assert_eq!(
        h.service.get_status("kb", "slow.txt").unwrap().state,
        JobState::Running
    );

    h.objects.hold.store(false, Ordering::SeqCst);
    h.objects.release.notify_one();

    let mut job = h.service.get_status("kb", "slow.txt").unwrap();
    for _ in 0..200 {
        if job.state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        job = h.service.get_status("kb", "slow.txt").unwrap();
    }
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(h.store.count_chunks("kb").await.unwrap(), 1);

    // The key is free for the next run and for removal.
    let again = h.service.ingest("kb", "slow.txt").await.unwrap();
    assert_eq!(again.revision, job.revision + 1);
    h.service.remove("kb", "slow.txt").await.unwrap();
}
