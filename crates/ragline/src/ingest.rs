//! Ingestion orchestration.
//!
//! Drives one document through the pipeline:
//!
//! ```text
//! object store → FormatParser → normalize → PiiRedactor → chunk_text
//!              → Embedder (per chunk) → VectorStore::upsert_document
//! ```
//!
//! Each run is tracked by an [`IngestionJob`] in the [`JobRegistry`]:
//! `pending → running → completed | failed`. At most one job per
//! `(knowledge_base_id, filename)` is active at a time. The vector store
//! is written once, with the complete chunk set, so a failed run leaves
//! the previous version of the document untouched.
//!
//! Asynchronous requests are handed to a bounded pool of worker tasks;
//! the job registry is the only channel between a worker and callers
//! polling status.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use ragline_core::chunk::{chunk_text, content_hash, normalize_text};
use ragline_core::embedding::Embedder;
use ragline_core::models::{Chunk, DocumentKey, IngestionJob, JobState};
use ragline_core::redact::Bias;
use ragline_core::source::{document_key, ObjectStore};
use ragline_core::store::VectorStore;
use ragline_core::{Error, Result};

use crate::config::Config;
use crate::formats::ParserRegistry;
use crate::jobs::JobRegistry;
use crate::pii::PiiRedactor;
use crate::retry::ServiceGate;

/// Tuning for one pipeline run, resolved from [`Config`] at startup.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub bucket: String,
    pub key_prefix: String,
    pub max_file_size: u64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Chunks of one document embedded concurrently.
    pub embed_concurrency: usize,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.object_store.bucket.clone(),
            key_prefix: config.object_store.key_prefix.clone(),
            max_file_size: config.object_store.max_file_size,
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            embed_concurrency: config.embedding.service.max_concurrency,
        }
    }
}

/// The collaborators a pipeline run needs.
pub struct IngestPipeline {
    pub settings: IngestSettings,
    pub parsers: ParserRegistry,
    pub objects: Arc<dyn ObjectStore>,
    /// Retries transient object store failures.
    pub fetch_gate: ServiceGate,
    pub redactor: Arc<PiiRedactor>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
}

impl IngestPipeline {
    async fn fetch(&self, key: &DocumentKey) -> Result<Vec<u8>> {
        let object_key = document_key(
            &self.settings.key_prefix,
            &key.knowledge_base_id,
            &key.filename,
        );
        let bytes = self
            .fetch_gate
            .run(|| self.objects.get(&self.settings.bucket, &object_key))
            .await?;

        if bytes.len() as u64 > self.settings.max_file_size {
            return Err(Error::ParseFailure(format!(
                "{} is {} bytes, over the {} byte limit",
                object_key,
                bytes.len(),
                self.settings.max_file_size
            )));
        }
        Ok(bytes)
    }

    /// Everything up to, but not including, the store write.
    async fn build_chunks(&self, key: &DocumentKey) -> Result<Vec<Chunk>> {
        let extension = key.extension().ok_or_else(|| {
            Error::UnsupportedFormat(format!("'{}' has no file extension", key.filename))
        })?;
        let parser = self.parsers.get(&extension)?;

        let bytes = self.fetch(key).await?;
        let raw = tokio::task::spawn_blocking(move || parser.parse(&bytes))
            .await
            .map_err(|e| Error::ParseFailure(format!("parser task failed: {}", e)))??;

        let text = normalize_text(&raw);
        if text.is_empty() {
            return Err(Error::ParseFailure(format!(
                "no text content in '{}'",
                key.filename
            )));
        }

        let redacted = self.redactor.redact_document(key, &text).await?;
        let windows = chunk_text(
            &redacted.text,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
        );
        debug!(document = %key, windows = windows.len(), "chunked document");

        let texts: Vec<String> = windows
            .iter()
            .map(|w| w.slice(&redacted.text).to_string())
            .collect();
        let embedder = self.embedder.clone();
        let vectors: Vec<Vec<f32>> = stream::iter(texts.clone())
            .map(move |text| {
                let embedder = embedder.clone();
                async move { embedder.embed(&text).await }
            })
            .buffered(self.settings.embed_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(windows
            .iter()
            .zip(texts)
            .zip(vectors)
            .map(|((window, chunk_text), vector)| {
                Chunk {
                    index: window.index as i64,
                    hash: content_hash(&chunk_text),
                    text: chunk_text,
                    vector,
                    source_start: redacted.to_source(window.start, Bias::Start),
                    source_end: redacted.to_source(window.end, Bias::End),
                    redactions: redacted.spans_between(window.start, window.end),
                }
            })
            .collect())
    }

    async fn run(&self, key: &DocumentKey) -> Result<usize> {
        let chunks = self.build_chunks(key).await?;
        self.store
            .upsert_document(&key.knowledge_base_id, &key.filename, &chunks)
            .await?;
        Ok(chunks.len())
    }
}

/// Run a `pending` job to a terminal state.
async fn execute(
    pipeline: &IngestPipeline,
    jobs: &JobRegistry,
    key: &DocumentKey,
    job_id: &str,
) -> Result<IngestionJob> {
    jobs.transition(key, job_id, JobState::Pending, JobState::Running)
        .ok_or_else(|| Error::NotFound(format!("pending job {} for {}", job_id, key)))?;
    info!(
        knowledge_base_id = %key.knowledge_base_id,
        filename = %key.filename,
        job_id,
        "ingestion started"
    );

    match pipeline.run(key).await {
        Ok(chunks) => {
            info!(
                knowledge_base_id = %key.knowledge_base_id,
                filename = %key.filename,
                job_id,
                chunks,
                "ingestion completed"
            );
            jobs.complete(key, job_id, chunks)
                .ok_or_else(|| Error::NotFound(format!("running job {} for {}", job_id, key)))
        }
        Err(e) => {
            error!(
                knowledge_base_id = %key.knowledge_base_id,
                filename = %key.filename,
                job_id,
                kind = e.kind(),
                error = %e,
                "ingestion failed"
            );
            jobs.fail(key, job_id, &e);
            Err(e)
        }
    }
}

/// Run a `pending` job on its own task and wait for the result.
///
/// The job reaches a terminal state even if the waiting caller is
/// dropped. A panicked or aborted task fails the job with
/// [`Error::Internal`].
async fn execute_detached(
    pipeline: Arc<IngestPipeline>,
    jobs: Arc<JobRegistry>,
    key: DocumentKey,
    job_id: String,
) -> Result<IngestionJob> {
    let task = {
        let jobs = jobs.clone();
        let key = key.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move { execute(&pipeline, &jobs, &key, &job_id).await })
    };
    match task.await {
        Ok(result) => result,
        Err(join) => {
            let err = Error::Internal(format!("ingestion task for {} failed: {}", key, join));
            error!(
                knowledge_base_id = %key.knowledge_base_id,
                filename = %key.filename,
                job_id = %job_id,
                error = %err,
                "ingestion task died"
            );
            jobs.fail(&key, &job_id, &err);
            Err(err)
        }
    }
}

struct QueuedJob {
    key: DocumentKey,
    job_id: String,
}

async fn worker(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    pipeline: Arc<IngestPipeline>,
    jobs: Arc<JobRegistry>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(task) = next else {
            debug!(worker = id, "ingestion queue closed");
            break;
        };
        // Failures are recorded on the job.
        let _ = execute_detached(pipeline.clone(), jobs.clone(), task.key, task.job_id).await;
    }
}

pub struct IngestionOrchestrator {
    pipeline: Arc<IngestPipeline>,
    jobs: Arc<JobRegistry>,
    queue: mpsc::Sender<QueuedJob>,
}

impl IngestionOrchestrator {
    /// Spawn `workers` background tasks on the current tokio runtime.
    pub fn start(pipeline: IngestPipeline, workers: usize, queue_capacity: usize) -> Self {
        let pipeline = Arc::new(pipeline);
        let jobs = Arc::new(JobRegistry::new());
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for id in 0..workers.max(1) {
            tokio::spawn(worker(id, rx.clone(), pipeline.clone(), jobs.clone()));
        }

        Self {
            pipeline,
            jobs,
            queue: tx,
        }
    }

    /// Ingest a document and wait for the terminal state.
    ///
    /// Returns the completed job, or the error that failed it (the failure
    /// is also recorded on the job). Fails with
    /// [`Error::AlreadyInProgress`] without starting a run if the document
    /// is already being ingested.
    pub async fn ingest(&self, knowledge_base_id: &str, filename: &str) -> Result<IngestionJob> {
        let key = DocumentKey::new(knowledge_base_id, filename);
        let job = self.jobs.try_begin(&key)?;
        execute_detached(self.pipeline.clone(), self.jobs.clone(), key, job.id).await
    }

    /// Queue a document for ingestion and return its job id.
    ///
    /// If the document is already pending or running, the existing job's
    /// id is returned and nothing new is queued. Waits for queue space
    /// when the pool is saturated.
    pub async fn ingest_async(&self, knowledge_base_id: &str, filename: &str) -> Result<String> {
        let key = DocumentKey::new(knowledge_base_id, filename);
        let job = match self.jobs.try_begin(&key) {
            Ok(job) => job,
            Err(Error::AlreadyInProgress { job_id }) => {
                debug!(document = %key, job_id, "ingestion already queued");
                return Ok(job_id);
            }
            Err(e) => return Err(e),
        };

        let task = QueuedJob {
            key: key.clone(),
            job_id: job.id.clone(),
        };
        if self.queue.send(task).await.is_err() {
            let err = Error::Config("ingestion worker pool has shut down".to_string());
            self.jobs.fail(&key, &job.id, &err);
            return Err(err);
        }
        Ok(job.id)
    }

    /// Latest job record for a document.
    pub fn status(&self, knowledge_base_id: &str, filename: &str) -> Result<IngestionJob> {
        let key = DocumentKey::new(knowledge_base_id, filename);
        self.jobs
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("no ingestion job for {}", key)))
    }

    /// Delete a document's chunks. Returns the number removed.
    pub async fn remove(&self, knowledge_base_id: &str, filename: &str) -> Result<usize> {
        let key = DocumentKey::new(knowledge_base_id, filename);
        if let Some(job_id) = self.jobs.active_job_id(&key) {
            warn!(document = %key, job_id, "remove rejected while ingestion is active");
            return Err(Error::AlreadyInProgress { job_id });
        }
        let removed = self
            .pipeline
            .store
            .remove(knowledge_base_id, filename)
            .await?;
        info!(
            knowledge_base_id,
            filename,
            chunks = removed,
            "document removed"
        );
        Ok(removed)
    }

    pub fn supported_formats(&self) -> Vec<String> {
        self.pipeline.parsers.supported_extensions()
    }
}
