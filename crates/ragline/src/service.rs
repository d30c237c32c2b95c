//! The service facade: one object exposing every public operation.
//!
//! [`RagService::build`] resolves the configured backends (vector store,
//! object store, PII detector, embedding and generation clients);
//! [`RagService::from_parts`] takes them ready-made, which is how tests
//! and embedders of the library wire in their own implementations. Either
//! way, each external capability is wrapped in its own
//! [`ServiceGate`] so that concurrency caps and retries apply uniformly.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use ragline_core::embedding::Embedder;
use ragline_core::models::{
    IngestionJob, KnowledgeBaseStats, ReportRequest, ReportResponse, ScoredChunk,
};
use ragline_core::prompt::Generator;
use ragline_core::redact::{PiiDetector, RedactionPolicy};
use ragline_core::source::ObjectStore;
use ragline_core::store::memory::InMemoryStore;
use ragline_core::store::VectorStore;
use ragline_core::{Error, Result};

use crate::aws::AwsCredentials;
use crate::config::{Config, ServiceConfig};
use crate::db;
use crate::embedding::{GatedEmbedder, HttpEmbedder};
use crate::formats::ParserRegistry;
use crate::generation::{GatedGenerator, HttpGenerator};
use crate::ingest::{IngestPipeline, IngestSettings, IngestionOrchestrator};
use crate::object_store::{FsObjectStore, S3ObjectStore};
use crate::pii::{ComprehendDetector, HttpPiiDetector, PiiRedactor};
use crate::report::ReportGenerator;
use crate::retrieval::RetrievalEngine;
use crate::retry::{RetryPolicy, ServiceGate};
use crate::sqlite_store::SqliteStore;

/// Ungated capability implementations handed to [`RagService::from_parts`].
pub struct ServiceParts {
    pub store: Arc<dyn VectorStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub detector: Arc<dyn PiiDetector>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub parsers: ParserRegistry,
}

pub struct RagService {
    store: Arc<dyn VectorStore>,
    orchestrator: IngestionOrchestrator,
    retrieval: Arc<RetrievalEngine>,
    reports: ReportGenerator,
    redactor: Arc<PiiRedactor>,
}

/// Open the configured vector store, creating its schema if needed.
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    let dims = config.embedding.dims;
    let metric = config.store.metric;
    match config.store.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new(dims, metric))),
        _ => {
            let pool = db::connect(&config.db.path)
                .await
                .with_context(|| format!("failed to open {}", config.db.path.display()))?;
            Ok(Arc::new(SqliteStore::open(pool, dims, metric).await?))
        }
    }
}

/// The configured PII detection backend.
pub fn open_detector(config: &Config) -> anyhow::Result<Arc<dyn PiiDetector>> {
    Ok(match config.pii.provider.as_str() {
        "http" => Arc::new(HttpPiiDetector::new(&config.pii)?),
        _ => Arc::new(ComprehendDetector::new(
            &config.pii,
            AwsCredentials::from_env()?,
        )?),
    })
}

/// A gated redactor over `detector` with the configured policy.
pub fn pii_redactor(config: &Config, detector: Arc<dyn PiiDetector>) -> PiiRedactor {
    PiiRedactor::new(
        detector,
        RedactionPolicy::new(&config.pii.categories, config.pii.threshold),
        ServiceGate::from_config("pii", &config.pii.service),
        config.pii.max_chars_per_request,
    )
}

/// Document and chunk counts of one knowledge base.
pub async fn knowledge_base_stats(
    store: &dyn VectorStore,
    knowledge_base_id: &str,
) -> Result<KnowledgeBaseStats> {
    let documents = store.list_documents(knowledge_base_id).await?;
    let mut files: Vec<String> = documents.iter().map(|d| d.filename.clone()).collect();
    files.sort();
    Ok(KnowledgeBaseStats {
        knowledge_base_id: knowledge_base_id.to_string(),
        total_documents: documents.len(),
        total_chunks: documents.iter().map(|d| d.chunk_count).sum(),
        files,
    })
}

impl RagService {
    /// Build every backend from configuration.
    ///
    /// AWS credentials are read from the environment only when an S3
    /// object store or the Comprehend detector is configured.
    pub async fn build(config: Arc<Config>) -> anyhow::Result<Self> {
        let store = open_store(&config).await?;

        let objects: Arc<dyn ObjectStore> = match config.object_store.backend.as_str() {
            "filesystem" => {
                let root = config
                    .object_store
                    .root
                    .clone()
                    .context("object_store.root must be set when backend is 'filesystem'")?;
                Arc::new(FsObjectStore::new(root))
            }
            _ => Arc::new(S3ObjectStore::new(
                &config.object_store,
                AwsCredentials::from_env()?,
            )?),
        };

        let detector = open_detector(&config)?;

        let parts = ServiceParts {
            store,
            objects,
            detector,
            embedder: Arc::new(HttpEmbedder::new(&config.embedding)?),
            generator: Arc::new(HttpGenerator::new(&config.generation)?),
            parsers: ParserRegistry::with_builtins(),
        };

        Ok(Self::from_parts(&config, parts)?)
    }

    /// Wire ready-made capabilities. Must run inside a tokio runtime: the
    /// ingestion worker pool is spawned here.
    ///
    /// Fails with [`Error::Config`] when the embedder's dimension differs
    /// from the vector store's.
    pub fn from_parts(config: &Config, parts: ServiceParts) -> Result<Self> {
        if parts.embedder.dims() != parts.store.dims() {
            return Err(Error::Config(format!(
                "embedding model '{}' produces {} dimensions but the vector store expects {}",
                parts.embedder.model_name(),
                parts.embedder.dims(),
                parts.store.dims()
            )));
        }

        let embedder: Arc<dyn Embedder> = Arc::new(GatedEmbedder::new(
            parts.embedder,
            ServiceGate::from_config("embedding", &config.embedding.service),
        ));
        let generator: Arc<dyn Generator> = Arc::new(GatedGenerator::new(
            parts.generator,
            ServiceGate::from_config("generation", &config.generation.service),
        ));
        let redactor = Arc::new(pii_redactor(config, parts.detector));
        let fetch_gate = ServiceGate::new(
            "object_store",
            config.jobs.workers,
            RetryPolicy::from_config(&ServiceConfig::default()),
        );

        let pipeline = IngestPipeline {
            settings: IngestSettings::from_config(config),
            parsers: parts.parsers,
            objects: parts.objects,
            fetch_gate,
            redactor: redactor.clone(),
            embedder: embedder.clone(),
            store: parts.store.clone(),
        };
        let orchestrator =
            IngestionOrchestrator::start(pipeline, config.jobs.workers, config.jobs.queue_capacity);

        let retrieval = Arc::new(RetrievalEngine::new(
            embedder,
            parts.store.clone(),
            &config.retrieval,
        ));
        let reports = ReportGenerator::new(
            retrieval.clone(),
            parts.store.clone(),
            redactor.clone(),
            generator,
            config.retrieval.max_context_chars,
        );

        info!(
            store_dims = parts.store.dims(),
            metric = %parts.store.metric(),
            workers = config.jobs.workers,
            "ragline service ready"
        );

        Ok(Self {
            store: parts.store,
            orchestrator,
            retrieval,
            reports,
            redactor,
        })
    }

    /// Ingest a document and wait for the terminal result.
    pub async fn ingest(&self, knowledge_base_id: &str, filename: &str) -> Result<IngestionJob> {
        self.orchestrator.ingest(knowledge_base_id, filename).await
    }

    /// Queue a document for ingestion; returns the job id immediately.
    pub async fn ingest_async(&self, knowledge_base_id: &str, filename: &str) -> Result<String> {
        self.orchestrator
            .ingest_async(knowledge_base_id, filename)
            .await
    }

    pub fn get_status(&self, knowledge_base_id: &str, filename: &str) -> Result<IngestionJob> {
        self.orchestrator.status(knowledge_base_id, filename)
    }

    /// Delete a document. Fails with [`Error::NotFound`] if it has no
    /// chunks.
    pub async fn remove(&self, knowledge_base_id: &str, filename: &str) -> Result<()> {
        self.orchestrator.remove(knowledge_base_id, filename).await?;
        Ok(())
    }

    pub fn list_supported_formats(&self) -> Vec<String> {
        self.orchestrator.supported_formats()
    }

    /// Top-k chunks of one knowledge base for a free-text query.
    pub async fn retrieve(&self, knowledge_base_id: &str, query: &str) -> Result<Vec<ScoredChunk>> {
        self.retrieval.retrieve(knowledge_base_id, query).await
    }

    pub async fn generate_report(&self, request: &ReportRequest) -> Result<ReportResponse> {
        self.reports.generate(request).await
    }

    /// Redact a batch of free texts with the configured policy, in order.
    pub async fn redact_texts(&self, texts: &[String]) -> Result<Vec<String>> {
        self.redactor.redact_texts(texts).await
    }

    pub async fn stats(&self, knowledge_base_id: &str) -> Result<KnowledgeBaseStats> {
        knowledge_base_stats(self.store.as_ref(), knowledge_base_id).await
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }
}
