use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragline_core::embedding::Metric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pii: PiiConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default)]
    pub metric: Metric,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            metric: Metric::Cosine,
        }
    }
}

fn default_store_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_object_backend")]
    pub backend: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3-compatible endpoint (MinIO, LocalStack), scheme included.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Root directory of the filesystem backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_object_backend(),
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            root: None,
            key_prefix: default_key_prefix(),
            max_file_size: default_max_file_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_object_backend() -> String {
    "s3".to_string()
}
fn default_bucket() -> String {
    "carma-bucket".to_string()
}
fn default_region() -> String {
    "ca-central-1".to_string()
}
fn default_key_prefix() -> String {
    "knowledge".to_string()
}
fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

/// Limits shared by every external service client.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServiceConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    32_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PiiConfig {
    #[serde(default = "default_pii_provider")]
    pub provider: String,
    /// Endpoint of the `http` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom Comprehend endpoint, scheme included.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_pii_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_pii_threshold")]
    pub threshold: f32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_max_chars_per_request")]
    pub max_chars_per_request: usize,
    #[serde(flatten)]
    pub service: ServiceConfig,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            provider: default_pii_provider(),
            url: None,
            region: default_region(),
            endpoint_url: None,
            categories: default_pii_categories(),
            threshold: default_pii_threshold(),
            language: default_language(),
            max_chars_per_request: default_max_chars_per_request(),
            service: ServiceConfig::default(),
        }
    }
}

fn default_pii_provider() -> String {
    "comprehend".to_string()
}
fn default_pii_categories() -> Vec<String> {
    vec!["LOCATION".to_string(), "PERSON".to_string()]
}
fn default_pii_threshold() -> f32 {
    0.9
}
fn default_language() -> String {
    "en".to_string()
}
fn default_max_chars_per_request() -> usize {
    20_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_openai_url")]
    pub url: String,
    pub model: String,
    pub dims: usize,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(flatten)]
    pub service: ServiceConfig,
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_input_chars() -> usize {
    8000
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_openai_url")]
    pub url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(flatten)]
    pub service: ServiceConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_openai_url(),
            model: default_generation_model(),
            max_tokens: None,
            temperature: None,
            api_key_env: default_api_key_env(),
            service: ServiceConfig::default(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Diversity knob: cap on chunks returned from any one document.
    #[serde(default)]
    pub max_chunks_per_document: Option<usize>,
    /// Over-fetch factor applied when the diversity cap is set.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_chunks_per_document: None,
            candidate_multiplier: default_candidate_multiplier(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_max_context_chars() -> usize {
    16_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    64
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    let chunking = &config.chunking;
    if !(100..=4000).contains(&chunking.chunk_size) {
        bail!("chunking.chunk_size must be in [100, 4000]");
    }
    if chunking.chunk_overlap > 1000 {
        bail!("chunking.chunk_overlap must be in [0, 1000]");
    }
    if chunking.chunk_overlap >= chunking.chunk_size {
        bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    // Validate store
    match config.store.backend.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown store backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    // Validate object store
    match config.object_store.backend.as_str() {
        "s3" => {
            if config.object_store.bucket.is_empty() {
                bail!("object_store.bucket must not be empty");
            }
        }
        "filesystem" => {
            if config.object_store.root.is_none() {
                bail!("object_store.root must be set when backend is 'filesystem'");
            }
        }
        other => bail!(
            "Unknown object store backend: '{}'. Must be s3 or filesystem.",
            other
        ),
    }
    if config.object_store.max_file_size == 0 {
        bail!("object_store.max_file_size must be > 0");
    }

    // Validate PII
    let pii = &config.pii;
    match pii.provider.as_str() {
        "comprehend" => {}
        "http" => {
            if pii.url.is_none() {
                bail!("pii.url must be set when provider is 'http'");
            }
        }
        other => bail!(
            "Unknown PII provider: '{}'. Must be comprehend or http.",
            other
        ),
    }
    if pii.categories.is_empty() {
        bail!("pii.categories must not be empty");
    }
    if !(0.0..=1.0).contains(&pii.threshold) {
        bail!("pii.threshold must be in [0.0, 1.0]");
    }
    if pii.max_chars_per_request == 0 {
        bail!("pii.max_chars_per_request must be > 0");
    }
    validate_service("pii", &pii.service)?;

    // Validate embedding
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must be specified");
    }
    if config.embedding.max_input_chars == 0 {
        bail!("embedding.max_input_chars must be > 0");
    }
    validate_service("embedding", &config.embedding.service)?;

    // Validate generation
    if let Some(t) = config.generation.temperature {
        if !(0.0..=1.0).contains(&t) {
            bail!("generation.temperature must be in [0.0, 1.0]");
        }
    }
    validate_service("generation", &config.generation.service)?;

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_chunks_per_document == Some(0) {
        bail!("retrieval.max_chunks_per_document must be >= 1 when set");
    }
    if config.retrieval.candidate_multiplier < 1 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }

    // Validate jobs
    if config.jobs.workers < 1 {
        bail!("jobs.workers must be >= 1");
    }
    if config.jobs.queue_capacity < 1 {
        bail!("jobs.queue_capacity must be >= 1");
    }

    Ok(())
}

fn validate_service(section: &str, service: &ServiceConfig) -> Result<()> {
    if service.max_concurrency < 1 {
        bail!("{}.max_concurrency must be >= 1", section);
    }
    if service.timeout_secs == 0 {
        bail!("{}.timeout_secs must be > 0", section);
    }
    if service.backoff_base_ms > service.backoff_max_ms {
        bail!("{}.backoff_base_ms must not exceed backoff_max_ms", section);
    }
    Ok(())
}
