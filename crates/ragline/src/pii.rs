//! PII detection clients and the document redactor.
//!
//! Two [`PiiDetector`] backends:
//!
//! - [`ComprehendDetector`] calls AWS Comprehend `DetectEntities` with a
//!   SigV4-signed JSON request.
//! - [`HttpPiiDetector`] posts `{text, categories, language}` to any
//!   service that answers `{entities: [{offset, length, category,
//!   confidence}]}`.
//!
//! [`PiiRedactor`] splits long text into request-sized segments, runs the
//! detector through a [`ServiceGate`], applies the [`RedactionPolicy`],
//! and writes one audit event per redacted span. Audit events carry
//! offsets and categories, never the redacted text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use ragline_core::models::{DocumentKey, PiiSpan};
use ragline_core::redact::{PiiDetector, Redacted, RedactionPolicy};
use ragline_core::{Error, Result};

use crate::aws::{AwsCredentials, SigV4Signer};
use crate::config::PiiConfig;
use crate::retry::ServiceGate;

const COMPREHEND_TARGET: &str = "Comprehend_20171127.DetectEntities";
const COMPREHEND_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Target of audit events for applied redactions.
pub const AUDIT_TARGET: &str = "ragline::audit";

fn status_error(service: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let retryable = status.as_u16() == 429
        || status.is_server_error()
        || body.contains("ThrottlingException")
        || body.contains("TooManyRequestsException");
    Error::pii(format!("{} error {}: {}", service, status, body), retryable)
}

pub struct ComprehendDetector {
    client: reqwest::Client,
    endpoint: Url,
    signer: SigV4Signer,
    language: String,
}

impl ComprehendDetector {
    pub fn new(config: &PiiConfig, credentials: AwsCredentials) -> anyhow::Result<Self> {
        let raw = config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://comprehend.{}.amazonaws.com/", config.region));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.service.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: Url::parse(&raw)?,
            signer: SigV4Signer::new(credentials, &config.region, "comprehend"),
            language: config.language.clone(),
        })
    }
}

#[derive(Deserialize)]
struct ComprehendResponse {
    #[serde(rename = "Entities", default)]
    entities: Vec<ComprehendEntity>,
}

#[derive(Deserialize)]
struct ComprehendEntity {
    #[serde(rename = "BeginOffset")]
    begin_offset: usize,
    #[serde(rename = "EndOffset")]
    end_offset: usize,
    #[serde(rename = "Type")]
    entity_type: String,
    #[serde(rename = "Score")]
    score: f32,
}

#[async_trait]
impl PiiDetector for ComprehendDetector {
    fn name(&self) -> &str {
        "comprehend"
    }

    async fn detect(&self, text: &str, _categories: &[String]) -> Result<Vec<PiiSpan>> {
        let body = serde_json::to_vec(&serde_json::json!({
            "Text": text,
            "LanguageCode": self.language,
        }))
        .map_err(|e| Error::pii(e.to_string(), false))?;

        let extra = [
            ("content-type", COMPREHEND_CONTENT_TYPE),
            ("x-amz-target", COMPREHEND_TARGET),
        ];
        let headers = self
            .signer
            .sign("POST", &self.endpoint, &extra, &body, Utc::now());

        let mut request = self.client.post(self.endpoint.clone()).body(body);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::pii(format!("Comprehend request failed: {}", e), true))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_error("Comprehend", status, &body_text));
        }

        let parsed: ComprehendResponse = resp
            .json()
            .await
            .map_err(|e| Error::pii(format!("invalid Comprehend response: {}", e), false))?;

        Ok(parsed
            .entities
            .into_iter()
            .filter(|e| e.end_offset > e.begin_offset)
            .map(|e| PiiSpan {
                offset: e.begin_offset,
                length: e.end_offset - e.begin_offset,
                category: e.entity_type,
                confidence: e.score,
            })
            .collect())
    }
}

pub struct HttpPiiDetector {
    client: reqwest::Client,
    url: String,
    language: String,
}

impl HttpPiiDetector {
    pub fn new(config: &PiiConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("pii.url must be set when provider is 'http'"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.service.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            language: config.language.clone(),
        })
    }
}

#[derive(Deserialize)]
struct HttpDetectResponse {
    #[serde(default)]
    entities: Vec<PiiSpan>,
}

#[async_trait]
impl PiiDetector for HttpPiiDetector {
    fn name(&self) -> &str {
        "http"
    }

    async fn detect(&self, text: &str, categories: &[String]) -> Result<Vec<PiiSpan>> {
        let body = serde_json::json!({
            "text": text,
            "categories": categories,
            "language": self.language,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::pii(format!("PII request failed: {}", e), true))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_error("PII service", status, &body_text));
        }

        let parsed: HttpDetectResponse = resp
            .json()
            .await
            .map_err(|e| Error::pii(format!("invalid PII response: {}", e), false))?;
        Ok(parsed.entities)
    }
}

/// Split `text` into pieces of at most `max_chars` characters, cutting
/// after whitespace where possible. Each piece comes with its character
/// offset in `text`.
fn segments(text: &str, max_chars: usize) -> Vec<(usize, &str)> {
    let max = max_chars.max(1);
    let mut out = Vec::new();
    let mut rest = text;
    let mut char_offset = 0;

    while !rest.is_empty() {
        let cut = match rest.char_indices().nth(max) {
            None => rest.len(),
            Some((hard, _)) => match rest[..hard].rfind(char::is_whitespace) {
                Some(ws) if ws > 0 => {
                    ws + rest[ws..].chars().next().map_or(1, char::len_utf8)
                }
                _ => hard,
            },
        };
        let (segment, tail) = rest.split_at(cut);
        out.push((char_offset, segment));
        char_offset += segment.chars().count();
        rest = tail;
    }

    out
}

pub struct PiiRedactor {
    detector: Arc<dyn PiiDetector>,
    policy: RedactionPolicy,
    gate: ServiceGate,
    max_chars_per_request: usize,
}

impl PiiRedactor {
    pub fn new(
        detector: Arc<dyn PiiDetector>,
        policy: RedactionPolicy,
        gate: ServiceGate,
        max_chars_per_request: usize,
    ) -> Self {
        Self {
            detector,
            policy,
            gate,
            max_chars_per_request,
        }
    }

    pub fn policy(&self) -> &RedactionPolicy {
        &self.policy
    }

    /// Detect PII across all of `text`. Offsets are characters into
    /// `text`. Any detector failure surfaces as
    /// [`Error::PiiDetectionFailure`].
    pub async fn detect(&self, text: &str) -> Result<Vec<PiiSpan>> {
        let categories = self.policy.categories();
        let mut spans = Vec::new();

        for (char_offset, segment) in segments(text, self.max_chars_per_request) {
            if segment.trim().is_empty() {
                continue;
            }
            let found = self
                .gate
                .run(|| self.detector.detect(segment, &categories))
                .await
                .map_err(|e| match e {
                    Error::PiiDetectionFailure { .. } => e,
                    other => Error::pii(other.to_string(), false),
                })?;
            spans.extend(found.into_iter().map(|mut span| {
                span.offset += char_offset;
                span
            }));
        }

        Ok(spans)
    }

    /// Redact a document's normalized text, auditing each redaction.
    pub async fn redact_document(&self, key: &DocumentKey, text: &str) -> Result<Redacted> {
        let spans = self.detect(text).await?;
        let redacted = self.policy.apply(text, &spans);

        for applied in &redacted.applied {
            info!(
                target: AUDIT_TARGET,
                knowledge_base_id = %key.knowledge_base_id,
                filename = %key.filename,
                category = %applied.category,
                confidence = applied.confidence,
                start = applied.source_start,
                end = applied.source_end,
                "redacted span"
            );
        }
        debug!(
            document = %key,
            detected = spans.len(),
            redacted = redacted.applied.len(),
            "redaction complete"
        );

        Ok(redacted)
    }

    /// Redact free text (e.g. report answers) without audit metadata.
    pub async fn redact_text(&self, text: &str) -> Result<String> {
        let spans = self.detect(text).await?;
        Ok(self.policy.apply(text, &spans).text)
    }

    /// Redact a batch of free texts, preserving order. Concurrency is
    /// bounded by the detector's gate; any failure fails the batch.
    pub async fn redact_texts(&self, texts: &[String]) -> Result<Vec<String>> {
        let redacted = try_join_all(texts.iter().map(|text| self.redact_text(text))).await?;
        debug!(texts = redacted.len(), "batch redaction complete");
        Ok(redacted)
    }
}
