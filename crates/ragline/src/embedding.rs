//! Embedding client for OpenAI-compatible `/embeddings` endpoints.
//!
//! [`HttpEmbedder`] makes exactly one HTTP call per [`Embedder::embed`];
//! retry and concurrency limits come from wrapping it in a
//! [`GatedEmbedder`].
//!
//! # Failure classification
//!
//! - HTTP 429, 5xx, and network errors → [`Error::EmbeddingFailure`] (retryable)
//! - HTTP 400, 413, 422, and other 4xx → [`Error::EmbeddingRejected`]
//! - Input longer than `max_input_chars` → [`Error::EmbeddingRejected`]
//!   without a network call
//! - A vector of the wrong length → [`Error::Config`]: the configured
//!   `dims` do not match the model

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use ragline_core::embedding::{check_dims, Embedder};
use ragline_core::{Error, Result};

use crate::config::EmbeddingConfig;
use crate::retry::ServiceGate;

pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    max_input_chars: usize,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.service.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.url.trim_end_matches('/')),
            model: config.model.clone(),
            dims: config.dims,
            max_input_chars: config.max_input_chars,
            api_key: std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let chars = text.chars().count();
        if chars > self.max_input_chars {
            return Err(Error::EmbeddingRejected(format!(
                "input is {} characters, limit is {}",
                chars, self.max_input_chars
            )));
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::EmbeddingFailure(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = format!("embedding API error {}: {}", status, body_text);
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(Error::EmbeddingFailure(message));
            }
            return Err(Error::EmbeddingRejected(message));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFailure(format!("invalid response body: {}", e)))?;
        let vector = parse_openai_response(&json)?;
        check_dims(&vector, self.dims)?;
        debug!(model = %self.model, dims = vector.len(), "embedded text");
        Ok(vector)
    }
}

/// First `data[].embedding` (lowest `index`) of an embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::EmbeddingFailure("invalid response: missing data array".into()))?;

    let item = data
        .iter()
        .min_by_key(|item| item.get("index").and_then(|i| i.as_u64()).unwrap_or(0))
        .ok_or_else(|| Error::EmbeddingFailure("invalid response: empty data array".into()))?;

    let embedding = item
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::EmbeddingFailure("invalid response: missing embedding".into()))?;

    embedding
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::EmbeddingFailure("invalid response: non-numeric value".into()))
        })
        .collect()
}

/// An [`Embedder`] whose calls pass through a [`ServiceGate`].
pub struct GatedEmbedder {
    inner: Arc<dyn Embedder>,
    gate: ServiceGate,
}

impl GatedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, gate: ServiceGate) -> Self {
        Self { inner, gate }
    }
}

#[async_trait]
impl Embedder for GatedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.gate.run(|| self.inner.embed(text)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str, dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            url: url.to_string(),
            model: "text-embedding-3-small".to_string(),
            dims,
            max_input_chars: 100,
            api_key_env: "RAGLINE_TEST_UNSET_KEY".to_string(),
            service: ServiceConfig::default(),
        }
    }

    fn response(vector: &[f32]) -> serde_json::Value {
        serde_json::json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": vector}],
            "model": "text-embedding-3-small"
        })
    }

    #[tokio::test]
    async fn test_embed_parses_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response(&[0.5, -0.25, 1.0])))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config(&format!("{}/v1", server.uri()), 3)).unwrap();
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.5, -0.25, 1.0]);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_config_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response(&[0.1, 0.2])))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config(&server.uri(), 3)).unwrap();
        assert!(matches!(embedder.embed("x").await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_status_classification() {
        for (status, retryable) in [(429, true), (500, true), (503, true), (400, false), (413, false), (422, false)] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let embedder = HttpEmbedder::new(&config(&server.uri(), 3)).unwrap();
            let err = embedder.embed("x").await.unwrap_err();
            assert_eq!(err.is_retryable(), retryable, "status {}", status);
            if !retryable {
                assert!(matches!(err, Error::EmbeddingRejected(_)));
            }
        }
    }

    #[tokio::test]
    async fn test_oversized_input_rejected_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response(&[0.0, 0.0, 0.0])))
            .expect(0)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&config(&server.uri(), 3)).unwrap();
        let err = embedder.embed(&"a".repeat(101)).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingRejected(_)));
    }

    #[test]
    fn test_parse_picks_lowest_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [2.0]},
                {"index": 0, "embedding": [1.0]}
            ]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), vec![1.0]);
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }
}
