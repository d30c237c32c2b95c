//! Report generation against an OpenAI-compatible `/chat/completions`
//! endpoint.
//!
//! HTTP 429, 5xx, and network errors are retryable
//! [`Error::GenerationFailure`]s; any other non-success status is
//! terminal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use ragline_core::models::{Generation, PromptMessage, TokenUsage};
use ragline_core::prompt::Generator;
use ragline_core::{Error, Result};

use crate::config::GenerationConfig;
use crate::retry::ServiceGate;

pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.service.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            api_key: std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty()),
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[async_trait]
impl Generator for HttpGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[PromptMessage]) -> Result<Generation> {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role, "content": m.text}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::generation(format!("request failed: {}", e), true))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err(Error::generation(
                format!("generation API error {}: {}", status, body_text),
                retryable,
            ));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::generation(format!("invalid response body: {}", e), false))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::generation("response contained no message content", false))?;

        let usage = parsed.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        debug!(model = %self.model, ?usage, "generated report");

        Ok(Generation { text, usage })
    }
}

/// A [`Generator`] whose calls pass through a [`ServiceGate`].
pub struct GatedGenerator {
    inner: Arc<dyn Generator>,
    gate: ServiceGate,
}

impl GatedGenerator {
    pub fn new(inner: Arc<dyn Generator>, gate: ServiceGate) -> Self {
        Self { inner, gate }
    }
}

#[async_trait]
impl Generator for GatedGenerator {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(&self, messages: &[PromptMessage]) -> Result<Generation> {
        self.gate.run(|| self.inner.generate(messages)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> GenerationConfig {
        GenerationConfig {
            url: url.to_string(),
            max_tokens: Some(512),
            api_key_env: "RAGLINE_TEST_UNSET_KEY".to_string(),
            ..GenerationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_generate_parses_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 512,
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Report body"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            })))
            .mount(&server)
            .await;

        let generator = HttpGenerator::new(&config(&server.uri())).unwrap();
        let generation = generator
            .generate(&[PromptMessage::new("user", "hi")])
            .await
            .unwrap();
        assert_eq!(generation.text, "Report body");
        assert_eq!(
            generation.usage,
            Some(TokenUsage {
                input_tokens: 12,
                output_tokens: 3,
                total_tokens: 15
            })
        );
    }

    #[tokio::test]
    async fn test_error_classification() {
        for (status, retryable) in [(429, true), (502, true), (400, false), (401, false)] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let generator = HttpGenerator::new(&config(&server.uri())).unwrap();
            let err = generator
                .generate(&[PromptMessage::new("user", "hi")])
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "GenerationFailure");
            assert_eq!(err.is_retryable(), retryable, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let generator = HttpGenerator::new(&config(&server.uri())).unwrap();
        assert!(generator.generate(&[]).await.is_err());
    }
}
