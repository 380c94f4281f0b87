//! Inference clients for the local and cloud tiers.
//!
//! Implements the core [`InferenceService`] trait over HTTP:
//! - **[`OllamaInference`]**: on-device tier, `POST {url}/api/chat` on an
//!   Ollama-compatible runtime.
//! - **[`OpenAiInference`]**: cloud escalation tier,
//!   `POST {url}/v1/chat/completions` with `OPENAI_API_KEY`.
//! - **[`DisabledInference`]**: every call fails as unavailable.
//!
//! Both HTTP clients send [`FORENSIC_INSTRUCTION`] as the system message
//! and the rendered window as the user message, ask for a JSON object
//! reply and hand the reply text to [`parse_model_reply`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately as `Rejected`
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Exhausted retries surface as [`InferenceError::Unavailable`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

use doc_analyst_core::inference::{
    build_prompt, parse_model_reply, InferenceError, InferenceOutput, InferenceService,
    FORENSIC_INSTRUCTION,
};
use doc_analyst_core::models::{InferenceSource, Window};

use crate::config::{CloudInferenceConfig, LocalInferenceConfig};

/// Confidence assumed when the local model omits one.
const LOCAL_DEFAULT_CONFIDENCE: f64 = 0.5;
/// Cloud output is final; a missing confidence is not a reason to doubt it.
const CLOUD_DEFAULT_CONFIDENCE: f64 = 1.0;

// ============ Disabled ============

/// A tier that is switched off in configuration.
pub struct DisabledInference;

#[async_trait]
impl InferenceService for DisabledInference {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn infer(
        &self,
        _window: &Window,
        mode: InferenceSource,
    ) -> Result<InferenceOutput, InferenceError> {
        Err(InferenceError::Unavailable(format!(
            "{} inference provider is disabled",
            mode
        )))
    }
}

// ============ Ollama ============

/// On-device inference through an Ollama-compatible runtime.
pub struct OllamaInference {
    client: reqwest::Client,
    name: String,
    model: String,
    endpoint: String,
    max_retries: u32,
}

impl OllamaInference {
    pub fn new(config: &LocalInferenceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            name: format!("ollama:{}", config.model),
            model: config.model.clone(),
            endpoint: format!("{}/api/chat", config.url.trim_end_matches('/')),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl InferenceService for OllamaInference {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(
        &self,
        window: &Window,
        _mode: InferenceSource,
    ) -> Result<InferenceOutput, InferenceError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "options": { "temperature": 0 },
            "messages": [
                { "role": "system", "content": FORENSIC_INSTRUCTION },
                { "role": "user", "content": build_prompt(window) },
            ],
        });

        let json = send_with_retry(&self.name, self.max_retries, || {
            self.client.post(&self.endpoint).json(&body)
        })
        .await?;
        let content = ollama_content(&json)?;
        Ok(parse_model_reply(content, LOCAL_DEFAULT_CONFIDENCE))
    }
}

fn ollama_content(json: &serde_json::Value) -> Result<&str, InferenceError> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| InferenceError::Malformed("missing message.content".to_string()))
}

// ============ OpenAI ============

/// Cloud inference through an OpenAI-compatible chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiInference {
    client: reqwest::Client,
    name: String,
    model: String,
    endpoint: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiInference {
    pub fn new(config: &CloudInferenceConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("inference.cloud.model required for OpenAI provider"))?;

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            name: format!("openai:{}", model),
            model,
            endpoint: format!("{}/v1/chat/completions", config.url.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl InferenceService for OpenAiInference {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(
        &self,
        window: &Window,
        _mode: InferenceSource,
    ) -> Result<InferenceOutput, InferenceError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": FORENSIC_INSTRUCTION },
                { "role": "user", "content": build_prompt(window) },
            ],
        });

        let json = send_with_retry(&self.name, self.max_retries, || {
            self.client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
        })
        .await?;
        let content = openai_content(&json)?;
        Ok(parse_model_reply(content, CLOUD_DEFAULT_CONFIDENCE))
    }
}

fn openai_content(json: &serde_json::Value) -> Result<&str, InferenceError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| InferenceError::Malformed("missing choices[0].message.content".to_string()))
}

// ============ Transport ============

/// Send a request built by `build`, retrying transient failures.
async fn send_with_retry<F>(
    provider: &str,
    max_retries: u32,
    build: F,
) -> Result<serde_json::Value, InferenceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(provider, attempt, delay_secs = delay.as_secs(), "retrying inference");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| InferenceError::Malformed(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} returned {}: {}", provider, status, body_text));
                    continue;
                }

                // Client error (not 429): don't retry
                return Err(InferenceError::Rejected(format!(
                    "{} returned {}: {}",
                    provider, status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(format!("{}: {}", provider, e));
                continue;
            }
        }
    }

    Err(InferenceError::Unavailable(last_err.unwrap_or_else(|| {
        format!("{}: inference failed after retries", provider)
    })))
}

// ============ Factory ============

/// Build the local tier.
///
/// | Config Value | Service |
/// |-------------|---------|
/// | `"disabled"` | [`DisabledInference`] |
/// | `"ollama"` | [`OllamaInference`] |
pub fn create_local(config: &LocalInferenceConfig) -> Result<Arc<dyn InferenceService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledInference)),
        "ollama" => Ok(Arc::new(OllamaInference::new(config)?)),
        other => bail!("Unknown local inference provider: {}", other),
    }
}

/// Build the cloud tier, or `None` when it is disabled.
///
/// | Config Value | Service |
/// |-------------|---------|
/// | `"disabled"` | none |
/// | `"openai"` | [`OpenAiInference`] |
pub fn create_cloud(config: &CloudInferenceConfig) -> Result<Option<Arc<dyn InferenceService>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAiInference::new(config)?))),
        other => bail!("Unknown cloud inference provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_analyst_core::models::{FindingCategory, Message, Severity};

    fn window() -> Window {
        Window {
            index: 0,
            file_id: "f".into(),
            start: 0,
            messages: vec![Message {
                index: 0,
                file_id: "f".into(),
                sender: "Alex".into(),
                timestamp: None,
                text: "hello".into(),
                line: 1,
            }],
        }
    }

    #[tokio::test]
    async fn disabled_tier_is_unavailable() {
        let err = DisabledInference
            .infer(&window(), InferenceSource::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(_)));
    }

    #[test]
    fn ollama_reply_is_read_from_message_content() {
        let json = serde_json::json!({
            "model": "m",
            "message": {
                "role": "assistant",
                "content": "{\"category\":\"abuse\",\"severity\":\"high\",\"rationale\":\"Sender threatens to withhold wages unless obeyed.\",\"confidence\":0.8}"
            },
            "done": true
        });
        let out = parse_model_reply(ollama_content(&json).unwrap(), LOCAL_DEFAULT_CONFIDENCE);
        assert_eq!(out.category, Some(FindingCategory::Abuse));
        assert_eq!(out.severity_hint, Some(Severity::High));
        assert!((out.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn openai_reply_is_read_from_first_choice() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"no_findings\": true}" } }]
        });
        let out = parse_model_reply(openai_content(&json).unwrap(), CLOUD_DEFAULT_CONFIDENCE);
        assert!(out.no_findings);
        assert!((out.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_content_is_malformed() {
        let json = serde_json::json!({ "error": "model not found" });
        assert!(matches!(
            ollama_content(&json),
            Err(InferenceError::Malformed(_))
        ));
        assert!(matches!(
            openai_content(&json),
            Err(InferenceError::Malformed(_))
        ));
    }

    #[test]
    fn factory_respects_provider_names() {
        let local = LocalInferenceConfig {
            provider: "disabled".into(),
            ..LocalInferenceConfig::default()
        };
        assert_eq!(create_local(&local).unwrap().name(), "disabled");

        let ollama = LocalInferenceConfig::default();
        assert_eq!(
            create_local(&ollama).unwrap().name(),
            format!("ollama:{}", ollama.model)
        );

        assert!(create_cloud(&CloudInferenceConfig::default())
            .unwrap()
            .is_none());
    }
}
