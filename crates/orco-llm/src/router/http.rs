//! A single generic HTTP adapter against a chat-completions wire contract:
//! `POST {model, messages, temperature, max_tokens, response_format?}`,
//! response `choices[0].message.content` (or `choices[0].text`).
//!
//! This is intentionally the *only* vendor adapter in this crate — the
//! orchestrator treats "the LLM service" as a single synchronous HTTP
//! endpoint, not a multi-vendor router. [`crate::llm_client::LlmClient`] is what adds retry,
//! endpoint fallback, and model fallback on top of two [`HttpProvider`]
//! instances (primary/fallback).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::{Error, Result};

use super::provider::LlmProvider;

/// Configuration for a single HTTP endpoint adapter.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Provider name, used only for logging/diagnostics.
    pub name: String,
    /// Base URL of the chat-completions endpoint.
    pub endpoint: String,
    /// Bearer credential, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Model name sent in the request body and returned by [`LlmProvider::default_model`].
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Generic HTTP chat-completions adapter.
pub struct HttpProvider {
    config: HttpProviderConfig,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Build a new adapter from config, constructing its own `reqwest::Client`.
    #[must_use]
    pub fn new(config: HttpProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn post(&self, body: &WireRequest) -> Result<WireResponse> {
        let mut req = self.client.post(&self.config.endpoint).json(body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(classify_transport_error)?;
        let status = resp.status();

        if status.as_u16() == 429 {
            return Err(Error::RateLimit);
        }
        if status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::ServerError(format!("{status}: {text}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            // Some vendors signal rate limiting via a 4xx body rather than 429.
            if text.contains("RATE_LIMIT") || text.to_lowercase().contains("rate limit") {
                return Err(Error::RateLimit);
            }
            return Err(Error::Api(format!("{status}: {text}")));
        }

        resp.json::<WireResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn available_models(&self) -> Vec<String> {
        vec![self.config.model.clone()]
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let wire = WireRequest::from_completion(&request);
        let response = self.post(&wire).await?;
        let content = response.content().ok_or_else(|| {
            Error::InvalidResponse("response had no choices[0].message.content".into())
        })?;
        debug!(provider = %self.config.name, model = %request.model, "completion received");
        Ok(CompletionResponse {
            content,
            usage: response.usage.map(Into::into),
            finish_reason: response.choices.first().and_then(|c| c.finish_reason.clone()),
            model: request.model,
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(0)
    } else if e.is_connect() {
        Error::Network(e.to_string())
    } else {
        Error::Network(e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

impl WireRequest {
    fn from_completion(request: &CompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.response_format.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

impl WireResponse {
    fn content(&self) -> Option<String> {
        let choice = self.choices.first()?;
        choice
            .message
            .as_ref()
            .map(|m| m.content.clone())
            .or_else(|| choice.text.clone())
    }
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireChoiceMessage>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<WireUsage> for crate::completion::TokenUsage {
    fn from(u: WireUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn wire_request_carries_response_format() {
        let req = CompletionRequest::new("m")
            .with_message(Message::user("hi"))
            .with_response_format(serde_json::json!({"type": "object"}));
        let wire = WireRequest::from_completion(&req);
        assert!(wire.response_format.is_some());
        assert_eq!(wire.messages.len(), 1);
    }

    #[test]
    fn wire_response_prefers_message_content_over_text() {
        let resp = WireResponse {
            choices: vec![WireChoice {
                message: Some(WireChoiceMessage {
                    content: "from message".into(),
                }),
                text: Some("from text".into()),
                finish_reason: None,
            }],
            usage: None,
        };
        assert_eq!(resp.content().as_deref(), Some("from message"));
    }

    #[test]
    fn wire_response_falls_back_to_text() {
        let resp = WireResponse {
            choices: vec![WireChoice {
                message: None,
                text: Some("from text".into()),
                finish_reason: None,
            }],
            usage: None,
        };
        assert_eq!(resp.content().as_deref(), Some("from text"));
    }
}
