//! Retry/fallback wrapper over a configured LLM endpoint.
//!
//! Owns the priority throttle, the primary/fallback endpoint pair, and the
//! primary/fallback model pair for one pipeline stage. [`LlmClient::complete`]
//! is the single entry point every caller (Planner, ProviderSelector,
//! ToolPlanner, Verifier, Replanner, MemoryCoordinator) goes through.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::{Error, Result};
use crate::router::LlmProvider;
use crate::sanitize::extract_json_candidate;
use crate::throttle::{Priority, Throttle};

/// Up to this many attempts per model before falling back.
const RETRY_BUDGET: u32 = 3;
/// Switch to the fallback model after this many consecutive failures on the primary.
const FAILURES_BEFORE_MODEL_FALLBACK: u32 = 2;

const RATE_LIMIT_BASE: Duration = Duration::from_secs(10);
const RATE_LIMIT_CAP: Duration = Duration::from_secs(60);
const TRANSPORT_BASE: Duration = Duration::from_secs(1);
const TRANSPORT_CAP: Duration = Duration::from_secs(10);

/// Model configuration for one pipeline stage.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Primary model name.
    pub model: String,
    /// Model to switch to after repeated primary failures.
    pub fallback_model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Max tokens to generate.
    pub max_tokens: Option<u32>,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

/// Wraps a primary endpoint and an optional fallback endpoint, both
/// implementing [`LlmProvider`], with retry/backoff/parsing on top.
pub struct LlmClient {
    primary: Box<dyn LlmProvider>,
    fallback: Option<Box<dyn LlmProvider>>,
    throttle: Throttle,
}

impl LlmClient {
    /// Build a client over a primary provider, an optional fallback
    /// endpoint, and a shared priority throttle.
    #[must_use]
    pub fn new(
        primary: Box<dyn LlmProvider>,
        fallback: Option<Box<dyn LlmProvider>>,
        throttle: Throttle,
    ) -> Self {
        Self {
            primary,
            fallback,
            throttle,
        }
    }

    /// Run a completion through retry, endpoint fallback, and model
    /// fallback, returning parsed, sanitized content.
    #[instrument(skip(self, messages), fields(model = %config.model))]
    pub async fn complete(
        &self,
        messages: Vec<crate::message::Message>,
        config: &ModelConfig,
        priority: Priority,
    ) -> Result<CompletionResponse> {
        self.complete_raw(messages, config, priority, None).await
    }

    /// Like [`Self::complete`] but attaches a JSON-Schema response format
    /// constraint, used by [`crate::schema::SchemaConstrainer`].
    pub async fn complete_constrained(
        &self,
        messages: Vec<crate::message::Message>,
        config: &ModelConfig,
        priority: Priority,
        response_format: serde_json::Value,
    ) -> Result<CompletionResponse> {
        self.complete_raw(messages, config, priority, Some(response_format))
            .await
    }

    async fn complete_raw(
        &self,
        messages: Vec<crate::message::Message>,
        config: &ModelConfig,
        priority: Priority,
        response_format: Option<serde_json::Value>,
    ) -> Result<CompletionResponse> {
        let models = [
            Some(config.model.clone()),
            config.fallback_model.clone(),
        ];

        let mut last_err: Option<Error> = None;
        for model in models.into_iter().flatten() {
            match self
                .complete_on_model(&model, messages.clone(), config, priority, response_format.clone())
                .await
            {
                Ok(resp) => {
                    let content = extract_json_candidate(&resp.content).unwrap_or(resp.content);
                    return Ok(CompletionResponse { content, ..resp });
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "model exhausted its retry budget");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(Error::BudgetExhausted("no models configured".into())))
    }

    async fn complete_on_model(
        &self,
        model: &str,
        messages: Vec<crate::message::Message>,
        config: &ModelConfig,
        priority: Priority,
        response_format: Option<serde_json::Value>,
    ) -> Result<CompletionResponse> {
        let mut endpoint_fallback_used = false;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let provider: &dyn LlmProvider = if endpoint_fallback_used {
                self.fallback.as_deref().unwrap_or(self.primary.as_ref())
            } else {
                self.primary.as_ref()
            };

            let mut request = CompletionRequest::new(model).with_messages(messages.clone());
            if let Some(t) = config.temperature {
                request = request.with_temperature(t);
            }
            if let Some(m) = config.max_tokens {
                request = request.with_max_tokens(m);
            }
            if let Some(schema) = response_format.clone() {
                request = request.with_response_format(schema);
            }

            let permit = self.throttle.acquire(priority).await;
            let result = tokio::time::timeout(config.timeout, provider.complete(request)).await;
            drop(permit);

            let outcome = match result {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout(config.timeout.as_millis() as u64)),
            };

            match outcome {
                Ok(resp) => return Ok(resp),
                Err(Error::RateLimit) => {
                    if attempt >= RETRY_BUDGET {
                        return Err(Error::RateLimit);
                    }
                    let delay = backoff_delay(RATE_LIMIT_BASE, RATE_LIMIT_CAP, attempt);
                    debug!(attempt, ?delay, "rate limited, backing off");
                    sleep(delay).await;
                }
                Err(Error::ServerError(e)) | Err(Error::Network(e)) => {
                    if !endpoint_fallback_used && self.fallback.is_some() {
                        endpoint_fallback_used = true;
                        attempt = 0;
                        continue;
                    }
                    if attempt >= RETRY_BUDGET {
                        return Err(Error::ServerError(e));
                    }
                    let delay = backoff_delay(TRANSPORT_BASE, TRANSPORT_CAP, attempt);
                    debug!(attempt, ?delay, "transport error, backing off");
                    sleep(delay).await;
                }
                Err(Error::Timeout(ms)) => {
                    if attempt >= RETRY_BUDGET {
                        return Err(Error::Timeout(ms));
                    }
                    let delay = backoff_delay(TRANSPORT_BASE, TRANSPORT_CAP, attempt);
                    sleep(delay).await;
                }
                Err(other) => return Err(other),
            }

            if attempt >= FAILURES_BEFORE_MODEL_FALLBACK && config.fallback_model.is_some() {
                return Err(Error::BudgetExhausted(format!(
                    "model {model} failed {attempt} times"
                )));
            }
        }
    }
}

fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
    exp.min(cap)
}

/// Monotonically counts completions issued, for diagnostics/metrics.
#[derive(Default)]
pub struct CallCounter(AtomicU32);

impl CallCounter {
    /// Increment and return the new count.
    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}
