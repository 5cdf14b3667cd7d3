//! Error types for orco-llm

use thiserror::Error;

/// LLM error type, realizing the transport/parse/validation slice of the
/// orchestrator's error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured (missing endpoint/model/credential).
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The LLM endpoint returned a non-2xx, non-429, non-5xx response body
    /// we couldn't otherwise classify.
    #[error("api error: {0}")]
    Api(String),

    /// HTTP 429 or a recognized `{error:{code:"RATE_LIMIT"}}` body. Retried
    /// by [`crate::llm_client::LlmClient`] with exponential backoff.
    #[error("rate limit exceeded")]
    RateLimit,

    /// HTTP 5xx from the endpoint.
    #[error("server error: {0}")]
    ServerError(String),

    /// Connection refused, DNS failure, or other transport-level fault.
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded its configured timeout.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Response content could not be parsed into JSON after sanitization.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A tool-call plan failed schema/tool-catalog validation after all
    /// self-correction rounds were exhausted.
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    /// Retry/fallback budget exhausted without a usable response.
    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
