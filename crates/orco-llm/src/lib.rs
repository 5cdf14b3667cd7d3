//! LLM provider abstraction for the orco task orchestrator.
//!
//! Exactly one LLM service is configured per deployment, reached through a
//! primary/fallback pair of [`router::HttpProvider`] endpoints. This crate
//! wraps that endpoint with:
//! - retry, endpoint fallback, and model fallback ([`llm_client::LlmClient`]);
//! - a priority-aware call throttle ([`throttle`]);
//! - response sanitization and JSON extraction ([`sanitize`]);
//! - schema-constrained tool-call planning with bounded self-correction
//!   ([`schema::SchemaConstrainer`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod completion;
pub mod error;
pub mod llm_client;
pub mod message;
pub mod router;
pub mod sanitize;
pub mod schema;
pub mod throttle;

pub use completion::{CompletionRequest, CompletionResponse, TokenUsage};
pub use error::{Error, Result};
pub use llm_client::{CallCounter, LlmClient, ModelConfig};
pub use message::{ImageContent, Message, MessageRole};
pub use router::{HttpProvider, HttpProviderConfig, LlmProvider, MockProvider};
pub use sanitize::extract_json_candidate;
pub use schema::{
    NoopCorrector, ParameterCorrector, PlannedToolCall, SchemaConstrainer, ToolCallPlan,
    ToolCatalogEntry, ValidationError,
};
pub use throttle::{Priority, Throttle, ThrottlePermit};
