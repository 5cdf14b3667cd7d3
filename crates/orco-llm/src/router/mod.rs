//! Router - LLM provider abstraction
//!
//! Defines the single trait an external LLM service adapter must implement.
//! There is exactly one configured provider per deployment; this module
//! does not select among several vendors. Two concrete adapters are
//! provided: [`HttpProvider`] against a generic chat-completions HTTP
//! contract, and [`MockProvider`] for tests and local exercise.

mod http;
mod mock;
mod provider;

pub use http::{HttpProvider, HttpProviderConfig};
pub use mock::MockProvider;
pub use provider::LlmProvider;
