//! LLM Provider trait definition
//!
//! This module defines the core trait that all LLM providers must implement.

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::Result;

/// Trait for LLM providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Get available models
    fn available_models(&self) -> Vec<String>;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Complete a conversation (text only). This crate configures exactly
    /// one vendor endpoint, driven through JSON-Schema-constrained plain
    /// content ([`crate::schema::SchemaConstrainer`]) rather than
    /// vendor-native function calling, so this is the only completion
    /// entry point a provider needs to implement.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
