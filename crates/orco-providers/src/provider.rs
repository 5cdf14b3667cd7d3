//! The external capability-provider contract.
//!
//! A provider is an out-of-process tool source: it lists its tools once
//! (cached by [`ProviderRegistry`]) and executes them by name thereafter.
//! This is the seam the orchestrator actually talks to — [`McpProvider`]
//! (`crate::mcp_provider`) and [`LocalProvider`] (`crate::local`) are the
//! two concrete adapters shipped here.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One tool advertised by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Owning provider/server name.
    pub server: String,
    /// Tool name within that provider.
    pub name: String,
    /// One-line human description, used in prompt summaries.
    #[serde(default)]
    pub description: String,
    /// JSON-Schema for the tool's call parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl Tool {
    /// The `server__tool` identifier used across the orchestrator's
    /// schema-constrained planning and event payloads.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}__{}", self.server, self.name)
    }
}

/// The result of a single `call_tool` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Whether the provider reports success.
    pub success: bool,
    /// Output payload on success.
    #[serde(default)]
    pub output: serde_json::Value,
    /// Error message on failure.
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolCallResult {
    /// Construct a success result.
    #[must_use]
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    /// Construct a failure result.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// An external capability provider: lists its tools and executes them.
///
/// `ready` must be cheap and synchronous — [`ProviderRegistry`] checks it
/// before every invocation (spec: "a tool is eligible for invocation only
/// if its provider is ready").
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Provider/server name, used as the `server` half of `server__tool`.
    fn name(&self) -> &str;

    /// Whether the provider can currently serve calls.
    fn ready(&self) -> bool;

    /// List this provider's tools. Implementations may cache internally;
    /// [`ProviderRegistry`] also caches the aggregate result.
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    /// Invoke one tool by name with the given parameters.
    async fn call_tool(&self, tool: &str, params: serde_json::Value) -> Result<ToolCallResult>;
}

/// The memory provider offers two fixed tools beyond the generic contract.
/// Implemented as a thin convenience wrapper over any [`Provider`] whose
/// tool catalog happens to include `search_nodes`/`create_entities` — no
/// special-cased transport, per the design note this crate is grounded on.
#[async_trait::async_trait]
pub trait MemoryProvider: Provider {
    /// `search_nodes({query, limit}) -> {nodes|entities[], relations[]}`.
    async fn search_nodes(&self, query: &str, limit: usize) -> Result<serde_json::Value> {
        self.call_tool(
            "search_nodes",
            serde_json::json!({ "query": query, "limit": limit }),
        )
        .await
        .map(|r| r.output)
    }

    /// `create_entities({entities: [{name, entityType, observations[]}]})`.
    async fn create_entities(&self, entities: serde_json::Value) -> Result<()> {
        self.call_tool("create_entities", serde_json::json!({ "entities": entities }))
            .await?;
        Ok(())
    }
}

impl<T: Provider + ?Sized> MemoryProvider for T {}
