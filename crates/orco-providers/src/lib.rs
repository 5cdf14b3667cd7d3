//! Capability providers for the orco task orchestrator.
//!
//! This crate provides:
//! - `provider`: the external capability contract ([`Provider`]) every tool
//!   source — in-process or MCP — is adapted to.
//! - `registry`/`builtins`/`local`: in-process tools and the
//!   [`LocalProvider`] adapter wrapping them.
//! - `mcp`/`mcp_provider`: the MCP JSON-RPC transport and its [`Provider`]
//!   adapter.
//! - `provider_registry`: the live, ready-aware tool catalog the
//!   orchestrator queries and calls through.
//! - `executor`: sequential, throttled invocation of a plan's tool-calls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builtins;
pub mod error;
pub mod executor;
pub mod local;
pub mod mcp;
pub mod mcp_provider;
pub mod provider;
pub mod provider_registry;
pub mod registry;
pub mod throttle;

pub use builtins::register_builtins;
pub use error::{Error, Result};
pub use executor::{CallOutcome, ExecutionSummary, PlannedCall, TimeoutPolicy, ToolExecutor};
pub use local::LocalProvider;
pub use mcp_provider::McpProvider;
pub use provider::{MemoryProvider, Provider, Tool, ToolCallResult};
pub use provider_registry::{CorrectionRule, ProviderRegistry};
pub use registry::{
    RiskLevel, Tool as LocalTool, ToolCategory, ToolDefinition, ToolRegistry,
    ToolResult as LocalToolResult,
};
pub use throttle::{Priority, Throttle, ThrottlePermit};
