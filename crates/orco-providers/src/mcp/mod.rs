//! MCP (Model Context Protocol) client.
//!
//! Connects to external MCP servers over JSON-RPC 2.0. [`crate::mcp_provider::McpProvider`]
//! wraps a single server connection as a [`crate::provider::Provider`].
//!
//! ## Supported Transports
//!
//! - **stdio**: Spawns a child process and communicates via stdin/stdout (JSON-RPC)
//! - **sse**: Server-Sent Events over HTTP (planned)
//!
//! ## Usage
//!
//! ```no_run
//! use orco_providers::mcp::{McpClient, McpServerConfig, McpTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = McpServerConfig {
//!     name: "filesystem".to_string(),
//!     transport: McpTransport::Stdio {
//!         command: "npx".to_string(),
//!         args: vec!["-y".to_string(), "@anthropic/mcp-server-filesystem".to_string()],
//!         env: Default::default(),
//!     },
//!     auto_start: true,
//! };
//!
//! let mut client = McpClient::new();
//! client.add_server(config).await?;
//!
//! let tools = client.list_tools().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod protocol;
mod transport;

pub use client::{McpClient, McpClientConfig};
pub use protocol::{
    McpContent, McpError, McpRequest, McpResponse, McpResult, McpTool, McpToolCall, McpToolResult,
};
pub use transport::{McpServerConfig, McpTransport};
