//! [`Provider`] adapter over a single MCP server connection.

use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{Error, Result};
use crate::mcp::{McpClient, McpContent, McpServerConfig};
use crate::provider::{Provider, Tool, ToolCallResult};

/// Wraps one MCP server connection (managed by an [`McpClient`] holding
/// only that server) as a [`Provider`]. `ready()` reflects the underlying
/// transport's connection state, not just whether `new` succeeded.
pub struct McpProvider {
    server: String,
    client: RwLock<McpClient>,
}

impl McpProvider {
    /// Connect to `config.name` and wrap it as a provider of the same name.
    pub async fn connect(config: McpServerConfig) -> Result<Self> {
        let server = config.name.clone();
        let mut client = McpClient::new();
        client
            .add_server(config)
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("{server}: {e}")))?;
        Ok(Self {
            server,
            client: RwLock::new(client),
        })
    }
}

#[async_trait::async_trait]
impl Provider for McpProvider {
    fn name(&self) -> &str {
        &self.server
    }

    fn ready(&self) -> bool {
        self.client
            .try_read()
            .map(|c| c.is_connected(&self.server))
            .unwrap_or(false)
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let client = self.client.read().await;
        let tools = client
            .list_server_tools(&self.server)
            .await
            .map_err(|e| Error::Execution(e.to_string()))?;
        Ok(tools
            .into_iter()
            .map(|t| Tool {
                server: self.server.clone(),
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect())
    }

    async fn call_tool(&self, tool: &str, params: serde_json::Value) -> Result<ToolCallResult> {
        let client = self.client.read().await;
        let result = client
            .call_tool(&self.server, tool, params)
            .await
            .map_err(|e| Error::Execution(e.to_string()))?;

        let text = result
            .content
            .iter()
            .filter_map(McpContent::as_text)
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error {
            return Ok(ToolCallResult::failure(if text.is_empty() {
                "MCP tool call returned an error".to_string()
            } else {
                text
            }));
        }

        if text.is_empty() {
            warn!(server = %self.server, tool, "MCP result had no text content");
        }
        Ok(ToolCallResult::success(serde_json::Value::String(text)))
    }
}

#[cfg(test)]
mod tests {
    // McpProvider::connect spawns a real child process, so it's exercised
    // through the ToolExecutor integration path rather than unit-tested
    // here with a fake server. McpContent text-joining logic is covered
    // by orco_providers::mcp::protocol's own tests.
}
