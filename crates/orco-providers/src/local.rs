//! In-process [`Provider`] adapter over [`ToolRegistry`].

use std::time::Instant;

use tracing::debug;

use crate::error::Result;
use crate::provider::{Provider, Tool, ToolCallResult};
use crate::registry::ToolRegistry;

/// Wraps an in-process [`ToolRegistry`] as an out-of-process-shaped
/// [`Provider`]. Always `ready`: in-process tools have no connection state.
pub struct LocalProvider {
    name: String,
    registry: ToolRegistry,
}

impl LocalProvider {
    /// Wrap `registry` as a provider named `name` (used as the `server`
    /// half of every tool's qualified name).
    #[must_use]
    pub fn new(name: impl Into<String>, registry: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            registry,
        }
    }
}

#[async_trait::async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        true
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(self
            .registry
            .list_enabled()
            .into_iter()
            .map(|def| Tool {
                server: self.name.clone(),
                name: def.name.clone(),
                description: def.description.clone(),
                input_schema: def.parameters.clone(),
            })
            .collect())
    }

    async fn call_tool(&self, tool: &str, params: serde_json::Value) -> Result<ToolCallResult> {
        let Some(handle) = self.registry.get(tool) else {
            return Ok(ToolCallResult::failure(format!(
                "tool not registered: {tool}"
            )));
        };
        handle.validate_input(&params)?;
        debug!(tool, provider = %self.name, "executing local tool");
        let started = Instant::now();
        let result = handle.execute(params).await;
        let elapsed = started.elapsed().as_millis() as u64;
        match result {
            Ok(r) if r.success => Ok(ToolCallResult::success(r.output)),
            Ok(r) => Ok(ToolCallResult::failure(
                r.error.unwrap_or_else(|| "tool reported failure".into()),
            )),
            Err(e) => {
                debug!(tool, error = %e, elapsed_ms = elapsed, "local tool failed");
                Ok(ToolCallResult::failure(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RiskLevel, ToolCategory, ToolDefinition, ToolResult};
    use std::sync::Arc;

    struct EchoTool(ToolDefinition);

    #[async_trait::async_trait]
    impl crate::registry::Tool for EchoTool {
        fn definition(&self) -> &ToolDefinition {
            &self.0
        }
        async fn execute(&self, input: serde_json::Value) -> Result<ToolResult> {
            Ok(ToolResult::success(input, 1))
        }
    }

    fn registry_with_echo() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool(
            ToolDefinition::new("echo", "echoes input")
                .with_category(ToolCategory::Utility)
                .with_risk_level(RiskLevel::Low),
        )));
        registry
    }

    #[tokio::test]
    async fn list_tools_maps_registry_definitions() {
        let provider = LocalProvider::new("local", registry_with_echo());
        let tools = provider.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].server, "local");
        assert_eq!(tools[0].qualified_name(), "local__echo");
    }

    #[tokio::test]
    async fn call_tool_executes_and_wraps_result() {
        let provider = LocalProvider::new("local", registry_with_echo());
        let result = provider
            .call_tool("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn call_tool_reports_failure_for_unknown_tool() {
        let provider = LocalProvider::new("local", registry_with_echo());
        let result = provider.call_tool("nope", serde_json::json!({})).await.unwrap();
        assert!(!result.success);
    }

    #[test]
    fn always_ready() {
        let provider = LocalProvider::new("local", ToolRegistry::new());
        assert!(provider.ready());
    }
}
