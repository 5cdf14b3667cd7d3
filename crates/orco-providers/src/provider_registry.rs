//! Live inventory of providers, their tool catalog, and derived parameter
//! correction rules.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::provider::{Provider, Tool, ToolCallResult};

/// A `{from_param -> to_param}` rename, derived once from a tool's
/// `inputSchema` via its `x-aliases` vendor extension (a conventional way
/// of documenting legacy parameter names without a bespoke wire format).
#[derive(Debug, Clone)]
pub struct CorrectionRule {
    /// Qualified tool name (`server__tool`) the rule applies to.
    pub tool: String,
    /// Legacy parameter name.
    pub from: String,
    /// Current parameter name.
    pub to: String,
}

/// Holds the live set of providers, caches their combined tool catalog, and
/// derives per-tool parameter correction rules once per registry lifetime.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    tool_cache: RwLock<HashMap<String, Vec<Tool>>>,
    correction_rules: RwLock<Option<Vec<CorrectionRule>>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            tool_cache: RwLock::new(HashMap::new()),
            correction_rules: RwLock::new(None),
        }
    }

    /// Register a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        debug!(provider = %name, "registering provider");
        self.providers.insert(name, provider);
    }

    /// Whether a named provider is both registered and ready.
    #[must_use]
    pub fn is_ready(&self, server: &str) -> bool {
        self.providers
            .get(server)
            .map(|p| p.ready())
            .unwrap_or(false)
    }

    /// Registered provider names, regardless of readiness.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Refresh the cached tool list for every ready provider. Providers
    /// that error or are not ready are skipped with a warning; their
    /// previously cached tools (if any) are cleared.
    pub async fn refresh(&self) -> Result<()> {
        let mut cache = self.tool_cache.write().await;
        cache.clear();
        for (name, provider) in &self.providers {
            if !provider.ready() {
                warn!(provider = %name, "provider not ready, skipping tool refresh");
                continue;
            }
            match provider.list_tools().await {
                Ok(tools) => {
                    cache.insert(name.clone(), tools);
                }
                Err(e) => warn!(provider = %name, error = %e, "failed to list tools"),
            }
        }
        drop(cache);
        *self.correction_rules.write().await = None;
        Ok(())
    }

    /// List tools across all providers, optionally restricted to `subset`
    /// server names. A tool is included only if its provider is ready.
    pub async fn list_tools(&self, subset: Option<&[String]>) -> Vec<Tool> {
        let cache = self.tool_cache.read().await;
        cache
            .iter()
            .filter(|(server, _)| {
                subset.is_none_or(|s| s.iter().any(|x| x == *server))
            })
            .filter(|(server, _)| self.is_ready(server))
            .flat_map(|(_, tools)| tools.clone())
            .collect()
    }

    /// A compact, prompt-sized summary of the given tools: one line per
    /// tool, bounded to keep prompts small.
    #[must_use]
    pub fn tools_summary(&self, tools: &[Tool]) -> String {
        const MAX_LINES: usize = 40;
        const MAX_DESC_LEN: usize = 80;
        tools
            .iter()
            .take(MAX_LINES)
            .map(|t| {
                let desc = if t.description.len() > MAX_DESC_LEN {
                    format!("{}...", &t.description[..MAX_DESC_LEN])
                } else {
                    t.description.clone()
                };
                format!("- {}: {}", t.qualified_name(), desc)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Per-tool `{from_param -> to_param}` rename rules, derived once from
    /// each tool's `inputSchema["x-aliases"]` and cached for the registry's
    /// lifetime (invalidated by [`Self::refresh`]).
    pub async fn correction_rules(&self) -> Vec<CorrectionRule> {
        if let Some(rules) = self.correction_rules.read().await.clone() {
            return rules;
        }
        let cache = self.tool_cache.read().await;
        let mut rules = Vec::new();
        for tools in cache.values() {
            for tool in tools {
                if let Some(aliases) = tool.input_schema.get("x-aliases").and_then(|v| v.as_object()) {
                    for (from, to) in aliases {
                        if let Some(to) = to.as_str() {
                            rules.push(CorrectionRule {
                                tool: tool.qualified_name(),
                                from: from.clone(),
                                to: to.to_string(),
                            });
                        }
                    }
                }
            }
        }
        drop(cache);
        *self.correction_rules.write().await = Some(rules.clone());
        rules
    }

    /// Apply cached correction rules for `qualified_tool` to `parameters`,
    /// renaming any legacy keys found.
    pub async fn apply_corrections(
        &self,
        qualified_tool: &str,
        mut parameters: serde_json::Value,
    ) -> serde_json::Value {
        let rules = self.correction_rules().await;
        if let Some(obj) = parameters.as_object_mut() {
            for rule in rules.iter().filter(|r| r.tool == qualified_tool) {
                if let Some(value) = obj.remove(&rule.from) {
                    obj.insert(rule.to.clone(), value);
                }
            }
        }
        parameters
    }

    /// Resolve `server` and invoke `tool` with `params`, failing fast if
    /// the provider isn't registered or isn't ready.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        params: serde_json::Value,
    ) -> Result<ToolCallResult> {
        let provider = self
            .providers
            .get(server)
            .ok_or_else(|| Error::NotFound(server.to_string()))?;
        if !provider.ready() {
            return Err(Error::ProviderUnavailable(server.to_string()));
        }
        provider.call_tool(tool, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProvider {
        name: String,
        ready: AtomicBool,
        tools: Vec<Tool>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }
        fn ready(&self) -> bool {
            self.ready.load(Ordering::Relaxed)
        }
        async fn list_tools(&self) -> Result<Vec<Tool>> {
            Ok(self.tools.clone())
        }
        async fn call_tool(&self, tool: &str, _params: serde_json::Value) -> Result<ToolCallResult> {
            Ok(ToolCallResult::success(serde_json::json!({ "tool": tool })))
        }
    }

    fn tool(server: &str, name: &str) -> Tool {
        Tool {
            server: server.into(),
            name: name.into(),
            description: "a tool".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn refresh_skips_not_ready_providers() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider {
            name: "fs".into(),
            ready: AtomicBool::new(true),
            tools: vec![tool("fs", "write_file")],
        }));
        registry.register(Arc::new(StubProvider {
            name: "down".into(),
            ready: AtomicBool::new(false),
            tools: vec![tool("down", "anything")],
        }));

        registry.refresh().await.unwrap();
        let tools = registry.list_tools(None).await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].server, "fs");
    }

    #[tokio::test]
    async fn correction_rules_derived_from_x_aliases() {
        let mut registry = ProviderRegistry::new();
        let mut t = tool("fs", "write_file");
        t.input_schema = serde_json::json!({
            "type": "object",
            "x-aliases": {"file_path": "path"}
        });
        registry.register(Arc::new(StubProvider {
            name: "fs".into(),
            ready: AtomicBool::new(true),
            tools: vec![t],
        }));
        registry.refresh().await.unwrap();

        let rules = registry.correction_rules().await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].from, "file_path");
        assert_eq!(rules[0].to, "path");

        let corrected = registry
            .apply_corrections("fs__write_file", serde_json::json!({"file_path": "/tmp/x"}))
            .await;
        assert_eq!(corrected["path"], "/tmp/x");
    }

    #[tokio::test]
    async fn call_tool_fails_fast_when_not_ready() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider {
            name: "down".into(),
            ready: AtomicBool::new(false),
            tools: vec![],
        }));
        let result = registry.call_tool("down", "anything", serde_json::json!({})).await;
        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
    }
}
