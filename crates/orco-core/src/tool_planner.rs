//! §4.9 ToolPlanner — turns one item into a validated, schema-constrained
//! sequence of tool-calls, with a deterministic fallback when the LLM
//! path is exhausted.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{instrument, warn};

use orco_llm::{
    LlmClient, Message, ModelConfig, NoopCorrector, ParameterCorrector, Priority, SchemaConstrainer,
    ToolCallPlan, ToolCatalogEntry,
};
use orco_providers::{CorrectionRule, PlannedCall, ProviderRegistry, Tool};

use crate::error::Result;
use crate::plan::Item;
use crate::provider_selector::ProviderSelection;

/// Planning templates are opaque prompt text keyed by name (§4.8's
/// `selected_prompts`); this crate does not interpret their contents
/// beyond the two named placeholders.
fn template_for(name: &str) -> &'static str {
    match name {
        "filesystem" => {
            "You plan filesystem tool-calls. Available tools:\n{{AVAILABLE_TOOLS}}\nRespond in \
             {{USER_LANGUAGE}}. Produce a JSON tool_calls plan to accomplish the item."
        }
        "shell" => {
            "You plan shell-command tool-calls. Available tools:\n{{AVAILABLE_TOOLS}}\nRespond in \
             {{USER_LANGUAGE}}. Produce a JSON tool_calls plan to accomplish the item."
        }
        "browser" => {
            "You plan browser-automation tool-calls. Available tools:\n{{AVAILABLE_TOOLS}}\nRespond \
             in {{USER_LANGUAGE}}. Produce a JSON tool_calls plan to accomplish the item."
        }
        _ => {
            "You plan tool-calls to accomplish an item. Available tools:\n{{AVAILABLE_TOOLS}}\n\
             Respond in {{USER_LANGUAGE}}. Produce a JSON tool_calls plan to accomplish the item. \
             If the item can be answered directly with no tools, return a direct_result instead."
        }
    }
}

fn render_template(template: &str, tools_summary: &str, user_language: &str) -> String {
    template
        .replace("{{AVAILABLE_TOOLS}}", tools_summary)
        .replace("{{USER_LANGUAGE}}", user_language)
}

/// Applies [`ProviderRegistry`]'s cached `x-aliases` renames to planned
/// parameters. Snapshotted once per planning attempt since
/// [`orco_llm::ParameterCorrector::correct`] is synchronous and the
/// registry's rules live behind an async lock.
struct RegistryCorrector<'a> {
    rules: &'a [CorrectionRule],
}

impl ParameterCorrector for RegistryCorrector<'_> {
    fn correct(&self, server: &str, tool: &str, mut parameters: Value) -> Value {
        let qualified = format!("{server}__{tool}");
        if let Some(obj) = parameters.as_object_mut() {
            for rule in self.rules.iter().filter(|r| r.tool == qualified) {
                if let Some(value) = obj.remove(&rule.from) {
                    obj.insert(rule.to.clone(), value);
                }
            }
        }
        parameters
    }
}

/// Produces the validated `ToolCallPlan` for one item.
pub struct ToolPlanner<'a> {
    client: &'a LlmClient,
    config: &'a ModelConfig,
    registry: &'a ProviderRegistry,
    app_paths: &'a HashMap<String, String>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<'a> ToolPlanner<'a> {
    /// Build a tool planner. `max_attempts`/`retry_delay` back §4.9's
    /// per-stage retry ("up to 3 attempts... with a small fixed delay").
    #[must_use]
    pub fn new(
        client: &'a LlmClient,
        config: &'a ModelConfig,
        registry: &'a ProviderRegistry,
        app_paths: &'a HashMap<String, String>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            config,
            registry,
            app_paths,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Plan tool-calls for `item` given the providers/template chosen by
    /// [`crate::provider_selector::ProviderSelector`]. Never fails: on
    /// total exhaustion of the retry budget it returns a deterministic
    /// fallback plan rather than propagating the error, so the executor
    /// always has something runnable.
    #[instrument(skip(self, item, selection), fields(action = %item.action))]
    pub async fn plan(&self, item: &Item, selection: &ProviderSelection, user_language: &str) -> Result<ToolCallPlan> {
        let catalog = self.build_catalog(&selection.selected_servers).await;
        let rules = self.registry.correction_rules().await;
        let corrector = RegistryCorrector { rules: &rules };

        let template_name = selection.selected_prompts.first().map(String::as_str).unwrap_or("default");
        let tools_summary = self.registry.tools_summary(
            &catalog
                .iter()
                .map(|c| Tool {
                    server: c.server.clone(),
                    name: c.tool.clone(),
                    description: String::new(),
                    input_schema: c.input_schema.clone(),
                })
                .collect::<Vec<_>>(),
        );
        let prompt = render_template(template_for(template_name), &tools_summary, user_language);
        let messages = vec![Message::system(prompt), Message::user(format!(
            "Action: {}\nSuccess criteria: {}",
            item.action, item.success_criteria
        ))];

        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            let constrainer = SchemaConstrainer::new(&catalog);
            match constrainer
                .plan_with_correction(self.client, self.config, messages.clone(), &corrector, Priority::Normal)
                .await
            {
                Ok(plan) => {
                    let sanitized = sanitize_plan(plan, &catalog);
                    let finalized = if sanitized.direct_result.is_none() && sanitized.tool_calls.is_empty() {
                        deterministic_fallback(item, self.app_paths)
                    } else {
                        sanitized
                    };
                    return Ok(finalized);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "tool planning attempt failed");
                    last_err = Some(e);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        warn!(error = ?last_err, "tool planning exhausted retry budget; using deterministic fallback");
        Ok(deterministic_fallback(item, self.app_paths))
    }

    async fn build_catalog(&self, servers: &[String]) -> Vec<ToolCatalogEntry> {
        let subset: Vec<String> = servers.to_vec();
        self.registry
            .list_tools(Some(&subset))
            .await
            .into_iter()
            .map(|t| ToolCatalogEntry {
                server: t.server,
                tool: t.name,
                input_schema: t.input_schema,
            })
            .collect()
    }
}

/// Converts a validated [`ToolCallPlan`] into the executor's call list.
#[must_use]
pub fn to_planned_calls(plan: &ToolCallPlan) -> Vec<PlannedCall> {
    plan.tool_calls
        .iter()
        .map(|c| PlannedCall {
            server: c.server.clone(),
            tool: c.tool.clone(),
            parameters: c.parameters.clone(),
        })
        .collect()
}

/// Drops calls that reference a server/tool outside the active catalog,
/// first trying to re-infer a missing server from a `server__tool`-shaped
/// tool name.
fn sanitize_plan(mut plan: ToolCallPlan, catalog: &[ToolCatalogEntry]) -> ToolCallPlan {
    plan.tool_calls.retain_mut(|call| {
        if call.server.is_empty() {
            if let Some((server, tool)) = call.tool.split_once("__") {
                call.server = server.to_string();
                call.tool = tool.to_string();
            }
        }
        let known = catalog.iter().any(|c| c.server == call.server && c.tool == call.tool);
        if !known {
            warn!(server = %call.server, tool = %call.tool, "dropping tool-call outside active catalog");
        }
        known
    });
    plan
}

/// §4.9 step 6: when the LLM path yields nothing usable, fall back to a
/// small set of keyword-matched deterministic plans rather than leaving
/// the item with no calls at all.
fn deterministic_fallback(item: &Item, app_paths: &HashMap<String, String>) -> ToolCallPlan {
    let action = item.action.to_lowercase();

    if let Some(app_name) = action.strip_prefix("open ").map(str::trim) {
        if let Some((_, path)) = app_paths.iter().find(|(name, _)| app_name.contains(&name.to_lowercase())) {
            return ToolCallPlan {
                tool_calls: vec![orco_llm::PlannedToolCall {
                    server: "platform".to_string(),
                    tool: "launch_app".to_string(),
                    parameters: serde_json::json!({ "path": path }),
                }],
                reasoning: format!("opening known application '{app_name}' via deterministic fallback"),
                direct_result: None,
            };
        }
    }

    if action.contains("create") && (action.contains("directory") || action.contains("folder")) {
        const STANDARD_LOCATIONS: &[(&str, &str)] =
            &[("desktop", "~/Desktop"), ("documents", "~/Documents"), ("downloads", "~/Downloads"), ("home", "~")];
        if let Some((_, base)) = STANDARD_LOCATIONS.iter().find(|(name, _)| action.contains(name)) {
            return ToolCallPlan {
                tool_calls: vec![orco_llm::PlannedToolCall {
                    server: "fs".to_string(),
                    tool: "create_directory".to_string(),
                    parameters: serde_json::json!({ "path": base }),
                }],
                reasoning: "creating directory at a standard location via deterministic fallback".to_string(),
                direct_result: None,
            };
        }
    }

    ToolCallPlan {
        tool_calls: Vec::new(),
        reasoning: "no tools needed".to_string(),
        direct_result: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orco_llm::{MockProvider, Throttle};
    use orco_providers::{Provider, ToolCallResult};
    use std::sync::Arc;

    struct StubProvider {
        name: String,
        tools: Vec<Tool>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }
        fn ready(&self) -> bool {
            true
        }
        async fn list_tools(&self) -> orco_providers::Result<Vec<Tool>> {
            Ok(self.tools.clone())
        }
        async fn call_tool(&self, tool: &str, _params: Value) -> orco_providers::Result<ToolCallResult> {
            Ok(ToolCallResult::success(serde_json::json!({ "tool": tool })))
        }
    }

    async fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider {
            name: "fs".into(),
            tools: vec![Tool {
                server: "fs".into(),
                name: "write_file".into(),
                description: "writes a file".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "required": ["path", "content"],
                    "properties": {"path": {"type": "string"}, "content": {"type": "string"}}
                }),
            }],
        }));
        registry.refresh().await.unwrap();
        registry
    }

    fn client(body: &str) -> LlmClient {
        let provider = MockProvider::with_responses("mock", "planner-model", vec![Ok(body.to_string())]);
        let throttle = Throttle::spawn(Duration::from_millis(1), 4);
        LlmClient::new(Box::new(provider), None, throttle)
    }

    fn model_config() -> ModelConfig {
        ModelConfig {
            model: "planner-model".into(),
            fallback_model: None,
            temperature: Some(0.1),
            max_tokens: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn plans_a_valid_tool_call() {
        let registry = registry().await;
        let body = r#"{"tool_calls":[{"server":"fs","tool":"write_file","parameters":{"path":"/tmp/a.txt","content":"x"}}],"reasoning":"writing file"}"#;
        let client = client(body);
        let config = model_config();
        let app_paths = HashMap::new();
        let planner = ToolPlanner::new(&client, &config, &registry, &app_paths, 3, Duration::from_millis(1));

        let item = Item::new(orco_ids::HierarchicalId::root(1), "create /tmp/a.txt", "file exists", vec![], 1);
        let selection = ProviderSelection {
            selected_servers: vec!["fs".to_string()],
            selected_prompts: vec!["filesystem".to_string()],
            confidence: 1.0,
        };
        let plan = planner.plan(&item, &selection, "en").await.unwrap();
        assert_eq!(plan.tool_calls.len(), 1);
        assert_eq!(plan.tool_calls[0].server, "fs");
    }

    #[tokio::test]
    async fn falls_back_deterministically_when_action_opens_known_app() {
        let registry = ProviderRegistry::new();
        let client = client("not json");
        let config = model_config();
        let mut app_paths = HashMap::new();
        app_paths.insert("calculator".to_string(), "/usr/bin/calc".to_string());
        let planner = ToolPlanner::new(&client, &config, &registry, &app_paths, 1, Duration::from_millis(1));

        let item = Item::new(orco_ids::HierarchicalId::root(1), "open Calculator", "calculator is open", vec![], 1);
        let selection = ProviderSelection {
            selected_servers: vec![],
            selected_prompts: vec![],
            confidence: 0.0,
        };
        let plan = planner.plan(&item, &selection, "en").await.unwrap();
        assert_eq!(plan.tool_calls.len(), 1);
        assert_eq!(plan.tool_calls[0].server, "platform");
    }

    #[tokio::test]
    async fn falls_back_to_empty_plan_with_no_match() {
        let registry = ProviderRegistry::new();
        let client = client("not json");
        let config = model_config();
        let app_paths = HashMap::new();
        let planner = ToolPlanner::new(&client, &config, &registry, &app_paths, 1, Duration::from_millis(1));

        let item = Item::new(orco_ids::HierarchicalId::root(1), "think about the answer", "answer given", vec![], 1);
        let selection = ProviderSelection {
            selected_servers: vec![],
            selected_prompts: vec![],
            confidence: 0.0,
        };
        let plan = planner.plan(&item, &selection, "en").await.unwrap();
        assert!(plan.tool_calls.is_empty());
        assert_eq!(plan.reasoning, "no tools needed");
    }

    #[test]
    fn sanitize_plan_drops_unknown_and_reinfers_missing_server() {
        let catalog = vec![ToolCatalogEntry {
            server: "fs".into(),
            tool: "write_file".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let plan = ToolCallPlan {
            tool_calls: vec![
                orco_llm::PlannedToolCall { server: String::new(), tool: "fs__write_file".into(), parameters: serde_json::json!({}) },
                orco_llm::PlannedToolCall { server: "ghost".into(), tool: "anything".into(), parameters: serde_json::json!({}) },
            ],
            reasoning: String::new(),
            direct_result: None,
        };
        let sanitized = sanitize_plan(plan, &catalog);
        assert_eq!(sanitized.tool_calls.len(), 1);
        assert_eq!(sanitized.tool_calls[0].server, "fs");
    }
}
