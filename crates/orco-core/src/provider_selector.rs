//! §4.8 ProviderSelector — chooses 1-2 providers and a planning template
//! per item, preferring a router pre-filter over an LLM classification.

use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use orco_llm::{LlmClient, Message, ModelConfig, Priority};
use orco_providers::ProviderRegistry;

use crate::error::Result;
use crate::plan::Item;

/// Chosen providers and planning template(s) for one item.
#[derive(Debug, Clone)]
pub struct ProviderSelection {
    /// 1-2 provider/server names, all confirmed `ready`.
    pub selected_servers: Vec<String>,
    /// Specialized planning templates, one per selected server (or a
    /// single shared one).
    pub selected_prompts: Vec<String>,
    /// Confidence in `[0,1]`; `1.0` when chosen by the router pre-filter
    /// rather than classified.
    pub confidence: f64,
}

#[derive(Debug, Deserialize, Default)]
struct RawSelection {
    #[serde(default)]
    selected_servers: Vec<String>,
    #[serde(default)]
    selected_prompts: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

const SYSTEM_PROMPT: &str = "Given an item's action and the list of ready providers with their \
    tool counts, choose the 1-2 providers best suited to accomplish it, plus a specialized \
    planning template name for each. Respond as JSON: {\"selected_servers\": [\"...\"], \
    \"selected_prompts\": [\"...\"], \"confidence\": 0..1}.";

/// Picks providers for an item, consulting an optional router pre-filter
/// before falling back to LLM classification.
pub struct ProviderSelector<'a> {
    client: &'a LlmClient,
    config: &'a ModelConfig,
    registry: &'a ProviderRegistry,
}

impl<'a> ProviderSelector<'a> {
    /// Build a selector against the live registry and the classification
    /// stage's model config.
    #[must_use]
    pub fn new(client: &'a LlmClient, config: &'a ModelConfig, registry: &'a ProviderRegistry) -> Self {
        Self { client, config, registry }
    }

    /// Select providers for `item`. `router_hint` is the item's optional
    /// `provider_hint` (§3 `Item.provider_hint`).
    #[instrument(skip(self, item, router_hint), fields(action = %item.action))]
    pub async fn select(&self, item: &Item, router_hint: Option<&[String]>) -> Result<ProviderSelection> {
        if let Some(hint) = router_hint {
            let ready: Vec<String> = hint.iter().filter(|s| self.registry.is_ready(s)).cloned().collect();
            if !ready.is_empty() {
                let prompt = fallback_template(&item.action);
                return Ok(ProviderSelection {
                    selected_prompts: ready.iter().map(|_| prompt.clone()).collect(),
                    selected_servers: ready,
                    confidence: 1.0,
                });
            }
        }

        let ready_providers = self.ready_provider_summary();
        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "Item action: {}\nReady providers: {}",
                item.action, ready_providers
            )),
        ];
        let schema = json!({
            "type": "object",
            "required": ["selected_servers"],
            "properties": {
                "selected_servers": {"type": "array", "items": {"type": "string"}},
                "selected_prompts": {"type": "array", "items": {"type": "string"}},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1}
            }
        });

        let response = self
            .client
            .complete_constrained(messages, self.config, Priority::Normal, schema)
            .await?;

        let raw: RawSelection = serde_json::from_str(&response.content).unwrap_or_default();
        let mut servers: Vec<String> = raw.selected_servers.into_iter().filter(|s| self.registry.is_ready(s)).collect();

        if servers.is_empty() {
            servers = self.all_ready_providers();
        }

        let prompts = if raw.selected_prompts.len() == servers.len() && !raw.selected_prompts.is_empty() {
            raw.selected_prompts
        } else {
            let template = fallback_template(&item.action);
            servers.iter().map(|_| template.clone()).collect()
        };

        Ok(ProviderSelection {
            selected_servers: servers,
            selected_prompts: prompts,
            confidence: raw.confidence.clamp(0.0, 1.0),
        })
    }

    fn all_ready_providers(&self) -> Vec<String> {
        self.registry
            .provider_names()
            .into_iter()
            .filter(|name| self.registry.is_ready(name))
            .collect()
    }

    fn ready_provider_summary(&self) -> String {
        self.all_ready_providers().join(", ")
    }
}

/// Rule-based fallback template name, chosen from verbs in the action
/// text. Used both when the router pre-filter is absent and when the LLM
/// classification didn't name a template.
#[must_use]
fn fallback_template(action: &str) -> String {
    let lower = action.to_lowercase();
    const FILESYSTEM_VERBS: &[&str] = &["create", "write", "read", "delete", "file", "directory", "folder"];
    const WEB_VERBS: &[&str] = &["browse", "navigate", "search", "http", "url", "website", "webpage"];

    if lower.contains("run") || lower.contains("execute") {
        "shell".to_string()
    } else if FILESYSTEM_VERBS.iter().any(|v| lower.contains(v)) {
        "filesystem".to_string()
    } else if WEB_VERBS.iter().any(|v| lower.contains(v)) {
        "browser".to_string()
    } else {
        "default".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orco_llm::{MockProvider, Throttle};
    use orco_providers::{Provider, Tool, ToolCallResult};
    use std::sync::Arc;
    use std::time::Duration;

    struct StubProvider {
        name: String,
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
            Ok(vec![])
        }
        async fn call_tool(&self, tool: &str, _params: serde_json::Value) -> orco_providers::Result<ToolCallResult> {
            Ok(ToolCallResult::success(serde_json::json!({ "tool": tool })))
        }
    }

    async fn registry_with(names: &[&str]) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for name in names {
            registry.register(Arc::new(StubProvider { name: (*name).into() }));
        }
        registry.refresh().await.unwrap();
        registry
    }

    fn client(body: &str) -> LlmClient {
        let provider = MockProvider::with_responses("mock", "selector-model", vec![Ok(body.to_string())]);
        let throttle = Throttle::spawn(Duration::from_millis(1), 4);
        LlmClient::new(Box::new(provider), None, throttle)
    }

    fn model_config() -> ModelConfig {
        ModelConfig {
            model: "selector-model".into(),
            fallback_model: None,
            temperature: Some(0.0),
            max_tokens: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn router_hint_short_circuits_classification() {
        let registry = registry_with(&["fs"]).await;
        let client = client("should not be called");
        let config = model_config();
        let selector = ProviderSelector::new(&client, &config, &registry);

        let item = Item::new(orco_ids::HierarchicalId::root(1), "write a file", "file exists", vec![], 1);
        let selection = selector.select(&item, Some(&["fs".to_string()])).await.unwrap();
        assert_eq!(selection.selected_servers, vec!["fs".to_string()]);
        assert_eq!(selection.confidence, 1.0);
    }

    #[tokio::test]
    async fn falls_back_to_all_ready_when_classification_names_nothing_ready() {
        let registry = registry_with(&["fs", "shell"]).await;
        let body = r#"{"selected_servers":["nonexistent"],"selected_prompts":[],"confidence":0.9}"#;
        let client = client(body);
        let config = model_config();
        let selector = ProviderSelector::new(&client, &config, &registry);

        let item = Item::new(orco_ids::HierarchicalId::root(1), "do a thing", "done", vec![], 1);
        let selection = selector.select(&item, None).await.unwrap();
        let mut servers = selection.selected_servers;
        servers.sort();
        assert_eq!(servers, vec!["fs".to_string(), "shell".to_string()]);
    }

    #[test]
    fn fallback_template_matches_action_verbs() {
        assert_eq!(fallback_template("create a directory"), "filesystem");
        assert_eq!(fallback_template("run the script"), "shell");
        assert_eq!(fallback_template("navigate to a website"), "browser");
        assert_eq!(fallback_template("think about it"), "default");
    }
}
