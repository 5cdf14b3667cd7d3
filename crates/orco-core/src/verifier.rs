//! §4.11 Verifier — decides whether an item's success criteria are met,
//! gathering its own evidence tool-calls before adjudicating.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{instrument, warn};

use orco_llm::{LlmClient, Message, ModelConfig, NoopCorrector, Priority as LlmPriority, SchemaConstrainer, ToolCatalogEntry};
use orco_providers::{ExecutionSummary, PlannedCall, Priority as ToolPriority, ProviderRegistry, Tool, ToolExecutor};

use crate::error::Result;
use crate::event_bus::{EventBus, WorkflowEvent};
use crate::plan::Item;
use crate::provider_selector::ProviderSelection;

/// Wait before evidence-gathering when the execution included an
/// app-launch indicator — the launched app needs time to present a
/// verifiable surface (§4.11 "adaptive delay").
const LAUNCH_DELAY: Duration = Duration::from_millis(2500);
/// Wait otherwise.
const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

const EVIDENCE_SYSTEM_PROMPT: &str = "You gather verification evidence for a just-executed item. \
    Always include at least one screen-evidence capture tool-call (a screenshot tool, or a \
    read-back of the affected artifact) among your tool_calls, even when other evidence would \
    also help. Available tools:\n{{AVAILABLE_TOOLS}}\nRespond in {{USER_LANGUAGE}}. Produce a \
    JSON tool_calls plan to gather evidence for this item.";

const DECISION_SYSTEM_PROMPT: &str = "Given an item's action, success criteria, what the executor \
    did, and the evidence gathered, decide whether the success criteria are actually met. \
    Respond as JSON: {\"verified\": bool, \"confidence\": 0..100, \"reason\": \"...\", \
    \"evidence\": \"...\"}.";

/// Names that mark a tool-call as screen-evidence: a screenshot, or a
/// read-back of the artifact an item claims to have affected.
fn is_evidence_call(server: &str, tool: &str) -> bool {
    let lower = format!("{server}_{tool}").to_lowercase();
    lower.contains("screenshot") || lower.contains("screen_capture") || lower.starts_with("read") || lower.contains("_read")
}

/// The Verifier's final adjudication for one item.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    /// Whether the item's success criteria are judged met.
    pub verified: bool,
    /// Confidence in `[0,100]`.
    pub confidence: u8,
    /// Free-text justification.
    pub reason: String,
    /// Compact rendering of the evidence gathered, for diagnostics and
    /// the `mcp_item_verified` event.
    pub evidence_summary: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawDecision {
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    confidence: u8,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    evidence: String,
}

/// Adjudicates whether an item succeeded, given the Executor's output plus
/// its own evidence-gathering tool-calls.
pub struct Verifier<'a> {
    client: &'a LlmClient,
    config: &'a ModelConfig,
    registry: &'a ProviderRegistry,
    executor: &'a ToolExecutor,
    app_paths: &'a HashMap<String, String>,
    events: &'a EventBus,
}

impl<'a> Verifier<'a> {
    /// Build a verifier against the decision stage's model config, the
    /// live registry, and the shared executor used to run evidence calls.
    #[must_use]
    pub fn new(
        client: &'a LlmClient,
        config: &'a ModelConfig,
        registry: &'a ProviderRegistry,
        executor: &'a ToolExecutor,
        app_paths: &'a HashMap<String, String>,
        events: &'a EventBus,
    ) -> Self {
        Self {
            client,
            config,
            registry,
            executor,
            app_paths,
            events,
        }
    }

    /// Run both phases for `item` and emit `mcp_item_verified`.
    #[instrument(skip(self, item, selection, executed_calls, execution), fields(item_id = %item.id))]
    pub async fn verify(
        &self,
        session_id: &str,
        item: &Item,
        selection: &ProviderSelection,
        executed_calls: &[PlannedCall],
        execution: &ExecutionSummary,
    ) -> VerificationOutcome {
        let delay = if includes_launch_indicator(item, executed_calls, self.app_paths) {
            LAUNCH_DELAY
        } else {
            DEFAULT_DELAY
        };
        tokio::time::sleep(delay).await;

        let evidence = self.gather_evidence(item, selection).await;
        let outcome = self.decide(item, execution, &evidence).await;

        self.events.publish(WorkflowEvent::ItemVerified {
            session_id: session_id.to_string(),
            item_id: item.id.clone(),
            verified: outcome.verified,
            confidence: outcome.confidence,
            summary: outcome.reason.clone(),
        });

        outcome
    }

    /// §4.11.A: plan and execute evidence tool-calls, guaranteeing at
    /// least one screen-evidence capture when the catalog offers one.
    async fn gather_evidence(&self, item: &Item, selection: &ProviderSelection) -> ExecutionSummary {
        let catalog = self.build_catalog(&selection.selected_servers).await;
        if catalog.is_empty() {
            return ExecutionSummary { outcomes: Vec::new() };
        }

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
        let prompt = EVIDENCE_SYSTEM_PROMPT
            .replace("{{AVAILABLE_TOOLS}}", &tools_summary)
            .replace("{{USER_LANGUAGE}}", "en");
        let messages = vec![
            Message::system(prompt),
            Message::user(format!(
                "Action: {}\nSuccess criteria: {}",
                item.action, item.success_criteria
            )),
        ];

        let constrainer = SchemaConstrainer::new(&catalog);
        let plan = match constrainer
            .plan_with_correction(self.client, self.config, messages, &NoopCorrector, LlmPriority::High)
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "evidence planning failed; verifying with no evidence");
                return ExecutionSummary { outcomes: Vec::new() };
            }
        };

        let mut calls: Vec<PlannedCall> = plan
            .tool_calls
            .iter()
            .filter(|c| catalog.iter().any(|t| t.server == c.server && t.tool == c.tool))
            .map(|c| PlannedCall {
                server: c.server.clone(),
                tool: c.tool.clone(),
                parameters: c.parameters.clone(),
            })
            .collect();

        if !calls.iter().any(|c| is_evidence_call(&c.server, &c.tool)) {
            if let Some(entry) = catalog.iter().find(|c| is_evidence_call(&c.server, &c.tool)) {
                calls.push(PlannedCall {
                    server: entry.server.clone(),
                    tool: entry.tool.clone(),
                    parameters: json!({}),
                });
            } else {
                warn!("no screen-evidence tool available in the selected providers' catalog");
            }
        }

        self.executor.execute(self.registry, &calls, ToolPriority::High).await
    }

    /// §4.11.B: the decision call. Parse failures default to
    /// `verified: false` rather than guessing.
    async fn decide(&self, item: &Item, execution: &ExecutionSummary, evidence: &ExecutionSummary) -> VerificationOutcome {
        let messages = vec![
            Message::system(DECISION_SYSTEM_PROMPT),
            Message::user(format!(
                "Action: {}\nSuccess criteria: {}\nExecutor results: {}\nEvidence: {}",
                item.action,
                item.success_criteria,
                execution.summary_text(),
                evidence.summary_text()
            )),
        ];
        let schema = json!({
            "type": "object",
            "required": ["verified"],
            "properties": {
                "verified": {"type": "boolean"},
                "confidence": {"type": "integer", "minimum": 0, "maximum": 100},
                "reason": {"type": "string"},
                "evidence": {"type": "string"}
            }
        });

        let response = match self.client.complete_constrained(messages, self.config, LlmPriority::High, schema).await {
            Ok(r) => r,
            Err(e) => {
                return VerificationOutcome {
                    verified: false,
                    confidence: 0,
                    reason: format!("verification call failed: {e}"),
                    evidence_summary: evidence.summary_text(),
                };
            }
        };

        let raw: RawDecision = match serde_json::from_str(&response.content) {
            Ok(r) => r,
            Err(_) => {
                return VerificationOutcome {
                    verified: false,
                    confidence: 0,
                    reason: "verification response unparseable".to_string(),
                    evidence_summary: evidence.summary_text(),
                };
            }
        };

        VerificationOutcome {
            verified: raw.verified,
            confidence: raw.confidence.min(100),
            reason: if raw.reason.is_empty() { raw.evidence.clone() } else { raw.reason },
            evidence_summary: evidence.summary_text(),
        }
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

/// §4.11's adaptive-delay predicate: true when the execution launched an
/// app (a `platform`-server call, a shell command matching a launch verb,
/// or the action text naming a known app alongside a launch keyword).
#[must_use]
fn includes_launch_indicator(item: &Item, executed_calls: &[PlannedCall], app_paths: &HashMap<String, String>) -> bool {
    const LAUNCH_VERBS: &[&str] = &["open ", "launch ", "start "];

    if executed_calls.iter().any(|c| c.server == "platform" || c.tool.contains("launch")) {
        return true;
    }
    if executed_calls.iter().any(|c| {
        c.tool.starts_with("exec")
            && c.parameters
                .get("command")
                .and_then(|v| v.as_str())
                .map(|cmd| {
                    let lower = cmd.to_lowercase();
                    LAUNCH_VERBS.iter().any(|v| lower.contains(v.trim())) || lower.contains("xdg-open")
                })
                .unwrap_or(false)
    }) {
        return true;
    }

    let action = item.action.to_lowercase();
    LAUNCH_VERBS.iter().any(|v| action.contains(v)) && app_paths.keys().any(|name| action.contains(&name.to_lowercase()))
}
