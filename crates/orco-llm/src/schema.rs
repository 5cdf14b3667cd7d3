//! Schema-constrained tool-call planning with bounded self-correction.
//!
//! [`SchemaConstrainer`] builds the JSON Schema a tool-planning completion
//! must conform to, then validates a candidate plan against it plus each
//! call's own `inputSchema`. On failure it re-prompts the LLM with the
//! validation errors attached, up to [`SchemaConstrainer::MAX_CORRECTIONS`]
//! additional rounds, before giving up with a typed error.
//!
//! This crate does not depend on `orco-providers`, so the tool catalog is
//! expressed here as the minimal shape a caller needs to provide —
//! `orco-core` adapts its richer `Tool`/`ProviderRegistry` types into
//! [`ToolCatalogEntry`] when it calls into this module.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::llm_client::{LlmClient, ModelConfig};
use crate::message::Message;
use crate::throttle::Priority;

/// A single tool available for planning, addressed as `server__tool`.
#[derive(Debug, Clone)]
pub struct ToolCatalogEntry {
    /// Provider/server name.
    pub server: String,
    /// Tool name within that provider.
    pub tool: String,
    /// JSON-Schema for the tool's `parameters` object.
    pub input_schema: Value,
}

impl ToolCatalogEntry {
    /// The `server__tool` identifier used in the constrained schema's `tool` enum.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}__{}", self.server, self.tool)
    }
}

/// One tool-call in a candidate plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedToolCall {
    /// Provider/server name.
    pub server: String,
    /// Tool name.
    pub tool: String,
    /// Call arguments.
    pub parameters: Value,
}

/// A validated tool-call plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolCallPlan {
    /// Ordered tool-calls to execute.
    #[serde(default)]
    pub tool_calls: Vec<PlannedToolCall>,
    /// Free-text justification accompanying the plan.
    #[serde(default)]
    pub reasoning: String,
    /// Present when the model answered directly without needing tools
    /// (e.g. pure arithmetic); callers short-circuit execution in this case.
    #[serde(default)]
    pub direct_result: Option<String>,
}

/// A single validation failure against either the enum constraint or a
/// tool's own `inputSchema`.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Index into `tool_calls` the error applies to.
    pub index: usize,
    /// Human-readable description, fed back to the LLM verbatim.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tool_calls[{}]: {}", self.index, self.message)
    }
}

/// Applies a tool's correction rules to its arguments before validation.
/// Concrete rules live in `orco-providers` (derived from each tool's
/// `inputSchema`, e.g. coercing a stringly-typed number); this trait lets
/// `SchemaConstrainer` stay decoupled from that crate.
pub trait ParameterCorrector {
    /// Attempt to coerce `parameters` into a shape more likely to validate.
    /// Returns the (possibly unchanged) parameters.
    fn correct(&self, server: &str, tool: &str, parameters: Value) -> Value;
}

/// A corrector that performs no correction; used when callers have none.
pub struct NoopCorrector;

impl ParameterCorrector for NoopCorrector {
    fn correct(&self, _server: &str, _tool: &str, parameters: Value) -> Value {
        parameters
    }
}

/// Builds constrained schemas and drives the validate/self-correct loop.
pub struct SchemaConstrainer<'a> {
    catalog: &'a [ToolCatalogEntry],
}

impl<'a> SchemaConstrainer<'a> {
    /// Bounded self-correction rounds beyond the initial attempt.
    pub const MAX_CORRECTIONS: u32 = 2;

    /// Build a constrainer over the given eligible tool catalog.
    #[must_use]
    pub fn new(catalog: &'a [ToolCatalogEntry]) -> Self {
        Self { catalog }
    }

    /// The JSON Schema the completion's `response_format` is constrained to.
    #[must_use]
    pub fn response_schema(&self) -> Value {
        let servers: Vec<String> = dedup(self.catalog.iter().map(|t| t.server.clone()));
        let qualified: Vec<String> = self.catalog.iter().map(ToolCatalogEntry::qualified_name).collect();

        json!({
            "type": "object",
            "required": ["tool_calls"],
            "properties": {
                "tool_calls": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["server", "tool", "parameters"],
                        "properties": {
                            "server": { "enum": servers },
                            "tool": { "enum": qualified },
                            "parameters": { "type": "object" }
                        }
                    }
                },
                "reasoning": { "type": "string" }
            }
        })
    }

    fn find_tool(&self, server: &str, tool: &str) -> Option<&ToolCatalogEntry> {
        self.catalog
            .iter()
            .find(|t| t.server == server && (t.tool == tool || t.qualified_name() == tool))
    }

    /// Validate a candidate plan against enum membership and each call's
    /// `inputSchema`, applying `corrector` first. Readiness of the resolved
    /// provider is the caller's responsibility (requires a live registry).
    pub fn validate(
        &self,
        plan: &ToolCallPlan,
        corrector: &dyn ParameterCorrector,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (index, call) in plan.tool_calls.iter().enumerate() {
            let Some(entry) = self.find_tool(&call.server, &call.tool) else {
                errors.push(ValidationError {
                    index,
                    message: format!(
                        "unknown tool '{}__{}' not in active catalog",
                        call.server, call.tool
                    ),
                });
                continue;
            };

            let corrected = corrector.correct(&call.server, &call.tool, call.parameters.clone());
            let Ok(validator) = jsonschema::validator_for(&entry.input_schema) else {
                continue;
            };
            let schema_errors: Vec<String> = validator
                .iter_errors(&corrected)
                .map(|e| e.to_string())
                .collect();
            if !schema_errors.is_empty() {
                errors.push(ValidationError {
                    index,
                    message: schema_errors.join("; "),
                });
            }
        }
        errors
    }

    /// Drive the full plan-then-validate-then-correct loop against a live
    /// [`LlmClient`], returning the first passing plan or a typed failure
    /// once [`Self::MAX_CORRECTIONS`] additional rounds are exhausted.
    pub async fn plan_with_correction(
        &self,
        client: &LlmClient,
        config: &ModelConfig,
        base_messages: Vec<Message>,
        corrector: &dyn ParameterCorrector,
        priority: Priority,
    ) -> Result<ToolCallPlan> {
        let schema = self.response_schema();
        let mut messages = base_messages;
        let mut last_errors: Vec<ValidationError> = Vec::new();

        for round in 0..=Self::MAX_CORRECTIONS {
            if round > 0 {
                let feedback = last_errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n");
                messages.push(Message::user(format!(
                    "The previous plan failed validation:\n{feedback}\nReturn a corrected plan."
                )));
            }

            let response = client
                .complete_constrained(messages.clone(), config, priority, schema.clone())
                .await?;

            let plan: ToolCallPlan = match serde_json::from_str(&response.content) {
                Ok(p) => p,
                Err(e) => {
                    last_errors = vec![ValidationError {
                        index: 0,
                        message: format!("response did not parse as a tool call plan: {e}"),
                    }];
                    continue;
                }
            };

            if plan.direct_result.is_some() {
                return Ok(plan);
            }

            let errors = self.validate(&plan, corrector);
            if errors.is_empty() {
                return Ok(plan);
            }
            warn!(round, errors = errors.len(), "tool plan failed validation");
            last_errors = errors;
        }

        Err(Error::SchemaValidation(
            last_errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        ))
    }
}

fn dedup(iter: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for item in iter {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<ToolCatalogEntry> {
        vec![ToolCatalogEntry {
            server: "fs".into(),
            tool: "write_file".into(),
            input_schema: json!({
                "type": "object",
                "required": ["path", "content"],
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                }
            }),
        }]
    }

    #[test]
    fn response_schema_enumerates_catalog() {
        let catalog = catalog();
        let constrainer = SchemaConstrainer::new(&catalog);
        let schema = constrainer.response_schema();
        let tool_enum = schema["properties"]["tool_calls"]["items"]["properties"]["tool"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(tool_enum[0], "fs__write_file");
    }

    #[test]
    fn validate_rejects_unknown_tool() {
        let catalog = catalog();
        let constrainer = SchemaConstrainer::new(&catalog);
        let plan = ToolCallPlan {
            tool_calls: vec![PlannedToolCall {
                server: "fs".into(),
                tool: "delete_file".into(),
                parameters: json!({}),
            }],
            reasoning: String::new(),
            direct_result: None,
        };
        let errors = constrainer.validate(&plan, &NoopCorrector);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn validate_rejects_schema_mismatch() {
        let catalog = catalog();
        let constrainer = SchemaConstrainer::new(&catalog);
        let plan = ToolCallPlan {
            tool_calls: vec![PlannedToolCall {
                server: "fs".into(),
                tool: "write_file".into(),
                parameters: json!({"path": "/tmp/x"}),
            }],
            reasoning: String::new(),
            direct_result: None,
        };
        let errors = constrainer.validate(&plan, &NoopCorrector);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn validate_accepts_matching_plan() {
        let catalog = catalog();
        let constrainer = SchemaConstrainer::new(&catalog);
        let plan = ToolCallPlan {
            tool_calls: vec![PlannedToolCall {
                server: "fs".into(),
                tool: "write_file".into(),
                parameters: json!({"path": "/tmp/x", "content": "hi"}),
            }],
            reasoning: "writing a file".into(),
            direct_result: None,
        };
        assert!(constrainer.validate(&plan, &NoopCorrector).is_empty());
    }
}
