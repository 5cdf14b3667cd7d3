//! Sequential tool-call invocation against a [`ProviderRegistry`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{instrument, warn};

use crate::provider_registry::ProviderRegistry;
use crate::throttle::{Priority, Throttle};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A single tool call as planned by the ToolPlanner/Verifier, in the order
/// it should be invoked.
#[derive(Debug, Clone)]
pub struct PlannedCall {
    /// Provider/server name.
    pub server: String,
    /// Tool name within that provider.
    pub tool: String,
    /// Call parameters, already schema-validated.
    pub parameters: serde_json::Value,
}

/// Outcome of one invoked call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Tool name.
    pub tool: String,
    /// Provider/server name.
    pub server: String,
    /// Whether the provider reported success.
    pub success: bool,
    /// Output payload on success.
    pub result: Option<serde_json::Value>,
    /// Error message on failure (provider error, not-ready, or timeout).
    pub error: Option<String>,
}

/// Summary returned after executing a full plan of calls. Overall item
/// success is decided by the Verifier, never derived from this summary
/// alone ("the item's overall success is decided by the Verifier, not by
/// 'all calls succeeded'").
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    /// Per-call outcomes, in invocation order.
    pub outcomes: Vec<CallOutcome>,
}

impl ExecutionSummary {
    /// Whether at least one call in this batch succeeded.
    #[must_use]
    pub fn any_successful(&self) -> bool {
        self.outcomes.iter().any(|o| o.success)
    }

    /// A compact one-line-per-call rendering suitable for prompts.
    #[must_use]
    pub fn summary_text(&self) -> String {
        self.outcomes
            .iter()
            .map(|o| {
                let status = if o.success { "ok" } else { "failed" };
                format!("{}__{}: {status}", o.server, o.tool)
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Per-tool-family timeout override (e.g. `"exec"` tools get longer than
/// `"http"` tools).
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    overrides: HashMap<String, Duration>,
    default: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

impl TimeoutPolicy {
    /// A policy using `default` for every tool family unless overridden.
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self {
            overrides: HashMap::new(),
            default,
        }
    }

    /// Override the timeout for a specific tool family (the part of the
    /// tool name before its first `_`, e.g. `"exec"` for `exec_run`).
    #[must_use]
    pub fn with_family(mut self, family: impl Into<String>, timeout: Duration) -> Self {
        self.overrides.insert(family.into(), timeout);
        self
    }

    fn timeout_for(&self, tool: &str) -> Duration {
        let family = tool.split('_').next().unwrap_or(tool);
        self.overrides
            .get(family)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Maps an unqualified shell command to its platform equivalent when the
/// planned command doesn't exist on the current host (e.g. `ls` vs `dir`,
/// `open` vs `xdg-open` vs `start`). Unknown commands pass through
/// unchanged with a diagnostic warning — mapping is best-effort, not
/// exhaustive.
fn map_platform_command(command: &str) -> String {
    let mut parts = command.splitn(2, ' ');
    let Some(head) = parts.next() else {
        return command.to_string();
    };
    let rest = parts.next().unwrap_or("");

    let mapped = match (std::env::consts::OS, head) {
        ("windows", "ls") => Some("dir"),
        ("windows", "open") => Some("start"),
        ("windows", "rm") => Some("del"),
        ("windows", "cat") => Some("type"),
        ("macos", "xdg-open") => Some("open"),
        ("macos", "start") => Some("open"),
        ("linux", "open") => Some("xdg-open"),
        ("linux", "start") => Some("xdg-open"),
        _ => None,
    };

    match mapped {
        Some(replacement) => {
            warn!(from = head, to = replacement, os = std::env::consts::OS, "mapped command to platform equivalent");
            if rest.is_empty() {
                replacement.to_string()
            } else {
                format!("{replacement} {rest}")
            }
        }
        None => command.to_string(),
    }
}

/// Invokes a plan's tool-calls in declaration order, sequentially,
/// throttling and timing out each call.
pub struct ToolExecutor {
    throttle: Throttle,
    timeouts: TimeoutPolicy,
}

impl ToolExecutor {
    /// Build an executor with the given call throttle and timeout policy.
    #[must_use]
    pub fn new(throttle: Throttle, timeouts: TimeoutPolicy) -> Self {
        Self { throttle, timeouts }
    }

    /// Execute `calls` against `registry` in order, accumulating results
    /// without aborting on individual call failure.
    #[instrument(skip(self, registry, calls))]
    pub async fn execute(
        &self,
        registry: &ProviderRegistry,
        calls: &[PlannedCall],
        priority: Priority,
    ) -> ExecutionSummary {
        let mut outcomes = Vec::with_capacity(calls.len());

        for call in calls {
            if !registry.is_ready(&call.server) {
                outcomes.push(CallOutcome {
                    tool: call.tool.clone(),
                    server: call.server.clone(),
                    success: false,
                    result: None,
                    error: Some(format!("provider not ready: {}", call.server)),
                });
                continue;
            }

            let params = if call.tool.starts_with("exec") {
                remap_shell_params(call.parameters.clone())
            } else {
                call.parameters.clone()
            };
            let params = registry
                .apply_corrections(&format!("{}__{}", call.server, call.tool), params)
                .await;

            let permit = self.throttle.acquire(priority).await;
            let call_timeout = self.timeouts.timeout_for(&call.tool);
            let outcome = match timeout(
                call_timeout,
                registry.call_tool(&call.server, &call.tool, params),
            )
            .await
            {
                Ok(Ok(result)) => CallOutcome {
                    tool: call.tool.clone(),
                    server: call.server.clone(),
                    success: result.success,
                    result: result.success.then_some(result.output),
                    error: result.error,
                },
                Ok(Err(e)) => CallOutcome {
                    tool: call.tool.clone(),
                    server: call.server.clone(),
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                },
                Err(_) => CallOutcome {
                    tool: call.tool.clone(),
                    server: call.server.clone(),
                    success: false,
                    result: None,
                    error: Some(format!("timed out after {call_timeout:?}")),
                },
            };
            drop(permit);
            outcomes.push(outcome);
        }

        ExecutionSummary { outcomes }
    }
}

fn remap_shell_params(mut params: serde_json::Value) -> serde_json::Value {
    if let Some(command) = params.get("command").and_then(|v| v.as_str()) {
        let mapped = map_platform_command(command);
        if let Some(obj) = params.as_object_mut() {
            obj.insert("command".to_string(), serde_json::Value::String(mapped));
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Provider, Tool, ToolCallResult};
    use async_trait::async_trait;
    use std::sync::Arc;

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
        async fn list_tools(&self) -> crate::error::Result<Vec<Tool>> {
            Ok(vec![])
        }
        async fn call_tool(&self, tool: &str, _params: serde_json::Value) -> crate::error::Result<ToolCallResult> {
            if tool == "fail" {
                Ok(ToolCallResult::failure("boom"))
            } else {
                Ok(ToolCallResult::success(serde_json::json!({"tool": tool})))
            }
        }
    }

    async fn registry_with_stub() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider { name: "s".into() }));
        registry.refresh().await.unwrap();
        registry
    }

    #[tokio::test]
    async fn accumulates_without_aborting_on_failure() {
        let registry = registry_with_stub().await;
        let executor = ToolExecutor::new(
            Throttle::spawn(Duration::from_millis(1), 4),
            TimeoutPolicy::new(Duration::from_secs(1)),
        );
        let calls = vec![
            PlannedCall { server: "s".into(), tool: "fail".into(), parameters: serde_json::json!({}) },
            PlannedCall { server: "s".into(), tool: "ok".into(), parameters: serde_json::json!({}) },
        ];
        let summary = executor.execute(&registry, &calls, Priority::Normal).await;
        assert_eq!(summary.outcomes.len(), 2);
        assert!(!summary.outcomes[0].success);
        assert!(summary.outcomes[1].success);
        assert!(summary.any_successful());
    }

    #[tokio::test]
    async fn fails_fast_on_unready_provider() {
        let registry = ProviderRegistry::new();
        let executor = ToolExecutor::new(
            Throttle::spawn(Duration::from_millis(1), 4),
            TimeoutPolicy::new(Duration::from_secs(1)),
        );
        let calls = vec![PlannedCall {
            server: "missing".into(),
            tool: "x".into(),
            parameters: serde_json::json!({}),
        }];
        let summary = executor.execute(&registry, &calls, Priority::Normal).await;
        assert!(!summary.outcomes[0].success);
        assert!(summary.outcomes[0].error.as_ref().unwrap().contains("not ready"));
    }

    #[test]
    fn timeout_policy_falls_back_to_default() {
        let policy = TimeoutPolicy::new(Duration::from_secs(30)).with_family("exec", Duration::from_secs(60));
        assert_eq!(policy.timeout_for("exec_run"), Duration::from_secs(60));
        assert_eq!(policy.timeout_for("http_get"), Duration::from_secs(30));
    }
}
