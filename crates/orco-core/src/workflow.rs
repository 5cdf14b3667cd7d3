//! §4.13 WorkflowEngine — the scheduler that drives a [`Plan`] from its
//! initial items through to completion: one item visited per scheduler
//! tick, round-robin, until every item reaches a terminal status.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use orco_ids::HierarchicalId;
use orco_llm::LlmClient;
use orco_providers::{Priority as ToolPriority, ProviderRegistry, ToolExecutor};

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::event_bus::{EventBus, WorkflowEvent};
use crate::plan::{ItemStatus, Plan};
use crate::provider_selector::ProviderSelector;
use crate::replanner::{ReplanStrategy, Replanner};
use crate::tool_planner::{to_planned_calls, ToolPlanner};
use crate::utils::{metrics_global, Timer};
use crate::verifier::Verifier;

/// §4.13: after this many consecutive scheduler visits with unsatisfied
/// dependencies, substitute any `replanned` parent dependency with its
/// children (this is usually enough to unblock the item on its own).
const BLOCKED_REWRITE_THRESHOLD: u32 = 5;
/// §4.13 / invariant 7: past this many visits still blocked, the item is
/// abandoned rather than starved forever.
const BLOCKED_SKIP_THRESHOLD: u32 = 10;

/// Final tally for one workflow run, carried into `mcp_workflow_complete`.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    /// Items that reached `completed`.
    pub completed: usize,
    /// Total items in the final plan (including replan-injected children).
    pub total: usize,
    /// `completed / total * 100`, over non-`replanned` items (see
    /// [`Plan::success_rate`]).
    pub success_rate: f64,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

/// §4.13's exact retry backoff: `min(1000 * 2^(attempt-1), 8000)` ms,
/// applied between consecutive primary-execution attempts of the same
/// item. Deliberately not a jittered backoff — the schedule here is a
/// fixed contract other components reason about.
#[must_use]
fn backoff_for_attempt(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let ms = 1000u64.saturating_mul(1u64 << exponent).min(8000);
    Duration::from_millis(ms)
}

/// Drives one [`Plan`] to completion, coordinating every other stage.
pub struct WorkflowEngine<'a> {
    client: &'a LlmClient,
    registry: &'a ProviderRegistry,
    executor: &'a ToolExecutor,
    events: &'a EventBus,
    config: &'a OrchestratorConfig,
}

impl<'a> WorkflowEngine<'a> {
    /// Build an engine wired against a loaded configuration, the live
    /// provider registry, a shared executor, and the session's event bus.
    #[must_use]
    pub fn new(
        client: &'a LlmClient,
        registry: &'a ProviderRegistry,
        executor: &'a ToolExecutor,
        events: &'a EventBus,
        config: &'a OrchestratorConfig,
    ) -> Self {
        Self {
            client,
            registry,
            executor,
            events,
            config,
        }
    }

    /// Run `plan` to completion. One item is visited per tick, round-robin
    /// over the item vector, until [`Plan::is_complete`]. `cancel` is
    /// checked between ticks and while backing off between attempts; on
    /// cancellation the active item is marked `failed` and a
    /// `mcp_workflow_error` is emitted.
    #[instrument(skip(self, plan, cancel), fields(session_id = %session_id, plan_id = %plan.id))]
    pub async fn run(
        &self,
        plan: &mut Plan,
        session_id: &str,
        user_language: &str,
        cancel: CancellationToken,
    ) -> Result<WorkflowOutcome> {
        let start = Instant::now();

        let provider_selector = ProviderSelector::new(self.client, &self.config.provider_selector, self.registry);
        let tool_planner = ToolPlanner::new(
            self.client,
            &self.config.tool_planner,
            self.registry,
            &self.config.app_paths,
            self.config.retry.tool_planning_max_attempts,
            Duration::from_millis(self.config.retry.tool_planning_retry_delay_ms),
        );
        let verifier = Verifier::new(self.client, &self.config.verifier, self.registry, self.executor, &self.config.app_paths, self.events);
        let replanner = Replanner::new(self.client, &self.config.replanner);

        if plan.items.is_empty() {
            plan.refresh_progress();
            return Ok(self.finish(plan, session_id, start));
        }

        let mut idx = 0usize;
        loop {
            if plan.is_complete() {
                break;
            }
            if idx >= plan.items.len() {
                idx = 0;
                continue;
            }
            if cancel.is_cancelled() {
                let item_id = plan.items[idx].id.clone();
                let reason = format!("cancelled before item {item_id}");
                self.fail_item(plan, &item_id, session_id, reason.clone());
                return self.terminate(plan, session_id, Some(item_id), Error::Cancelled(reason));
            }

            let id = plan.items[idx].id.clone();
            let tick_timer = Timer::start();
            let tick_result = self
                .tick(plan, &id, session_id, user_language, &provider_selector, &tool_planner, &verifier, &replanner, &cancel)
                .await;
            tick_timer.observe_duration(&metrics_global::histogram("orco_scheduler_tick_duration_ms"));
            if let Err(e) = tick_result {
                return self.terminate(plan, session_id, Some(id), e);
            }
            idx += 1;
        }

        Ok(self.finish(plan, session_id, start))
    }

    /// Process exactly one item at one scheduler visit.
    #[allow(clippy::too_many_arguments)]
    async fn tick(
        &self,
        plan: &mut Plan,
        id: &HierarchicalId,
        session_id: &str,
        user_language: &str,
        provider_selector: &ProviderSelector<'_>,
        tool_planner: &ToolPlanner<'_>,
        verifier: &Verifier<'_>,
        replanner: &Replanner<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if plan.find(id).is_some_and(|i| i.status.is_terminal()) {
            return Ok(());
        }

        let unsatisfied = {
            let item = plan.find(id).expect("item exists");
            plan.unsatisfied_dependencies(item)
        };
        if !unsatisfied.is_empty() {
            self.handle_blocked(plan, id, session_id, unsatisfied);
            return Ok(());
        }

        {
            let item = plan.find_mut(id).expect("item exists");
            item.status = ItemStatus::InProgress;
            item.attempt += 1;
        }
        let snapshot = plan.find(id).expect("item exists").clone();

        let selection = provider_selector.select(&snapshot, snapshot.provider_hint.as_deref()).await?;
        let tool_plan = tool_planner.plan(&snapshot, &selection, user_language).await?;
        if let Some(it) = plan.find_mut(id) {
            it.last_plan = serde_json::to_value(&tool_plan).ok();
        }

        if let Some(direct_result) = tool_plan.direct_result.clone() {
            self.complete_via_direct_result(plan, id, session_id, &direct_result);
            return Ok(());
        }

        let planned_calls = to_planned_calls(&tool_plan);
        let execution_timer = Timer::start();
        let execution = self.executor.execute(self.registry, &planned_calls, ToolPriority::Normal).await;
        execution_timer.observe_duration(&metrics_global::histogram("orco_tool_execution_duration_ms"));
        metrics_global::counter("orco_tool_executions_total").inc_by(planned_calls.len() as u64);
        if !execution.any_successful() && !planned_calls.is_empty() {
            metrics_global::counter("orco_tool_execution_failures_total").inc();
        }
        if let Some(it) = plan.find_mut(id) {
            it.last_execution = Some(serde_json::json!({
                "success": execution.any_successful(),
                "summary": execution.summary_text(),
            }));
        }
        self.events.publish(WorkflowEvent::ItemExecuted {
            session_id: session_id.to_string(),
            item_id: id.clone(),
            success: execution.any_successful(),
            summary: execution.summary_text(),
        });

        let verification = verifier.verify(session_id, &snapshot, &selection, &planned_calls, &execution).await;
        if let Some(it) = plan.find_mut(id) {
            it.last_verification = Some(serde_json::json!({
                "verified": verification.verified,
                "confidence": verification.confidence,
                "reason": verification.reason,
            }));
        }

        if verification.verified {
            plan.find_mut(id).expect("item exists").status = ItemStatus::Completed;
            return Ok(());
        }

        if snapshot.attempt < snapshot.max_attempts {
            let backoff = backoff_for_attempt(snapshot.attempt);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => {
                    let reason = format!("cancelled while backing off item {id}");
                    self.fail_item(plan, id, session_id, reason.clone());
                    return Err(Error::Cancelled(reason));
                }
            }
            plan.find_mut(id).expect("item exists").status = ItemStatus::Pending;
            return Ok(());
        }

        self.escalate_to_replanner(plan, id, session_id, replanner, &execution.summary_text(), &verification).await
    }

    /// Marks the active item `failed` (outside the normal skip/replan
    /// paths) and emits `mcp_item_failed`, used when cancellation cuts the
    /// item off mid-flight.
    fn fail_item(&self, plan: &mut Plan, id: &HierarchicalId, session_id: &str, reason: String) {
        if let Some(item) = plan.find_mut(id) {
            if !item.status.is_terminal() {
                item.status = ItemStatus::Failed;
            }
        }
        self.events.publish(WorkflowEvent::ItemFailed {
            session_id: session_id.to_string(),
            item_id: id.clone(),
            reason,
        });
    }

    /// §4.13 blocked-item bookkeeping: emit `mcp_item_blocked`, and either
    /// rewrite `replanned`-parent dependencies after
    /// [`BLOCKED_REWRITE_THRESHOLD`] visits or force `skipped` after
    /// [`BLOCKED_SKIP_THRESHOLD`].
    fn handle_blocked(&self, plan: &mut Plan, id: &HierarchicalId, session_id: &str, unsatisfied: Vec<HierarchicalId>) {
        let blocked_check_count = {
            let item = plan.find_mut(id).expect("item exists");
            item.status = ItemStatus::Blocked;
            item.blocked_check_count += 1;
            item.blocked_check_count
        };

        self.events.publish(WorkflowEvent::ItemBlocked {
            session_id: session_id.to_string(),
            item_id: id.clone(),
            blocked_check_count,
            unsatisfied_dependencies: unsatisfied,
        });

        if blocked_check_count == BLOCKED_REWRITE_THRESHOLD {
            plan.rewrite_replanned_dependencies(id);
        }

        if blocked_check_count >= BLOCKED_SKIP_THRESHOLD {
            let reason = "exceeded blocked-check bound waiting on dependencies".to_string();
            let item = plan.find_mut(id).expect("item exists");
            item.status = ItemStatus::Skipped;
            item.skip_reason = Some(reason.clone());
            self.events.publish(WorkflowEvent::ItemSkipped {
                session_id: session_id.to_string(),
                item_id: id.clone(),
                reason,
            });
        }
    }

    /// §4.9: a `direct_result` answer short-circuits planning straight to
    /// `completed`, bypassing the Verifier. A synthetic `mcp_item_verified`
    /// is still emitted so downstream consumers see the contractual
    /// `executed -> verified -> completed` event sequence (§8).
    fn complete_via_direct_result(&self, plan: &mut Plan, id: &HierarchicalId, session_id: &str, direct_result: &str) {
        self.events.publish(WorkflowEvent::ItemExecuted {
            session_id: session_id.to_string(),
            item_id: id.clone(),
            success: true,
            summary: format!("direct result: {direct_result}"),
        });
        self.events.publish(WorkflowEvent::ItemVerified {
            session_id: session_id.to_string(),
            item_id: id.clone(),
            verified: true,
            confidence: 100,
            summary: "direct result; verification skipped".to_string(),
        });

        let item = plan.find_mut(id).expect("item exists");
        item.last_execution = Some(serde_json::json!({ "direct_result": direct_result }));
        item.last_verification = Some(serde_json::json!({ "verified": true, "confidence": 100 }));
        item.status = ItemStatus::Completed;
    }

    /// §4.12: the item exhausted its primary attempts and failed
    /// verification. Ask the Replanner and apply its decision.
    async fn escalate_to_replanner(
        &self,
        plan: &mut Plan,
        id: &HierarchicalId,
        session_id: &str,
        replanner: &Replanner<'_>,
        executor_summary: &str,
        verification: &crate::verifier::VerificationOutcome,
    ) -> Result<()> {
        let snapshot = plan.find(id).expect("item exists").clone();
        let decision = replanner.replan(&snapshot, executor_summary, verification).await?;

        match decision.strategy {
            ReplanStrategy::InjectChildren => {
                let placeholders: Vec<(String, String, Vec<HierarchicalId>, u32)> = decision
                    .new_items
                    .iter()
                    .map(|spec| (spec.action.clone(), spec.success_criteria.clone(), Vec::new(), spec.max_attempts.unwrap_or(snapshot.max_attempts)))
                    .collect();
                let new_ids = plan.inject_children(id, placeholders, decision.reason.clone())?;

                for (spec, new_id) in decision.new_items.iter().zip(new_ids.iter()) {
                    let dependencies = spec
                        .dependencies
                        .iter()
                        .filter_map(|&dep_index| new_ids.get(dep_index).cloned())
                        .collect();
                    if let Some(child) = plan.find_mut(new_id) {
                        child.dependencies = dependencies;
                    }
                }

                self.events.publish(WorkflowEvent::ItemReplanned {
                    session_id: session_id.to_string(),
                    item_id: id.clone(),
                    new_items_count: new_ids.len(),
                    reason: decision.reason,
                });
                Ok(())
            }
            ReplanStrategy::SkipAndContinue => {
                let item = plan.find_mut(id).expect("item exists");
                item.status = ItemStatus::Skipped;
                item.skip_reason = Some(decision.reason.clone());
                self.events.publish(WorkflowEvent::ItemSkipped {
                    session_id: session_id.to_string(),
                    item_id: id.clone(),
                    reason: decision.reason,
                });
                Ok(())
            }
            ReplanStrategy::Abort => {
                warn!(item_id = %id, reason = %decision.reason, "replanner aborted the run");
                Err(Error::Aborted {
                    item_id: id.clone(),
                    reason: decision.reason,
                })
            }
        }
    }

    /// Emit `mcp_workflow_error` and propagate `err` unchanged, preserving
    /// whatever progress the plan made before termination.
    fn terminate(&self, plan: &mut Plan, session_id: &str, item_id: Option<HierarchicalId>, err: Error) -> Result<WorkflowOutcome> {
        plan.refresh_progress();
        self.events.publish(WorkflowEvent::WorkflowError {
            session_id: session_id.to_string(),
            item_id,
            reason: err.to_string(),
        });
        Err(err)
    }

    /// Compute the final tally and emit `mcp_workflow_complete`.
    fn finish(&self, plan: &mut Plan, session_id: &str, start: Instant) -> WorkflowOutcome {
        plan.refresh_progress();
        let outcome = WorkflowOutcome {
            completed: plan.execution_progress.completed,
            total: plan.execution_progress.total,
            success_rate: plan.success_rate(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        self.events.publish(WorkflowEvent::WorkflowComplete {
            session_id: session_id.to_string(),
            completed: outcome.completed,
            total: outcome.total,
            success_rate: outcome.success_rate,
            duration_ms: outcome.duration_ms,
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Item, PlanContext, PlanMode};
    use async_trait::async_trait;
    use orco_llm::{MockProvider, ModelConfig, Throttle as LlmThrottle};
    use orco_providers::{Provider, Throttle as ToolThrottle, TimeoutPolicy, Tool, ToolCallResult};
    use std::collections::HashMap;
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
        async fn call_tool(&self, tool: &str, _params: serde_json::Value) -> orco_providers::Result<ToolCallResult> {
            Ok(ToolCallResult::success(serde_json::json!({ "tool": tool })))
        }
    }

    async fn registry_with_fs() -> ProviderRegistry {
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

    fn llm_client(responses: Vec<std::result::Result<String, orco_llm::Error>>) -> LlmClient {
        let provider = MockProvider::with_responses("mock", "engine-model", responses);
        let throttle = LlmThrottle::spawn(Duration::from_millis(1), 8);
        LlmClient::new(Box::new(provider), None, throttle)
    }

    fn stage_config() -> ModelConfig {
        ModelConfig {
            model: "engine-model".into(),
            fallback_model: None,
            temperature: Some(0.0),
            max_tokens: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            mode_router: stage_config(),
            planner_feasibility: stage_config(),
            planner_plan: stage_config(),
            provider_selector: stage_config(),
            tool_planner: stage_config(),
            verifier: stage_config(),
            replanner: stage_config(),
            api_endpoint: crate::config::ApiEndpointConfig {
                primary: "http://localhost".into(),
                fallback: None,
                use_fallback: false,
            },
            retry: crate::config::RetryBudgets {
                item_execution_max_attempts: 1,
                replanning_max_attempts: 3,
                tool_planning_max_attempts: 1,
                tool_planning_retry_delay_ms: 1,
            },
            app_paths: HashMap::new(),
        }
    }

    fn executor() -> ToolExecutor {
        ToolExecutor::new(ToolThrottle::spawn(Duration::from_millis(1), 8), TimeoutPolicy::new(Duration::from_secs(1)))
    }

    fn single_item_plan(mut item: Item) -> Plan {
        item.provider_hint = Some(vec!["fs".to_string()]);
        Plan::new("p1", "write a file", PlanMode::Standard, 2, vec![item], PlanContext::default())
    }

    #[tokio::test(start_paused = true)]
    async fn completes_a_simple_item_end_to_end() {
        let registry = registry_with_fs().await;
        let exec = executor();
        let events = EventBus::new(16);
        let config = test_config();

        let plan_body = r#"{"tool_calls":[{"server":"fs","tool":"write_file","parameters":{"path":"/tmp/a","content":"x"}}],"reasoning":"writing"}"#;
        let evidence_body = r#"{"tool_calls":[{"server":"fs","tool":"write_file","parameters":{"path":"/tmp/a","content":"x"}}],"reasoning":"checking"}"#;
        let decision_body = r#"{"verified":true,"confidence":95,"reason":"file written","evidence":"checked"}"#;
        let client = llm_client(vec![Ok(plan_body.to_string()), Ok(evidence_body.to_string()), Ok(decision_body.to_string())]);

        let engine = WorkflowEngine::new(&client, &registry, &exec, &events, &config);
        let item = Item::new(HierarchicalId::root(1), "write a file at /tmp/a", "file contains x", vec![], 1);
        let mut plan = single_item_plan(item);

        let call = engine.run(&mut plan, "s1", "en", CancellationToken::new());
        tokio::pin!(call);
        tokio::time::advance(Duration::from_secs(5)).await;
        let outcome = call.await.unwrap();

        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.success_rate, 100.0);
        assert_eq!(plan.items[0].status, ItemStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_result_short_circuits_to_completed_without_verifier_call() {
        let registry = registry_with_fs().await;
        let exec = executor();
        let events = EventBus::new(16);
        let config = test_config();

        let plan_body = r#"{"tool_calls":[],"reasoning":"answered directly","direct_result":"4"}"#;
        let client = llm_client(vec![Ok(plan_body.to_string())]);

        let engine = WorkflowEngine::new(&client, &registry, &exec, &events, &config);
        let item = Item::new(HierarchicalId::root(1), "what is 2+2", "correct answer given", vec![], 1);
        let mut plan = single_item_plan(item);

        let call = engine.run(&mut plan, "s1", "en", CancellationToken::new());
        tokio::pin!(call);
        tokio::time::advance(Duration::from_secs(1)).await;
        let outcome = call.await.unwrap();

        assert_eq!(outcome.completed, 1);
        assert_eq!(plan.items[0].status, ItemStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_dependency_is_skipped_after_blocked_bound() {
        let registry = ProviderRegistry::new();
        let exec = executor();
        let events = EventBus::new(32);
        let config = test_config();
        let client = llm_client(vec![]);

        let engine = WorkflowEngine::new(&client, &registry, &exec, &events, &config);
        let missing_dep = HierarchicalId::parse("99").unwrap();
        let item = Item::new(HierarchicalId::root(1), "do something", "done", vec![missing_dep], 1);
        let mut plan = Plan::new("p1", "do things", PlanMode::Standard, 1, vec![item], PlanContext::default());

        let call = engine.run(&mut plan, "s1", "en", CancellationToken::new());
        tokio::pin!(call);
        tokio::time::advance(Duration::from_secs(1)).await;
        let outcome = call.await.unwrap();

        assert_eq!(plan.items[0].status, ItemStatus::Skipped);
        assert!(plan.items[0].skip_reason.as_deref().unwrap().contains("blocked"));
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn verification_failure_with_no_attempts_left_escalates_to_replanner_skip() {
        let registry = registry_with_fs().await;
        let exec = executor();
        let events = EventBus::new(16);
        let config = test_config();

        let plan_body = r#"{"tool_calls":[{"server":"fs","tool":"write_file","parameters":{"path":"/tmp/a","content":"x"}}],"reasoning":"writing"}"#;
        let evidence_body = r#"{"tool_calls":[],"reasoning":"no evidence available"}"#;
        let decision_body = r#"{"verified":false,"confidence":10,"reason":"file missing","evidence":"none"}"#;
        let replan_body = r#"{"strategy":"skip_and_continue","reason":"not recoverable"}"#;
        let client = llm_client(vec![
            Ok(plan_body.to_string()),
            Ok(evidence_body.to_string()),
            Ok(decision_body.to_string()),
            Ok(replan_body.to_string()),
        ]);

        let engine = WorkflowEngine::new(&client, &registry, &exec, &events, &config);
        let item = Item::new(HierarchicalId::root(1), "write a file at /tmp/a", "file contains x", vec![], 1);
        let mut plan = single_item_plan(item);

        let call = engine.run(&mut plan, "s1", "en", CancellationToken::new());
        tokio::pin!(call);
        tokio::time::advance(Duration::from_secs(5)).await;
        let outcome = call.await.unwrap();

        assert_eq!(plan.items[0].status, ItemStatus::Skipped);
        assert_eq!(plan.items[0].skip_reason.as_deref(), Some("not recoverable"));
        assert_eq!(outcome.completed, 0);
    }

    #[test]
    fn backoff_follows_the_exact_doubling_schedule() {
        assert_eq!(backoff_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(backoff_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(backoff_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(backoff_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(backoff_for_attempt(5), Duration::from_millis(8000));
    }
}
