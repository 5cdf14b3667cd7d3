//! Wires a single request through `ModeRouter` -> `Planner` ->
//! `WorkflowEngine`, printing the session's event stream as it happens.
//! This is the thin demonstrator the core needs in place of the teacher's
//! full channel/websocket server: one request in, one plan driven to
//! completion, events on stdout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use orco_core::{EventBus, Mode, ModeRouter, OrchestratorConfig, PlanContext, Planner, WorkflowEngine};
use orco_llm::{HttpProvider, HttpProviderConfig, LlmClient, MockProvider, Throttle as LlmThrottle};
use orco_providers::{
    register_builtins, LocalProvider, ProviderRegistry, Throttle as ToolThrottle, TimeoutPolicy,
    ToolExecutor, ToolRegistry,
};

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(120);
const LLM_MIN_SPACING: Duration = Duration::from_millis(200);
const LLM_MAX_IN_FLIGHT: usize = 4;
const TOOL_MIN_SPACING: Duration = Duration::from_millis(10);
const TOOL_MAX_IN_FLIGHT: usize = 8;

/// Run one request end to end: classify its mode, plan and drive it (if
/// `task`), or just report the classification otherwise.
pub async fn run_request(request: &str, mock: bool, language: &str) -> Result<()> {
    let config = OrchestratorConfig::load().context("loading orchestrator configuration")?;
    let events = EventBus::new(256);
    let mut printer = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = printer.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(_) => println!("{event:?}"),
            }
        }
    });

    let client = build_llm_client(&config, mock)?;
    let registry = build_provider_registry().await?;
    let tool_throttle = ToolThrottle::spawn(TOOL_MIN_SPACING, TOOL_MAX_IN_FLIGHT);
    let executor = ToolExecutor::new(tool_throttle, TimeoutPolicy::default());

    let router = ModeRouter::new(&client, &config.mode_router);
    let decision = router.route(request).await.context("classifying request")?;
    events.publish(orco_core::WorkflowEvent::ModeSelected {
        session_id: "cli".to_string(),
        mode: decision.mode,
        confidence: decision.confidence,
        reasoning: decision.reasoning.clone(),
    });

    match decision.mode {
        Mode::Task => {
            let planner = Planner::new(&client, &config.planner_feasibility, &config.planner_plan, &events);
            let context = PlanContext { original_request: request.to_string(), preferences: HashMap::new() };
            let mut plan = planner.plan("cli", request, context).await.context("creating plan")?;

            let engine = WorkflowEngine::new(&client, &registry, &executor, &events, &config);
            let outcome = engine
                .run(&mut plan, "cli", language, CancellationToken::new())
                .await
                .context("running workflow")?;

            info!(
                completed = outcome.completed,
                total = outcome.total,
                success_rate = outcome.success_rate,
                duration_ms = outcome.duration_ms,
                "workflow finished"
            );
        }
        Mode::Chat | Mode::Introspect => {
            println!(
                "routed to {:?} (confidence {:.2}): {}",
                decision.mode, decision.confidence, decision.reasoning
            );
        }
    }

    Ok(())
}

/// Build the shared LLM client: the configured endpoint pair, or a
/// scripted in-process provider when `mock` is set and no real endpoint
/// is available.
fn build_llm_client(config: &OrchestratorConfig, mock: bool) -> Result<LlmClient> {
    let throttle = LlmThrottle::spawn(LLM_MIN_SPACING, LLM_MAX_IN_FLIGHT);

    if mock {
        let provider = MockProvider::with_responses("mock", "orco-demo-model", scripted_demo_responses());
        return Ok(LlmClient::new(Box::new(provider), None, throttle));
    }

    let api_key = std::env::var("ORCO_API_KEY").ok();
    let primary = HttpProvider::new(HttpProviderConfig {
        name: "primary".to_string(),
        endpoint: config.api_endpoint.primary.clone(),
        api_key: api_key.clone(),
        model: config.tool_planner.model.clone(),
        timeout: HTTP_CLIENT_TIMEOUT,
    });
    let fallback = if config.api_endpoint.use_fallback {
        config.api_endpoint.fallback.clone().map(|endpoint| {
            Box::new(HttpProvider::new(HttpProviderConfig {
                name: "fallback".to_string(),
                endpoint,
                api_key,
                model: config.tool_planner.model.clone(),
                timeout: HTTP_CLIENT_TIMEOUT,
            })) as Box<dyn orco_llm::LlmProvider>
        })
    } else {
        None
    };

    Ok(LlmClient::new(Box::new(primary), fallback, throttle))
}

/// A single always-ready in-process provider over the built-in tool set
/// (filesystem, HTTP, exec, git), registered under the name `"local"`.
async fn build_provider_registry() -> Result<ProviderRegistry> {
    let mut tools = ToolRegistry::new();
    register_builtins(&mut tools);

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(LocalProvider::new("local", tools)));
    registry.refresh().await.context("refreshing provider registry")?;
    Ok(registry)
}

/// Canned responses for `--mock`, scripted to carry a single-item "write a
/// greeting file" request through mode routing, planning, provider
/// selection, tool planning, and verification without a real LLM endpoint.
fn scripted_demo_responses() -> Vec<orco_llm::Result<String>> {
    vec![
        Ok(r#"{"mode":"task","confidence":0.95,"reasoning":"imperative request naming a concrete artifact"}"#.to_string()),
        Ok(r#"{"feasible":true,"confidence":90,"strategy":"write the file directly","risks":[],"prerequisites":[],"estimated_steps":1,"reasoning":"single filesystem write"}"#.to_string()),
        Ok(r#"{"items":[{"action":"write a greeting to /tmp/orco-demo.txt","success_criteria":"the file exists and contains a greeting","dependencies":[],"max_attempts":1}],"summary":"write a demo greeting file","complexity":1}"#.to_string()),
        Ok(r#"{"selected_servers":["local"],"selected_prompts":["filesystem"],"confidence":0.9}"#.to_string()),
        Ok(r#"{"tool_calls":[{"server":"local","tool":"file_write","parameters":{"path":"/tmp/orco-demo.txt","content":"Hello from orco"}}],"reasoning":"writing the greeting directly"}"#.to_string()),
        Ok(r#"{"verified":true,"confidence":95,"reason":"file_write reported success","evidence":"file_write__local: ok"}"#.to_string()),
    ]
}
