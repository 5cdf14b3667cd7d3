//! The §6 configuration document: per-stage model settings, the LLM
//! endpoint, retry budgets, and app/path mappings, layered as embedded
//! defaults, optional `config/local.toml`, then `ORCO_`-prefixed
//! environment overrides.

use std::collections::HashMap;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use orco_llm::ModelConfig;

use crate::error::{Error, Result};

/// Embedded default configuration, compiled into the binary so the core
/// runs with sane settings even with no config files on disk.
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// The LLM endpoint addresses (§6 `apiEndpoint`).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEndpointConfig {
    /// Primary endpoint URL.
    pub primary: String,
    /// Optional fallback endpoint, attempted once if the primary is
    /// refused/unreachable.
    #[serde(default)]
    pub fallback: Option<String>,
    /// Whether the fallback endpoint is enabled at all.
    #[serde(default)]
    pub use_fallback: bool,
}

/// Retry/attempt budgets (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct RetryBudgets {
    /// Primary-execution attempts per item before escalating to the
    /// Replanner. Spec default: 1.
    pub item_execution_max_attempts: u32,
    /// Replan rounds per lineage before forcing `skipped`. Spec: `M=3`.
    pub replanning_max_attempts: u32,
    /// ToolPlanner attempts across the configured model sequence. Spec: 3.
    pub tool_planning_max_attempts: u32,
    /// Fixed delay between ToolPlanner attempts, in milliseconds.
    pub tool_planning_retry_delay_ms: u64,
}

/// Raw, TOML-shaped form of a stage's model settings (duration as
/// milliseconds, since `config`'s TOML source has no native duration type).
#[derive(Debug, Clone, Deserialize)]
struct RawStageConfig {
    model: String,
    #[serde(default)]
    fallback_model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    timeout_ms: u64,
}

impl From<RawStageConfig> for ModelConfig {
    fn from(raw: RawStageConfig) -> Self {
        ModelConfig {
            model: raw.model,
            fallback_model: raw.fallback_model,
            temperature: raw.temperature,
            max_tokens: raw.max_tokens,
            timeout: Duration::from_millis(raw.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawStages {
    mode_router: RawStageConfig,
    planner_feasibility: RawStageConfig,
    planner_plan: RawStageConfig,
    provider_selector: RawStageConfig,
    tool_planner: RawStageConfig,
    verifier: RawStageConfig,
    replanner: RawStageConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    api_endpoint: ApiEndpointConfig,
    retry: RetryBudgets,
    stages: RawStages,
    #[serde(default)]
    app_paths: HashMap<String, String>,
}

/// The fully-resolved configuration document driving one orchestrator
/// instance. No environment variables are required by the core itself —
/// `ORCO_`-prefixed ones are an optional override mechanism on top of the
/// embedded defaults.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// ModeRouter's model config.
    pub mode_router: ModelConfig,
    /// Planner's feasibility-reasoning call.
    pub planner_feasibility: ModelConfig,
    /// Planner's plan-creation call.
    pub planner_plan: ModelConfig,
    /// ProviderSelector's classification call.
    pub provider_selector: ModelConfig,
    /// ToolPlanner's call.
    pub tool_planner: ModelConfig,
    /// Verifier's decision call.
    pub verifier: ModelConfig,
    /// Replanner's call.
    pub replanner: ModelConfig,
    /// LLM endpoint addresses.
    pub api_endpoint: ApiEndpointConfig,
    /// Retry/attempt budgets.
    pub retry: RetryBudgets,
    /// App-name to launch-command mappings, consulted by ToolPlanner's
    /// deterministic fallback and the Verifier's launch-indicator check.
    pub app_paths: HashMap<String, String>,
}

impl From<RawConfig> for OrchestratorConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            mode_router: raw.stages.mode_router.into(),
            planner_feasibility: raw.stages.planner_feasibility.into(),
            planner_plan: raw.stages.planner_plan.into(),
            provider_selector: raw.stages.provider_selector.into(),
            tool_planner: raw.stages.tool_planner.into(),
            verifier: raw.stages.verifier.into(),
            replanner: raw.stages.replanner.into(),
            api_endpoint: raw.api_endpoint,
            retry: raw.retry,
            app_paths: raw.app_paths,
        }
    }
}

impl OrchestratorConfig {
    /// Load the embedded defaults, layered under `config/local.toml` (if
    /// present) and `ORCO_`-prefixed environment variables (highest
    /// priority). Call [`dotenvy::dotenv`] before this if `.env` support is
    /// wanted — the core itself never reads it implicitly.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("ORCO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Invariant(format!("failed to build configuration: {e}")))?;

        let raw: RawConfig = config
            .try_deserialize()
            .map_err(|e| Error::Invariant(format!("failed to deserialize configuration: {e}")))?;
        Ok(raw.into())
    }

    /// Override a single stage's model name, keeping its other settings.
    /// Intended for quick CLI overrides (`--model`) rather than file edits.
    #[must_use]
    pub fn with_tool_planner_model(mut self, model: impl Into<String>) -> Self {
        self.tool_planner.model = model.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_load_without_overrides() {
        let cfg = OrchestratorConfig::load().expect("embedded defaults must parse");
        assert!(!cfg.mode_router.model.is_empty());
        assert_eq!(cfg.retry.replanning_max_attempts, 3);
        assert_eq!(cfg.retry.tool_planning_max_attempts, 3);
    }

    #[test]
    fn env_override_replaces_a_stage_model() {
        std::env::set_var("ORCO_STAGES__TOOL_PLANNER__MODEL", "override-model");
        let cfg = OrchestratorConfig::load().unwrap();
        std::env::remove_var("ORCO_STAGES__TOOL_PLANNER__MODEL");
        assert_eq!(cfg.tool_planner.model, "override-model");
    }

    #[test]
    fn with_tool_planner_model_overrides_in_place() {
        let cfg = OrchestratorConfig::load().unwrap().with_tool_planner_model("custom");
        assert_eq!(cfg.tool_planner.model, "custom");
    }
}
