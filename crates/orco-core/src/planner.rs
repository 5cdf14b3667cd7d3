//! §4.7 Planner — the Task-path entry point: a feasibility assessment
//! followed by plan creation, producing the initial [`Plan`].

use serde::Deserialize;
use serde_json::json;
use tracing::{instrument, warn};

use orco_ids::HierarchicalId;
use orco_llm::{LlmClient, Message, ModelConfig, Priority};

use crate::error::{Error, Result};
use crate::event_bus::EventBus;
use crate::plan::{Item, Plan, PlanContext, PlanMode};
use crate::event_bus::WorkflowEvent;

/// Result of the feasibility-reasoning stage. Diagnostic — nothing in this
/// crate rejects a request for being judged infeasible; it only shapes
/// `mode`/`complexity` and is carried along for the caller's own use (e.g.
/// surfacing `strategy`/`risks` in a chat-facing message).
#[derive(Debug, Clone)]
pub struct FeasibilityAssessment {
    /// Whether the Planner judges the request achievable at all.
    pub feasible: bool,
    /// Confidence in `[0,100]`.
    pub confidence: u8,
    /// High-level approach.
    pub strategy: String,
    /// Named risks.
    pub risks: Vec<String>,
    /// Things that must be true/available first.
    pub prerequisites: Vec<String>,
    /// Rough step count, used to choose `Standard` vs `Extended` mode.
    pub estimated_steps: u32,
    /// Free-text justification.
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawFeasibility {
    #[serde(default = "default_true")]
    feasible: bool,
    #[serde(default = "default_low_confidence")]
    confidence: u8,
    #[serde(default)]
    strategy: String,
    #[serde(default)]
    risks: Vec<String>,
    #[serde(default)]
    prerequisites: Vec<String>,
    #[serde(default)]
    estimated_steps: u32,
    #[serde(default)]
    reasoning: String,
}

fn default_true() -> bool {
    true
}

fn default_low_confidence() -> u8 {
    30
}

/// One item as returned by the plan-creation call. `dependencies` names
/// earlier items by their position in this same array (0-based) — the LLM
/// never sees hierarchical IDs, since those are assigned after the fact in
/// declaration order.
#[derive(Debug, Deserialize)]
struct RawPlanItem {
    action: String,
    success_criteria: String,
    #[serde(default)]
    dependencies: Vec<usize>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    tts: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawPlanResponse {
    #[serde(default)]
    items: Vec<RawPlanItem>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    complexity: Option<u8>,
}

const FEASIBILITY_SYSTEM_PROMPT: &str = "Assess whether the user's request is achievable with \
    filesystem, shell, browser, and desktop-automation tools. Respond as JSON: \
    {\"feasible\": bool, \"confidence\": 0..100, \"strategy\": \"...\", \"risks\": [\"...\"], \
    \"prerequisites\": [\"...\"], \"estimated_steps\": int, \"reasoning\": \"...\"}.";

const PLAN_SYSTEM_PROMPT: &str = "Decompose the user's request into an ordered list of concrete, \
    independently verifiable steps. Respond as JSON: {\"items\": [{\"action\": \"...\", \
    \"success_criteria\": \"...\", \"dependencies\": [<0-based index of an earlier item in this \
    array>], \"max_attempts\": int, \"tts\": \"...\"|null}], \"summary\": \"...\", \
    \"complexity\": 1..10}. Every dependency index must refer to an item listed earlier in the \
    array. Return at least one item.";

/// Produces the initial [`Plan`] for a Task-mode request.
pub struct Planner<'a> {
    client: &'a LlmClient,
    feasibility_config: &'a ModelConfig,
    plan_config: &'a ModelConfig,
    events: &'a EventBus,
}

impl<'a> Planner<'a> {
    /// Build a planner against the feasibility and plan-creation stage
    /// configs (distinct models are allowed per §6).
    #[must_use]
    pub fn new(
        client: &'a LlmClient,
        feasibility_config: &'a ModelConfig,
        plan_config: &'a ModelConfig,
        events: &'a EventBus,
    ) -> Self {
        Self {
            client,
            feasibility_config,
            plan_config,
            events,
        }
    }

    /// Stage 1: judge whether `request` is achievable at all. Parse
    /// failures default to feasible at low confidence rather than
    /// blocking the request outright.
    #[instrument(skip(self, request))]
    pub async fn assess_feasibility(&self, request: &str) -> Result<FeasibilityAssessment> {
        let messages = vec![Message::system(FEASIBILITY_SYSTEM_PROMPT), Message::user(request)];
        let schema = json!({
            "type": "object",
            "required": ["feasible"],
            "properties": {
                "feasible": {"type": "boolean"},
                "confidence": {"type": "integer", "minimum": 0, "maximum": 100},
                "strategy": {"type": "string"},
                "risks": {"type": "array", "items": {"type": "string"}},
                "prerequisites": {"type": "array", "items": {"type": "string"}},
                "estimated_steps": {"type": "integer", "minimum": 0},
                "reasoning": {"type": "string"}
            }
        });

        let response = self
            .client
            .complete_constrained(messages, self.feasibility_config, Priority::Normal, schema)
            .await?;

        let raw: RawFeasibility = match serde_json::from_str(&response.content) {
            Ok(r) => r,
            Err(_) => {
                return Ok(FeasibilityAssessment {
                    feasible: true,
                    confidence: 30,
                    strategy: String::new(),
                    risks: Vec::new(),
                    prerequisites: Vec::new(),
                    estimated_steps: 0,
                    reasoning: "feasibility response unparseable; defaulting to feasible".into(),
                });
            }
        };

        Ok(FeasibilityAssessment {
            feasible: raw.feasible,
            confidence: raw.confidence.min(100),
            strategy: raw.strategy,
            risks: raw.risks,
            prerequisites: raw.prerequisites,
            estimated_steps: raw.estimated_steps,
            reasoning: raw.reasoning,
        })
    }

    /// Stage 2: produce the ordered item list, assign root hierarchical
    /// IDs in declaration order, and run the deterministic success-criteria
    /// normalization. Fails if the plan comes back empty or malformed.
    #[instrument(skip(self, request))]
    async fn create_items(&self, request: &str) -> Result<(Vec<Item>, String, u8)> {
        let messages = vec![Message::system(PLAN_SYSTEM_PROMPT), Message::user(request)];
        let schema = json!({
            "type": "object",
            "required": ["items"],
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["action", "success_criteria"],
                        "properties": {
                            "action": {"type": "string"},
                            "success_criteria": {"type": "string"},
                            "dependencies": {"type": "array", "items": {"type": "integer"}},
                            "max_attempts": {"type": "integer", "minimum": 1},
                            "tts": {"type": ["string", "null"]}
                        }
                    }
                },
                "summary": {"type": "string"},
                "complexity": {"type": "integer", "minimum": 1, "maximum": 10}
            }
        });

        let response = self
            .client
            .complete_constrained(messages, self.plan_config, Priority::Normal, schema)
            .await?;

        let raw: RawPlanResponse = serde_json::from_str(&response.content)
            .map_err(|e| Error::Parse(format!("plan response did not parse: {e}")))?;

        if raw.items.is_empty() {
            return Err(Error::Validation("planner returned an empty plan".into()));
        }

        let root_ids: Vec<HierarchicalId> = (1..=raw.items.len() as u32).map(HierarchicalId::root).collect();

        let mut items = Vec::with_capacity(raw.items.len());
        for (index, raw_item) in raw.items.iter().enumerate() {
            let mut dependencies = Vec::new();
            for &dep_index in &raw_item.dependencies {
                match root_ids.get(dep_index) {
                    Some(id) if dep_index < index => dependencies.push(id.clone()),
                    _ => warn!(
                        item_index = index,
                        dep_index, "dropping dependency index that does not refer to an earlier item"
                    ),
                }
            }

            let mut success_criteria = raw_item.success_criteria.clone();
            normalize_success_criteria(&raw_item.action, &mut success_criteria);

            let mut item = Item::new(
                root_ids[index].clone(),
                raw_item.action.clone(),
                success_criteria,
                dependencies,
                raw_item.max_attempts.unwrap_or(1),
            );
            item.tts = raw_item.tts.clone();
            items.push(item);
        }

        let complexity = raw.complexity.unwrap_or_else(|| estimate_complexity(items.len()));
        Ok((items, raw.summary, complexity))
    }

    /// Run both stages and assemble the plan. `session_id` doubles as the
    /// plan id; `estimated_steps` from the feasibility stage chooses
    /// between `Standard` and `Extended` mode.
    pub async fn plan(&self, session_id: &str, request: &str, context: PlanContext) -> Result<Plan> {
        let feasibility = self.assess_feasibility(request).await?;
        let (items, summary, complexity) = self.create_items(request).await?;

        let mode = if feasibility.estimated_steps as usize > items.len().max(5) {
            PlanMode::Extended
        } else {
            PlanMode::Standard
        };

        let item_count = items.len();
        let plan = Plan::new(session_id, request, mode, complexity, items, context);

        self.events.publish(WorkflowEvent::TodoCreated {
            session_id: session_id.to_string(),
            summary: if summary.is_empty() {
                format!("{item_count}-step plan for: {request}")
            } else {
                summary
            },
            item_count,
            mode: match mode {
                PlanMode::Standard => "standard".to_string(),
                PlanMode::Extended => "extended".to_string(),
            },
        });

        Ok(plan)
    }
}

fn estimate_complexity(item_count: usize) -> u8 {
    (item_count as u8).clamp(1, 10)
}

/// For items whose action or criteria mentions video playback, fullscreen,
/// or similar, append an explicit observable indicator so the Verifier has
/// something concrete to check for (spec: deterministic normalization, not
/// left to the LLM).
fn normalize_success_criteria(action: &str, success_criteria: &mut String) {
    let haystack = format!("{action} {success_criteria}").to_lowercase();
    if haystack.contains("play") && (haystack.contains("video") || haystack.contains("movie")) {
        success_criteria.push_str("; playback timer is running");
    }
    if haystack.contains("fullscreen") || haystack.contains("full screen") {
        success_criteria.push_str("; fullscreen indicator visible or window covers the entire display");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orco_llm::{MockProvider, Throttle};
    use std::time::Duration;

    fn client(responses: Vec<Result<String, orco_llm::Error>>) -> LlmClient {
        let provider = MockProvider::with_responses("mock", "planner-model", responses);
        let throttle = Throttle::spawn(Duration::from_millis(1), 4);
        LlmClient::new(Box::new(provider), None, throttle)
    }

    fn model_config() -> ModelConfig {
        ModelConfig {
            model: "planner-model".into(),
            fallback_model: None,
            temperature: Some(0.2),
            max_tokens: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn assigns_root_ids_in_declaration_order_and_resolves_dependency_index() {
        let body = r#"{"items":[
            {"action":"create file","success_criteria":"file exists","dependencies":[]},
            {"action":"verify file","success_criteria":"content matches","dependencies":[0]}
        ],"summary":"create and verify","complexity":3}"#;
        let client = client(vec![Ok(body.to_string())]);
        let config = model_config();
        let events = EventBus::new(4);
        let planner = Planner::new(&client, &config, &config, &events);

        let (items, summary, complexity) = planner.create_items("do it").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id.to_string(), "1");
        assert_eq!(items[1].id.to_string(), "2");
        assert_eq!(items[1].dependencies, vec![items[0].id.clone()]);
        assert_eq!(summary, "create and verify");
        assert_eq!(complexity, 3);
    }

    #[tokio::test]
    async fn rejects_empty_plan() {
        let client = client(vec![Ok(r#"{"items":[]}"#.to_string())]);
        let config = model_config();
        let events = EventBus::new(4);
        let planner = Planner::new(&client, &config, &config, &events);
        let err = planner.create_items("do nothing").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn feasibility_parse_failure_defaults_to_feasible_low_confidence() {
        let client = client(vec![Ok("not json".to_string())]);
        let config = model_config();
        let events = EventBus::new(4);
        let planner = Planner::new(&client, &config, &config, &events);
        let assessment = planner.assess_feasibility("do something").await.unwrap();
        assert!(assessment.feasible);
        assert!(assessment.confidence < 50);
    }

    #[tokio::test]
    async fn normalizes_video_and_fullscreen_success_criteria() {
        let mut criteria = "video is showing".to_string();
        normalize_success_criteria("play the video", &mut criteria);
        assert!(criteria.contains("playback timer is running"));

        let mut criteria = "window is large".to_string();
        normalize_success_criteria("make it fullscreen", &mut criteria);
        assert!(criteria.contains("fullscreen indicator"));
    }

    #[tokio::test]
    async fn full_plan_emits_todo_created() {
        let feasibility_body = r#"{"feasible":true,"confidence":80,"estimated_steps":2,"reasoning":"simple"}"#;
        let plan_body = r#"{"items":[
            {"action":"create file","success_criteria":"file exists","dependencies":[]},
            {"action":"verify file","success_criteria":"content matches","dependencies":[0]}
        ],"summary":"create and verify","complexity":2}"#;
        let client = client(vec![Ok(feasibility_body.to_string()), Ok(plan_body.to_string())]);
        let config = model_config();
        let events = EventBus::new(4);
        let mut rx = events.subscribe();
        let planner = Planner::new(&client, &config, &config, &events);

        let plan = planner.plan("s1", "create and verify a file", PlanContext::default()).await.unwrap();
        assert_eq!(plan.items.len(), 2);
        assert_eq!(plan.mode, PlanMode::Standard);

        let event = rx.recv().await.unwrap();
        match event {
            WorkflowEvent::TodoCreated { item_count, .. } => assert_eq!(item_count, 2),
            _ => panic!("expected TodoCreated"),
        }
    }
}
