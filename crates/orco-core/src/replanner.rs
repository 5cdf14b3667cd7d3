//! §4.12 Replanner — invoked once an item has exhausted its primary
//! `max_attempts` and the Verifier has rejected it. Decides whether to
//! inject replacement children, skip the item, or abort the run.

use serde::Deserialize;
use serde_json::json;
use tracing::{instrument, warn};

use orco_llm::{LlmClient, Message, ModelConfig, Priority};

use crate::error::Result;
use crate::plan::Item;
use crate::verifier::VerificationOutcome;

/// Replan rounds a single lineage (a chain of parent->child replans) may
/// consume before the engine forces `skipped` (§4.12, §8 invariant: "at
/// most M=3 replanning rounds per lineage").
pub const MAX_LINEAGE_ROUNDS: u32 = 3;

/// Upper bound on how many children one `inject_children` decision may
/// introduce (§4.12 "1..K, K configured").
pub const MAX_NEW_ITEMS: usize = 5;

/// One of the three strategies the Replanner may choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplanStrategy {
    /// Supersede the failed item with one or more child items.
    InjectChildren,
    /// Abandon the item and continue with the rest of the plan.
    SkipAndContinue,
    /// Terminate the entire run.
    Abort,
}

/// One item to splice in under the failed item, when `strategy ==
/// InjectChildren`. `dependencies` are 0-based indices into this same
/// `new_items` array — the Replanner never sees hierarchical IDs, which
/// are assigned by the engine after insertion, the same convention the
/// Planner uses for its root items.
#[derive(Debug, Clone)]
pub struct NewItemSpec {
    /// Natural-language imperative.
    pub action: String,
    /// Natural-language predicate the Verifier will adjudicate.
    pub success_criteria: String,
    /// Indices of earlier entries in `new_items` this one depends on.
    pub dependencies: Vec<usize>,
    /// Attempt budget for the new item; defaults to the failed item's own.
    pub max_attempts: Option<u32>,
}

/// The Replanner's decision for one failed item.
#[derive(Debug, Clone)]
pub struct ReplanDecision {
    /// Chosen strategy.
    pub strategy: ReplanStrategy,
    /// Free-text justification, carried into `replan_reason`/`skip_reason`
    /// and the `mcp_item_replanned`/`mcp_item_skipped` events.
    pub reason: String,
    /// Present (non-empty) only when `strategy == InjectChildren`.
    pub new_items: Vec<NewItemSpec>,
}

#[derive(Debug, Deserialize)]
struct RawNewItem {
    action: String,
    success_criteria: String,
    #[serde(default)]
    dependencies: Vec<usize>,
    #[serde(default)]
    max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDecision {
    #[serde(default)]
    strategy: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    new_items: Vec<RawNewItem>,
}

const SYSTEM_PROMPT: &str = "An item in a task plan failed verification after exhausting its \
    execution attempts. Decide one of three strategies: \"inject_children\" (break it into \
    smaller steps that together accomplish the original goal), \"skip_and_continue\" (abandon \
    this item and let the rest of the plan proceed), or \"abort\" (the whole run cannot \
    proceed). Respond as JSON: {\"strategy\": \"inject_children\"|\"skip_and_continue\"|\"abort\", \
    \"reason\": \"...\", \"new_items\": [{\"action\": \"...\", \"success_criteria\": \"...\", \
    \"dependencies\": [<0-based index of an earlier entry in this array>], \"max_attempts\": \
    int}]}. Only populate new_items when strategy is inject_children. A dependency index must \
    refer to an earlier entry in new_items, never a later or equal one.";

/// Produces a [`ReplanDecision`] for one exhausted, verification-failed item.
pub struct Replanner<'a> {
    client: &'a LlmClient,
    config: &'a ModelConfig,
}

impl<'a> Replanner<'a> {
    /// Build a replanner against the replan stage's model config.
    #[must_use]
    pub fn new(client: &'a LlmClient, config: &'a ModelConfig) -> Self {
        Self { client, config }
    }

    /// Decide a strategy for `item`, given the Executor's and Verifier's
    /// output. If `item`'s lineage has already consumed
    /// [`MAX_LINEAGE_ROUNDS`], this forces `skip_and_continue` without an
    /// LLM call.
    #[instrument(skip(self, item, executor_summary, verification), fields(item_id = %item.id, replan_round = item.replan_round))]
    pub async fn replan(&self, item: &Item, executor_summary: &str, verification: &VerificationOutcome) -> Result<ReplanDecision> {
        if item.replan_round >= MAX_LINEAGE_ROUNDS {
            return Ok(ReplanDecision {
                strategy: ReplanStrategy::SkipAndContinue,
                reason: format!("lineage exhausted its {MAX_LINEAGE_ROUNDS} replan rounds"),
                new_items: Vec::new(),
            });
        }

        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "Action: {}\nSuccess criteria: {}\nExecutor output: {}\nVerifier reason: {}\nVerifier confidence: {}",
                item.action, item.success_criteria, executor_summary, verification.reason, verification.confidence
            )),
        ];
        let schema = json!({
            "type": "object",
            "required": ["strategy"],
            "properties": {
                "strategy": {"enum": ["inject_children", "skip_and_continue", "abort"]},
                "reason": {"type": "string"},
                "new_items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["action", "success_criteria"],
                        "properties": {
                            "action": {"type": "string"},
                            "success_criteria": {"type": "string"},
                            "dependencies": {"type": "array", "items": {"type": "integer"}},
                            "max_attempts": {"type": "integer", "minimum": 1}
                        }
                    }
                }
            }
        });

        let response = match self.client.complete_constrained(messages, self.config, Priority::High, schema).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "replan call failed; defaulting to skip");
                return Ok(ReplanDecision {
                    strategy: ReplanStrategy::SkipAndContinue,
                    reason: format!("replan call failed: {e}"),
                    new_items: Vec::new(),
                });
            }
        };

        let raw: RawDecision = match serde_json::from_str(&response.content) {
            Ok(r) => r,
            Err(_) => {
                return Ok(ReplanDecision {
                    strategy: ReplanStrategy::SkipAndContinue,
                    reason: "replan response unparseable".to_string(),
                    new_items: Vec::new(),
                });
            }
        };

        let strategy = match raw.strategy.as_str() {
            "inject_children" => ReplanStrategy::InjectChildren,
            "abort" => ReplanStrategy::Abort,
            _ => ReplanStrategy::SkipAndContinue,
        };

        if strategy != ReplanStrategy::InjectChildren {
            return Ok(ReplanDecision {
                strategy,
                reason: raw.reason,
                new_items: Vec::new(),
            });
        }

        let mut new_items = Vec::with_capacity(raw.new_items.len().min(MAX_NEW_ITEMS));
        for (index, raw_item) in raw.new_items.iter().take(MAX_NEW_ITEMS).enumerate() {
            let mut dependencies = Vec::new();
            for &dep_index in &raw_item.dependencies {
                if dep_index < index {
                    dependencies.push(dep_index);
                } else {
                    warn!(index, dep_index, "dropping forward/self-referencing replan dependency");
                }
            }
            new_items.push(NewItemSpec {
                action: raw_item.action.clone(),
                success_criteria: raw_item.success_criteria.clone(),
                dependencies,
                max_attempts: raw_item.max_attempts,
            });
        }

        if new_items.is_empty() {
            return Ok(ReplanDecision {
                strategy: ReplanStrategy::SkipAndContinue,
                reason: "inject_children decided with no usable new_items".to_string(),
                new_items: Vec::new(),
            });
        }

        Ok(ReplanDecision {
            strategy: ReplanStrategy::InjectChildren,
            reason: raw.reason,
            new_items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orco_llm::{MockProvider, Throttle};
    use std::time::Duration;

    fn client(responses: Vec<std::result::Result<String, orco_llm::Error>>) -> LlmClient {
        let provider = MockProvider::with_responses("mock", "replanner-model", responses);
        let throttle = Throttle::spawn(Duration::from_millis(1), 4);
        LlmClient::new(Box::new(provider), None, throttle)
    }

    fn model_config() -> ModelConfig {
        ModelConfig {
            model: "replanner-model".into(),
            fallback_model: None,
            temperature: Some(0.2),
            max_tokens: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn verification(verified: bool) -> VerificationOutcome {
        VerificationOutcome {
            verified,
            confidence: 10,
            reason: "click had no effect".to_string(),
            evidence_summary: String::new(),
        }
    }

    #[tokio::test]
    async fn forces_skip_once_lineage_exhausted() {
        let client = client(vec![Ok("should not be called".to_string())]);
        let config = model_config();
        let replanner = Replanner::new(&client, &config);

        let mut item = Item::new(orco_ids::HierarchicalId::root(2), "click 2+2", "result shown", vec![], 1);
        item.replan_round = MAX_LINEAGE_ROUNDS;
        let decision = replanner.replan(&item, "click failed", &verification(false)).await.unwrap();
        assert_eq!(decision.strategy, ReplanStrategy::SkipAndContinue);
        assert!(decision.reason.contains("exhausted"));
    }

    #[tokio::test]
    async fn injects_children_with_valid_dependencies() {
        let body = r#"{"strategy":"inject_children","reason":"needs finer steps","new_items":[
            {"action":"wait_for_ready","success_criteria":"app window visible","dependencies":[]},
            {"action":"click_2","success_criteria":"2 entered","dependencies":[0]},
            {"action":"click_plus","success_criteria":"+ entered","dependencies":[1]}
        ]}"#;
        let client = client(vec![Ok(body.to_string())]);
        let config = model_config();
        let replanner = Replanner::new(&client, &config);

        let item = Item::new(orco_ids::HierarchicalId::root(2), "click 2+2", "result shown", vec![], 1);
        let decision = replanner.replan(&item, "click failed", &verification(false)).await.unwrap();
        assert_eq!(decision.strategy, ReplanStrategy::InjectChildren);
        assert_eq!(decision.new_items.len(), 3);
        assert_eq!(decision.new_items[1].dependencies, vec![0]);
    }

    #[tokio::test]
    async fn drops_forward_referencing_dependency() {
        let body = r#"{"strategy":"inject_children","reason":"r","new_items":[
            {"action":"a","success_criteria":"a done","dependencies":[1]},
            {"action":"b","success_criteria":"b done","dependencies":[]}
        ]}"#;
        let client = client(vec![Ok(body.to_string())]);
        let config = model_config();
        let replanner = Replanner::new(&client, &config);

        let item = Item::new(orco_ids::HierarchicalId::root(2), "do x", "x done", vec![], 1);
        let decision = replanner.replan(&item, "failed", &verification(false)).await.unwrap();
        assert!(decision.new_items[0].dependencies.is_empty());
    }

    #[tokio::test]
    async fn inject_children_with_no_items_falls_back_to_skip() {
        let body = r#"{"strategy":"inject_children","reason":"r","new_items":[]}"#;
        let client = client(vec![Ok(body.to_string())]);
        let config = model_config();
        let replanner = Replanner::new(&client, &config);

        let item = Item::new(orco_ids::HierarchicalId::root(2), "do x", "x done", vec![], 1);
        let decision = replanner.replan(&item, "failed", &verification(false)).await.unwrap();
        assert_eq!(decision.strategy, ReplanStrategy::SkipAndContinue);
    }

    #[tokio::test]
    async fn abort_strategy_carries_reason() {
        let body = r#"{"strategy":"abort","reason":"irrecoverable precondition missing"}"#;
        let client = client(vec![Ok(body.to_string())]);
        let config = model_config();
        let replanner = Replanner::new(&client, &config);

        let item = Item::new(orco_ids::HierarchicalId::root(1), "do x", "x done", vec![], 1);
        let decision = replanner.replan(&item, "failed", &verification(false)).await.unwrap();
        assert_eq!(decision.strategy, ReplanStrategy::Abort);
        assert!(decision.reason.contains("irrecoverable"));
    }

    #[tokio::test]
    async fn parse_failure_defaults_to_skip() {
        let client = client(vec![Ok("not json".to_string())]);
        let config = model_config();
        let replanner = Replanner::new(&client, &config);

        let item = Item::new(orco_ids::HierarchicalId::root(1), "do x", "x done", vec![], 1);
        let decision = replanner.replan(&item, "failed", &verification(false)).await.unwrap();
        assert_eq!(decision.strategy, ReplanStrategy::SkipAndContinue);
    }
}
