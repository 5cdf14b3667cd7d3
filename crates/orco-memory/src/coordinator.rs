//! Decide whether long-term memory applies, retrieve it, and decide
//! whether a finished exchange is worth storing.

use std::sync::Arc;

use tracing::{debug, warn};

use orco_providers::{MemoryProvider, Provider};

use crate::cache::{CacheKey, RetrievalCache};
use crate::error::Result;
use crate::extractor::{self, decision_score, preference_score};
use crate::types::RetrievedNode;

const TOP_K_ENTITIES: usize = 5;
const TOP_RELATIONS: usize = 3;
const MAX_OBSERVATIONS_PER_ENTITY: usize = 3;

/// Known phrases that should never themselves be persisted back into
/// memory — their presence in a reply means the reply is an echo of
/// injected context or the system prompt, not new information.
const LEAKAGE_MARKERS: &[&str] = &[
    "relevant memory:",
    "memory context:",
    "system prompt:",
    "you are an adaptive multi-agent task orchestrator",
];

/// Result of a retrieval attempt: the formatted block to append to the
/// system prompt, or `None` if memory wasn't needed or retrieval failed.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Rendered block suitable for direct inclusion in a system prompt.
    pub prompt_block: Option<String>,
}

/// Coordinates memory retrieval and storage for one orchestrator run.
pub struct MemoryCoordinator<P: Provider + ?Sized> {
    provider: Arc<P>,
    cache: RetrievalCache,
}

impl<P: Provider + ?Sized> MemoryCoordinator<P> {
    /// Build a coordinator over the given memory provider.
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            cache: RetrievalCache::default(),
        }
    }

    /// A fast, rule-based classifier deciding whether a request needs
    /// long-term memory. True when the request references past context,
    /// preferences, or explicitly asks to recall something.
    #[must_use]
    pub fn needs_memory(&self, request: &str) -> bool {
        const MARKERS: &[&str] = &[
            "remember", "recall", "last time", "previously", "earlier",
            "as i mentioned", "my preference", "we discussed", "you said",
        ];
        let lower = request.to_lowercase();
        MARKERS.iter().any(|m| lower.contains(m))
    }

    /// Build a compact search query from the request and any matched
    /// trigger keywords.
    #[must_use]
    pub fn build_query(&self, request: &str) -> (String, Vec<String>) {
        const MARKERS: &[&str] = &[
            "remember", "recall", "last time", "previously", "earlier",
            "as i mentioned", "my preference", "we discussed", "you said",
        ];
        let lower = request.to_lowercase();
        let triggers: Vec<String> = MARKERS
            .iter()
            .filter(|m| lower.contains(**m))
            .map(|m| (*m).to_string())
            .collect();
        let query = request.chars().take(200).collect();
        (query, triggers)
    }

    /// Retrieve memory for `request` if needed, checking the cache first.
    /// Failures are logged and treated as "no memory available" — never
    /// propagated, since retrieval is advisory.
    pub async fn retrieve(&self, request: &str) -> RetrievalOutcome {
        if !self.needs_memory(request) {
            return RetrievalOutcome::default();
        }

        let (query, triggers) = self.build_query(request);
        let key = CacheKey::new(&query, triggers);

        if let Some((nodes, relations_text)) = self.cache.get(&key).await {
            debug!("memory cache hit");
            return RetrievalOutcome {
                prompt_block: Some(render_block(&nodes, &relations_text)),
            };
        }

        let result = match self.provider.search_nodes(&query, TOP_K_ENTITIES).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "memory retrieval failed, continuing without it");
                return RetrievalOutcome::default();
            }
        };

        let (nodes, relations_text) = parse_search_result(&result);
        self.cache.put(key, nodes.clone(), relations_text.clone()).await;

        RetrievalOutcome {
            prompt_block: Some(render_block(&nodes, &relations_text)),
        }
    }

    /// Decide whether a finished exchange should be stored, and if so,
    /// extract entities and persist them via `create_entities`.
    ///
    /// `explicit_request` is true when the user directly asked to
    /// remember something (e.g. via an explicit save-memory tool-call
    /// intent), which always qualifies regardless of content.
    pub async fn maybe_store(
        &self,
        user_message: &str,
        assistant_reply: &str,
        explicit_request: bool,
    ) -> Result<bool> {
        if contains_leakage(assistant_reply) || contains_leakage(user_message) {
            debug!("rejecting storage: exchange echoes memory/system-prompt context");
            return Ok(false);
        }

        let combined = format!("{user_message}\n{assistant_reply}");
        let lower = combined.to_lowercase();
        let eligible = explicit_request
            || preference_score(&lower) > 0.0
            || decision_score(&lower) > 0.0;

        if !eligible {
            return Ok(false);
        }

        let extraction = extractor::extract(&combined);
        let records = extractor::to_memory_records(&extraction);
        if records.is_empty() {
            return Ok(false);
        }

        let entities = serde_json::to_value(&records)?;
        self.provider.create_entities(entities).await.map_err(|e| {
            crate::error::Error::Provider(e.to_string())
        })?;
        debug!(count = records.len(), "stored extracted entities");
        Ok(true)
    }
}

fn contains_leakage(text: &str) -> bool {
    let lower = text.to_lowercase();
    LEAKAGE_MARKERS.iter().any(|m| lower.contains(m))
}

fn parse_search_result(value: &serde_json::Value) -> (Vec<RetrievedNode>, String) {
    let nodes = value
        .get("nodes")
        .or_else(|| value.get("entities"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .take(TOP_K_ENTITIES)
                .filter_map(|n| {
                    let name = n.get("name")?.as_str()?.to_string();
                    let entity_type = n
                        .get("entityType")
                        .or_else(|| n.get("entity_type"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("concept")
                        .to_string();
                    let observations = n
                        .get("observations")
                        .and_then(|v| v.as_array())
                        .map(|obs| {
                            obs.iter()
                                .filter_map(|o| o.as_str().map(String::from))
                                .take(MAX_OBSERVATIONS_PER_ENTITY)
                                .collect()
                        })
                        .unwrap_or_default();
                    Some(RetrievedNode { name, entity_type, observations })
                })
                .collect()
        })
        .unwrap_or_default();

    let relations_text = value
        .get("relations")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .take(TOP_RELATIONS)
                .filter_map(|r| r.as_str().map(String::from))
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default();

    (nodes, relations_text)
}

fn render_block(nodes: &[RetrievedNode], relations_text: &str) -> String {
    if nodes.is_empty() && relations_text.is_empty() {
        return String::new();
    }
    let mut block = String::from("Relevant memory:\n");
    for node in nodes {
        let obs = node.observations.join("; ");
        block.push_str(&format!("- {} ({}): {obs}\n", node.name, node.entity_type));
    }
    if !relations_text.is_empty() {
        block.push_str(&format!("Relations: {relations_text}\n"));
    }
    block
}
