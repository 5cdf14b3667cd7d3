//! Rule-based entity extraction — no LLM calls.
//!
//! Extracts entities from exchange content using regex patterns and
//! keyword dictionaries, then groups them into [`MemoryRecord`]s suitable
//! for `create_entities`. Each entity gets a relevance score based on
//! position, used only to order observations, not to gate storage.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{EntityKind, ExtractedEntity, ExtractedRelation, MemoryRecord, RelationKind};

// ── Compiled patterns ───────────────────────────────────────────

static RE_ACRONYM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][A-Za-z0-9]{1,5})\b").unwrap());

static RE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([\w\-]+\.(?:rs|toml|json|yaml|yml|md|py|ts|js|tsx|jsx|sql|sh|css|html))\b")
        .unwrap()
});

static RE_FUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:pub\s+)?(?:async\s+)?fn\s+(\w+)").unwrap());

static RE_FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\w+)\(\)").unwrap());

static RE_CRATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(orco-\w+)\b").unwrap());

static RE_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:error\[E\d+\]|Error::\w+|panic!?\b|unwrap\(\))").unwrap());

/// Technical concept keywords.
static CONCEPT_KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "graph rag", "embedding", "vector", "hnsw", "cosine", "websocket", "socket mode",
        "oauth", "jwt", "bearer", "rate limit", "middleware", "auth", "rbac", "scope",
        "sqlite", "redis", "migration", "wal", "tokio", "async", "spawn", "channel",
        "onnx", "tract", "llm", "prompt", "completion", "tool call", "function call",
        "orchestrator", "planner", "session", "context window", "replay", "event sourcing",
        "audit", "docker", "sandbox", "mcp", "sse", "json-rpc", "ci/cd", "pull request",
    ]
    .into_iter()
    .collect()
});

/// Known tool names (kept short; callers may supply extras).
static TOOL_NAMES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "exec", "web_search", "read_file", "write_file", "list_dir", "http_request",
        "search", "memory", "calculator", "calendar", "reminder", "note", "code_review", "git",
    ]
    .into_iter()
    .collect()
});

/// Keyword markers for preference/decision classification, used by
/// [`crate::coordinator::MemoryCoordinator`]'s storage-eligibility check.
static PREFERENCE_MARKERS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ["i prefer", "i like", "i want", "i always", "i never", "my preference"]
        .into_iter()
        .collect()
});

static DECISION_MARKERS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ["we decided", "we will use", "the architecture", "we chose", "decision:"]
        .into_iter()
        .collect()
});

/// Result of entity and relation extraction.
#[derive(Debug, Default)]
pub struct ExtractionResult {
    /// Extracted entities.
    pub entities: Vec<ExtractedEntity>,
    /// Extracted relations.
    pub relations: Vec<ExtractedRelation>,
}

/// Extract entities and relations from exchange content.
#[must_use]
pub fn extract(content: &str) -> ExtractionResult {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    let mut relations = Vec::new();
    let content_lower = content.to_lowercase();

    let first_line_end = content.find('\n').unwrap_or(content.len());

    let mut files = Vec::new();
    for cap in RE_FILE.captures_iter(content) {
        let name = cap[1].to_string();
        if seen.insert(("file", name.clone())) {
            let pos = cap.get(0).map(|m| m.start()).unwrap_or(usize::MAX);
            entities.push(ExtractedEntity {
                name: name.clone(),
                kind: EntityKind::File,
                relevance: position_relevance(pos, first_line_end),
            });
            files.push(name);
        }
    }

    let mut found_functions = Vec::new();
    for cap in RE_FUNCTION.captures_iter(content) {
        let name = cap[1].to_string();
        if seen.insert(("function", name.clone())) {
            let pos = cap.get(0).map(|m| m.start()).unwrap_or(usize::MAX);
            entities.push(ExtractedEntity {
                name: name.clone(),
                kind: EntityKind::Function,
                relevance: position_relevance(pos, first_line_end),
            });
            found_functions.push(name);
        }
    }

    let mut found_crates = Vec::new();
    for cap in RE_CRATE.captures_iter(content) {
        let name = cap[1].to_string();
        if seen.insert(("crate", name.clone())) {
            let pos = cap.get(0).map(|m| m.start()).unwrap_or(usize::MAX);
            entities.push(ExtractedEntity {
                name: name.clone(),
                kind: EntityKind::Crate,
                relevance: position_relevance(pos, first_line_end),
            });
            found_crates.push(name);
        }
    }

    let mut called_functions = Vec::new();
    for cap in RE_FUNCTION_CALL.captures_iter(content) {
        let name = cap[1].to_string();
        if !found_functions.contains(&name) && seen.insert(("function_call", name.clone())) {
            entities.push(ExtractedEntity {
                name: name.clone(),
                kind: EntityKind::Function,
                relevance: 0.6,
            });
            called_functions.push(name);
        }
    }

    for file_name in &files {
        for func in &found_functions {
            relations.push(ExtractedRelation {
                from_entity: file_name.clone(),
                to_entity: func.clone(),
                kind: RelationKind::Defines,
            });
        }
        for crt in &found_crates {
            relations.push(ExtractedRelation {
                from_entity: file_name.clone(),
                to_entity: crt.clone(),
                kind: RelationKind::Imports,
            });
        }
    }

    if !found_functions.is_empty() {
        for defined in &found_functions {
            for called in &called_functions {
                relations.push(ExtractedRelation {
                    from_entity: defined.clone(),
                    to_entity: called.clone(),
                    kind: RelationKind::Calls,
                });
            }
        }
    } else if called_functions.len() >= 2 {
        for i in 0..called_functions.len() {
            for j in (i + 1)..called_functions.len() {
                relations.push(ExtractedRelation {
                    from_entity: called_functions[i].clone(),
                    to_entity: called_functions[j].clone(),
                    kind: RelationKind::Related,
                });
            }
        }
    }

    for mat in RE_ERROR.find_iter(content) {
        let name = mat.as_str().to_string();
        if seen.insert(("error", name.clone())) {
            entities.push(ExtractedEntity {
                name,
                kind: EntityKind::Error,
                relevance: position_relevance(mat.start(), first_line_end),
            });
        }
    }

    for tool in TOOL_NAMES.iter() {
        if content_lower.contains(tool) && seen.insert(("tool", (*tool).to_string())) {
            entities.push(ExtractedEntity {
                name: (*tool).to_string(),
                kind: EntityKind::Tool,
                relevance: 0.7,
            });
        }
    }

    for keyword in CONCEPT_KEYWORDS.iter() {
        if content_lower.contains(keyword) && seen.insert(("concept", (*keyword).to_string())) {
            entities.push(ExtractedEntity {
                name: (*keyword).to_string(),
                kind: EntityKind::Concept,
                relevance: 0.6,
            });
        }
    }

    for cap in RE_ACRONYM.captures_iter(content) {
        let name = cap[1].to_string();
        let lower = name.to_lowercase();
        if lower.len() >= 2
            && !["the", "and", "for", "not", "but", "with", "from", "into"]
                .contains(&lower.as_str())
            && seen.insert(("acronym", lower.clone()))
        {
            entities.push(ExtractedEntity {
                name: lower,
                kind: EntityKind::Concept,
                relevance: 0.5,
            });
        }
    }

    if preference_score(&content_lower) > 0.0 {
        entities.push(ExtractedEntity {
            name: summarize(content),
            kind: EntityKind::Preference,
            relevance: 0.9,
        });
    }
    if decision_score(&content_lower) > 0.0 {
        entities.push(ExtractedEntity {
            name: summarize(content),
            kind: EntityKind::Decision,
            relevance: 0.9,
        });
    }

    ExtractionResult { entities, relations }
}

/// Whether `content_lower` contains a preference marker phrase.
#[must_use]
pub fn preference_score(content_lower: &str) -> f32 {
    if PREFERENCE_MARKERS.iter().any(|m| content_lower.contains(m)) {
        1.0
    } else {
        0.0
    }
}

/// Whether `content_lower` contains an architecture/decision marker phrase.
#[must_use]
pub fn decision_score(content_lower: &str) -> f32 {
    if DECISION_MARKERS.iter().any(|m| content_lower.contains(m)) {
        1.0
    } else {
        0.0
    }
}

fn summarize(content: &str) -> String {
    const MAX_LEN: usize = 80;
    let first_line = content.lines().next().unwrap_or(content);
    if first_line.len() > MAX_LEN {
        format!("{}...", &first_line[..MAX_LEN])
    } else {
        first_line.to_string()
    }
}

/// Relevance based on position: first line -> 1.0, later -> 0.7.
fn position_relevance(byte_pos: usize, first_line_end: usize) -> f32 {
    if byte_pos <= first_line_end {
        1.0
    } else {
        0.7
    }
}

/// Group an [`ExtractionResult`] into [`MemoryRecord`]s, one per distinct
/// entity, with relations rendered as additional observation lines.
#[must_use]
pub fn to_memory_records(result: &ExtractionResult) -> Vec<MemoryRecord> {
    let mut by_name: HashMap<String, MemoryRecord> = HashMap::new();

    for entity in &result.entities {
        by_name
            .entry(entity.name.clone())
            .or_insert_with(|| MemoryRecord {
                name: entity.name.clone(),
                entity_type: entity.kind.to_string(),
                observations: Vec::new(),
            });
    }

    for relation in &result.relations {
        if let Some(record) = by_name.get_mut(&relation.from_entity) {
            record.observations.push(format!(
                "{} {} {}",
                relation.from_entity, relation.kind, relation.to_entity
            ));
        }
    }

    let mut records: Vec<MemoryRecord> = by_name.into_values().collect();
    for record in &mut records {
        if record.observations.is_empty() {
            record.observations.push(format!("mentioned as a {}", record.entity_type));
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelationKind;

    #[test]
    fn extract_files() {
        let result = extract("Fix the bug in orchestrator.rs and update Cargo.toml");
        let files: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::File)
            .collect();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|e| e.name == "orchestrator.rs"));
        assert!(files.iter().any(|e| e.name == "Cargo.toml"));
    }

    #[test]
    fn extract_function_calls() {
        let result = extract("fn main() { run_task(); }");
        let calls: Vec<_> = result
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::Calls)
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].from_entity, "main");
        assert_eq!(calls[0].to_entity, "run_task");
    }

    #[test]
    fn extract_crates() {
        let result = extract("orco-core and orco-llm need changes");
        let crates: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::Crate)
            .collect();
        assert_eq!(crates.len(), 2);
    }

    #[test]
    fn preference_marker_detected() {
        assert!(preference_score("i prefer dark mode in the ui") > 0.0);
        assert_eq!(preference_score("the weather is nice today"), 0.0);
    }

    #[test]
    fn decision_marker_detected() {
        assert!(decision_score("we decided to use sqlite for storage") > 0.0);
        assert_eq!(decision_score("the weather is nice today"), 0.0);
    }

    #[test]
    fn to_memory_records_groups_by_name() {
        let result = extract("orchestrator.rs is the target file");
        let records = to_memory_records(&result);
        assert!(records.iter().any(|r| r.name == "orchestrator.rs"));
        assert!(records.iter().all(|r| !r.observations.is_empty()));
    }

    #[test]
    fn empty_content_extracts_nothing() {
        assert!(extract("").entities.is_empty());
    }
}
