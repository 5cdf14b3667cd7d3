//! Core data types for memory retrieval and storage.

use serde::{Deserialize, Serialize};

/// One entity as stored by / returned from the memory provider's
/// `create_entities`/`search_nodes` tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Normalized name (e.g. `"orchestrator.rs"`, `"dark mode preference"`).
    pub name: String,
    /// Classification of the entity.
    #[serde(rename = "entityType")]
    pub entity_type: String,
    /// Short factual observations about the entity.
    pub observations: Vec<String>,
}

/// Classification of an extracted entity, prior to being turned into a
/// [`MemoryRecord`]'s `entity_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Source file (`.rs`, `.toml`, `.json`, …)
    File,
    /// Function or method name
    Function,
    /// Rust crate (e.g. `orco-core`)
    Crate,
    /// Tool name from the provider registry
    Tool,
    /// Error type or message pattern
    Error,
    /// Technical concept or keyword
    Concept,
    /// Configuration key
    Config,
    /// A user preference statement
    Preference,
    /// A project architecture/decision statement
    Decision,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Function => write!(f, "function"),
            Self::Crate => write!(f, "crate"),
            Self::Tool => write!(f, "tool"),
            Self::Error => write!(f, "error"),
            Self::Concept => write!(f, "concept"),
            Self::Config => write!(f, "config"),
            Self::Preference => write!(f, "preference"),
            Self::Decision => write!(f, "decision"),
        }
    }
}

impl EntityKind {
    /// Parse from string, falling back to `Concept` for unknown values.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "file" => Self::File,
            "function" => Self::Function,
            "crate" => Self::Crate,
            "tool" => Self::Tool,
            "error" => Self::Error,
            "config" => Self::Config,
            "preference" => Self::Preference,
            "decision" => Self::Decision,
            _ => Self::Concept,
        }
    }
}

/// An entity extracted from an exchange, with its relevance score, before
/// being grouped into a [`MemoryRecord`].
#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    /// Entity name (normalized)
    pub name: String,
    /// Entity kind
    pub kind: EntityKind,
    /// Relevance to the source text (0.0-1.0)
    pub relevance: f32,
}

/// A relation between two extracted entities, used to enrich observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRelation {
    /// Source entity name.
    pub from_entity: String,
    /// Target entity name.
    pub to_entity: String,
    /// Kind of relation.
    pub kind: RelationKind,
}

/// Classification of an [`ExtractedRelation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// A file defines a function.
    Defines,
    /// A file imports a crate.
    Imports,
    /// A function calls another function.
    Calls,
    /// A generic, unordered association.
    Related,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Defines => write!(f, "defines"),
            Self::Imports => write!(f, "imports"),
            Self::Calls => write!(f, "calls"),
            Self::Related => write!(f, "related to"),
        }
    }
}

/// A node or relation line as returned by `search_nodes`, formatted for
/// direct inclusion in a prompt.
#[derive(Debug, Clone)]
pub struct RetrievedNode {
    /// Entity name.
    pub name: String,
    /// Entity type.
    pub entity_type: String,
    /// Up to the top-3 observations for this node.
    pub observations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_roundtrip() {
        for kind in [
            EntityKind::File,
            EntityKind::Function,
            EntityKind::Crate,
            EntityKind::Tool,
            EntityKind::Error,
            EntityKind::Concept,
            EntityKind::Config,
            EntityKind::Preference,
            EntityKind::Decision,
        ] {
            let s = kind.to_string();
            assert_eq!(EntityKind::from_str_lossy(&s), kind);
        }
    }

    #[test]
    fn entity_kind_unknown_fallback() {
        assert_eq!(EntityKind::from_str_lossy("unknown"), EntityKind::Concept);
    }

    #[test]
    fn memory_record_serializes_entity_type_key() {
        let record = MemoryRecord {
            name: "dark mode".into(),
            entity_type: "preference".into(),
            observations: vec!["user prefers dark mode".into()],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["entityType"], "preference");
    }
}
