//! orco-memory — rule-based long-term memory coordination.
//!
//! Decides whether a request needs long-term memory, retrieves it
//! through the memory provider's `search_nodes` tool (cached with a
//! bounded TTL), and decides whether a finished exchange is worth
//! persisting via `create_entities`. No embeddings, no local graph
//! store — the memory provider owns storage; this crate only owns the
//! eligibility rules and the rule-based entity extractor that feeds it.
//!
//! # Architecture
//!
//! ```text
//! request ──► MemoryCoordinator::needs_memory ──► search_nodes (via provider)
//!                                                         │
//!                                                  RetrievalCache
//!                                                         │
//!                                               prompt_block (top-5/top-3)
//!
//! exchange ──► MemoryCoordinator::maybe_store ──► extractor::extract
//!                                                         │
//!                                                to_memory_records
//!                                                         │
//!                                                 create_entities (via provider)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod types;

pub use cache::{CacheKey, RetrievalCache};
pub use coordinator::{MemoryCoordinator, RetrievalOutcome};
pub use error::{Error, Result};
pub use extractor::{extract, to_memory_records, ExtractionResult};
pub use types::{EntityKind, ExtractedEntity, ExtractedRelation, MemoryRecord, RelationKind, RetrievedNode};
