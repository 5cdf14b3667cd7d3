//! Error types for memory retrieval and storage.

/// Errors that can occur in memory coordination.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The memory provider rejected or failed a call.
    #[error("memory provider error: {0}")]
    Provider(String),

    /// `search_nodes`/`create_entities` returned a payload that didn't
    /// match the expected shape.
    #[error("unexpected provider response: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal error.
    #[error("{0}")]
    Internal(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
