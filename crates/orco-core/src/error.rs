//! The §7 error taxonomy, realized as a flat `thiserror` enum.
//!
//! Each variant names a failure *kind*, not a failure site: local recovery
//! (retry, schema self-correction, dependency rewrite) happens inside the
//! component that hit the problem, so by the time an [`Error`] reaches the
//! [`crate::workflow::WorkflowEngine`] it is already something the engine
//! must act on (escalate to the Replanner, or terminate the plan).

use orco_ids::HierarchicalId;
use thiserror::Error;

/// Errors surfaced by the orchestration control plane.
#[derive(Debug, Error)]
pub enum Error {
    /// The LLM endpoint's rate limit was exhausted after [`orco_llm`]'s
    /// own retry budget.
    #[error("rate limit exhausted: {0}")]
    RateLimit(String),

    /// A transport-level failure (DNS, connection refused, timeout)
    /// survived retry and endpoint fallback.
    #[error("transport error: {0}")]
    Transport(String),

    /// An LLM response could not be parsed as JSON even after sanitization.
    #[error("failed to parse LLM response: {0}")]
    Parse(String),

    /// A candidate plan violated the active JSON Schema after
    /// [`orco_llm::SchemaConstrainer`]'s self-correction rounds.
    #[error("plan failed schema validation: {0}")]
    Validation(String),

    /// A required provider is not `ready`, or the named tool is unknown.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A specific tool-call failed. Recorded per-call by
    /// [`orco_providers::ToolExecutor`]; not fatal to the item on its own.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// Attempts, replans, or block-checks were exceeded for an item.
    /// Terminal for that item.
    #[error("budget exhausted for item {item_id}: {reason}")]
    BudgetExhausted {
        /// The item whose budget ran out.
        item_id: HierarchicalId,
        /// Which budget (attempts/replans/block-checks) and why.
        reason: String,
    },

    /// The session's cancellation signal fired. Terminal for the plan.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The Replanner decided to terminate the run.
    #[error("aborted at item {item_id}: {reason}")]
    Aborted {
        /// The item the Replanner aborted at.
        item_id: HierarchicalId,
        /// The Replanner's stated reason.
        reason: String,
    },

    /// A plan-level invariant (§3) was violated; indicates a bug in the
    /// engine or the Planner/Replanner, not a recoverable runtime failure.
    #[error("plan invariant violated: {0}")]
    Invariant(String),

    /// Propagated from [`orco_llm`].
    #[error(transparent)]
    Llm(#[from] orco_llm::Error),

    /// Propagated from [`orco_providers`].
    #[error(transparent)]
    Provider(#[from] orco_providers::Error),

    /// Propagated from [`orco_memory`].
    #[error(transparent)]
    Memory(#[from] orco_memory::Error),

    /// Propagated from [`orco_ids`] (id parse/generation failures).
    #[error(transparent)]
    Id(#[from] orco_ids::Error),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// `true` if [`orco_llm::LlmClient`] already retried this failure
    /// internally, i.e. the engine should not apply its own backoff on
    /// top (that would double it).
    #[must_use]
    pub fn is_llm_transient(&self) -> bool {
        matches!(self, Self::RateLimit(_) | Self::Transport(_))
            || matches!(
                self,
                Self::Llm(orco_llm::Error::RateLimit)
                    | Self::Llm(orco_llm::Error::ServerError(_))
                    | Self::Llm(orco_llm::Error::Network(_))
                    | Self::Llm(orco_llm::Error::Timeout(_))
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exhausted_mentions_item_and_reason() {
        let err = Error::BudgetExhausted {
            item_id: HierarchicalId::parse("2.1").unwrap(),
            reason: "max_attempts exceeded".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2.1"));
        assert!(msg.contains("max_attempts exceeded"));
    }

    #[test]
    fn rate_limit_and_transport_are_llm_transient() {
        assert!(Error::RateLimit("429".into()).is_llm_transient());
        assert!(Error::Transport("refused".into()).is_llm_transient());
        assert!(!Error::Invariant("x".into()).is_llm_transient());
    }
}
