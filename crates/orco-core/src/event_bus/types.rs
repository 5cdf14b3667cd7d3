use serde::Serialize;

use orco_ids::HierarchicalId;

/// Which logical agent produced a chat-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    /// The Planner.
    Planner,
    /// The Executor.
    Executor,
    /// The Verifier.
    Verifier,
    /// The orchestrator itself, not a role-playing agent.
    System,
}

/// The mode a request was routed to, per [`crate::mode_router::ModeRouter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Conversational reply, no plan.
    Chat,
    /// Self-reflective analysis; may hand off into `Task`.
    Introspect,
    /// Hierarchical plan execution.
    Task,
}

/// Wire events emitted on the session's event stream. `type` names are
/// contractual so downstream consumers (chat UI, TTS, SSE bridges) can match
/// on them without reading `data`; most carry an `mcp_` prefix, a handful
/// (`mode_selected`) don't — both forms are fixed by the wire contract, not
/// by this enum's variant names, hence the explicit `#[serde(rename)]`s.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A request was classified into a mode.
    ModeSelected {
        /// Session this event belongs to.
        session_id: String,
        /// Chosen mode.
        mode: Mode,
        /// Classifier confidence in `[0,1]`.
        confidence: f64,
        /// Short justification.
        reasoning: String,
    },
    /// A chat-facing message from one of the three agents (or the system).
    AgentMessage {
        /// Session this event belongs to.
        session_id: String,
        /// Speaking agent.
        agent: Agent,
        /// Message body.
        content: String,
        /// Optional TTS-friendly variant of `content`.
        tts_content: Option<String>,
        /// Mode active when this message was produced.
        mode: Mode,
        /// Milliseconds since the Unix epoch, supplied by the caller.
        timestamp_ms: i64,
    },
    /// A plan was created for a Task-mode request.
    #[serde(rename = "mcp_todo_created")]
    TodoCreated {
        /// Session this event belongs to.
        session_id: String,
        /// One-line summary of the plan.
        summary: String,
        /// Number of items in the initial plan.
        item_count: usize,
        /// `standard` or `extended`.
        mode: String,
    },
    /// An item's dependencies are not yet satisfied.
    #[serde(rename = "mcp_item_blocked")]
    ItemBlocked {
        /// Session this event belongs to.
        session_id: String,
        /// The blocked item.
        item_id: HierarchicalId,
        /// How many times this item has been found blocked.
        blocked_check_count: u32,
        /// Dependencies still unsatisfied.
        unsatisfied_dependencies: Vec<HierarchicalId>,
    },
    /// An item's tool-calls were executed.
    #[serde(rename = "mcp_item_executed")]
    ItemExecuted {
        /// Session this event belongs to.
        session_id: String,
        /// The executed item.
        item_id: HierarchicalId,
        /// Whether any call in the item succeeded.
        success: bool,
        /// Short human-readable summary of what happened.
        summary: String,
    },
    /// An item's success criteria were adjudicated.
    #[serde(rename = "mcp_item_verified")]
    ItemVerified {
        /// Session this event belongs to.
        session_id: String,
        /// The verified item.
        item_id: HierarchicalId,
        /// Verifier's verdict.
        verified: bool,
        /// Verifier confidence, `0..=100`.
        confidence: u8,
        /// Verifier's summary/reason.
        summary: String,
    },
    /// A failed item was replanned into children.
    #[serde(rename = "mcp_item_replanned")]
    ItemReplanned {
        /// Session this event belongs to.
        session_id: String,
        /// The superseded item.
        item_id: HierarchicalId,
        /// Number of injected child items.
        new_items_count: usize,
        /// Why the item was replanned.
        reason: String,
    },
    /// An item was abandoned without completing.
    #[serde(rename = "mcp_item_skipped")]
    ItemSkipped {
        /// Session this event belongs to.
        session_id: String,
        /// The skipped item.
        item_id: HierarchicalId,
        /// Why it was skipped.
        reason: String,
    },
    /// An item reached a terminal failure outside the skip/replan paths
    /// (e.g. cancellation while the item was active).
    #[serde(rename = "mcp_item_failed")]
    ItemFailed {
        /// Session this event belongs to.
        session_id: String,
        /// The failed item.
        item_id: HierarchicalId,
        /// Why it failed.
        reason: String,
    },
    /// The plan ran to completion (possibly with some items skipped/failed).
    #[serde(rename = "mcp_workflow_complete")]
    WorkflowComplete {
        /// Session this event belongs to.
        session_id: String,
        /// Items that reached `completed`.
        completed: usize,
        /// Total items in the final plan (including injected children).
        total: usize,
        /// `completed / total * 100`, rounded.
        success_rate: f64,
        /// Wall-clock duration of the run.
        duration_ms: u64,
    },
    /// The plan terminated abnormally (Replanner `abort` or cancellation).
    #[serde(rename = "mcp_workflow_error")]
    WorkflowError {
        /// Session this event belongs to.
        session_id: String,
        /// Item the error originated at, if any.
        item_id: Option<HierarchicalId>,
        /// Human-readable reason.
        reason: String,
    },
}

impl WorkflowEvent {
    /// The session this event was emitted for.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::ModeSelected { session_id, .. }
            | Self::AgentMessage { session_id, .. }
            | Self::TodoCreated { session_id, .. }
            | Self::ItemBlocked { session_id, .. }
            | Self::ItemExecuted { session_id, .. }
            | Self::ItemVerified { session_id, .. }
            | Self::ItemReplanned { session_id, .. }
            | Self::ItemSkipped { session_id, .. }
            | Self::ItemFailed { session_id, .. }
            | Self::WorkflowComplete { session_id, .. }
            | Self::WorkflowError { session_id, .. } => session_id,
        }
    }
}
