//! Engine lifecycle events.
//!
//! Events are broadcast on the event bus and consumed by listeners (console
//! renderer, run tracker). They are ephemeral; the run tracker derives the
//! durable state from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CompletionStatus, IterationOutcome};

/// Event type constants
pub mod event_types {
    pub const LOOP_DESCRIPTION: &str = "loop.description";
    pub const LOOP_DRY_RUN_ITERATION: &str = "loop.dry_run_iteration";
    pub const LOOP_DRY_RUN_COMPLETE: &str = "loop.dry_run_complete";
    pub const SERVER_STARTED: &str = "server.started";
    pub const SERVER_ATTACHED: &str = "server.attached";
    pub const SERVER_ATTACH_HINT: &str = "server.attach_hint";
    pub const ITERATION_STARTED: &str = "iteration.started";
    pub const ITERATION_SESSION_CREATED: &str = "iteration.session_created";
    pub const ITERATION_RECORDED: &str = "iteration.recorded";
    pub const ITERATION_COMPLETED: &str = "iteration.completed";
    pub const ITERATION_BLOCKED: &str = "iteration.blocked";
    pub const ITERATION_RETRYING: &str = "iteration.retrying";
    pub const ITERATION_FAILED: &str = "iteration.failed";
    pub const ITERATION_ERROR: &str = "iteration.error";
    pub const LOOP_COMPLETED: &str = "loop.completed";
}

/// What the engine does after a failure that is not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    Aborting,
    Skipping,
}

impl fmt::Display for FailureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureAction::Aborting => f.write_str("aborting"),
            FailureAction::Skipping => f.write_str("skipping"),
        }
    }
}

/// Structured lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    #[serde(rename = "loop.description")]
    LoopDescription { description: String },

    #[serde(rename = "loop.dry_run_iteration")]
    DryRunIteration { iteration: u32, label: String, model: String },

    #[serde(rename = "loop.dry_run_complete")]
    DryRunComplete { iterations: u32, max_iterations: u32 },

    #[serde(rename = "server.started")]
    ServerStarted { url: String },

    #[serde(rename = "server.attached")]
    ServerAttached { url: String },

    #[serde(rename = "server.attach_hint")]
    ServerAttachHint { url: String },

    #[serde(rename = "iteration.started")]
    IterationStarted { iteration: u32, label: String, model: String },

    #[serde(rename = "iteration.session_created")]
    IterationSessionCreated { iteration: u32, session_id: String },

    /// Carries the full outcome so the event log alone can rebuild the run.
    #[serde(rename = "iteration.recorded")]
    IterationRecorded { outcome: IterationOutcome },

    #[serde(rename = "iteration.completed")]
    IterationCompleted {
        iteration: u32,
        label: String,
        status: CompletionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "iteration.blocked")]
    IterationBlocked {
        iteration: u32,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "iteration.retrying")]
    IterationRetrying {
        iteration: u32,
        label: String,
        status: CompletionStatus,
        attempt: u32,
        max_retries: u32,
    },

    #[serde(rename = "iteration.failed")]
    IterationFailed {
        iteration: u32,
        label: String,
        status: CompletionStatus,
        action: FailureAction,
    },

    #[serde(rename = "iteration.error")]
    IterationError { iteration: u32, label: String, error: String },

    #[serde(rename = "loop.completed")]
    LoopCompleted {
        completed: u32,
        failed: u32,
        skipped: u32,
        total_time_ms: u64,
    },
}

impl EngineEvent {
    /// Wire name of the event, e.g. `iteration.started`.
    pub fn event_type(&self) -> &'static str {
        use event_types::*;
        match self {
            EngineEvent::LoopDescription { .. } => LOOP_DESCRIPTION,
            EngineEvent::DryRunIteration { .. } => LOOP_DRY_RUN_ITERATION,
            EngineEvent::DryRunComplete { .. } => LOOP_DRY_RUN_COMPLETE,
            EngineEvent::ServerStarted { .. } => SERVER_STARTED,
            EngineEvent::ServerAttached { .. } => SERVER_ATTACHED,
            EngineEvent::ServerAttachHint { .. } => SERVER_ATTACH_HINT,
            EngineEvent::IterationStarted { .. } => ITERATION_STARTED,
            EngineEvent::IterationSessionCreated { .. } => ITERATION_SESSION_CREATED,
            EngineEvent::IterationRecorded { .. } => ITERATION_RECORDED,
            EngineEvent::IterationCompleted { .. } => ITERATION_COMPLETED,
            EngineEvent::IterationBlocked { .. } => ITERATION_BLOCKED,
            EngineEvent::IterationRetrying { .. } => ITERATION_RETRYING,
            EngineEvent::IterationFailed { .. } => ITERATION_FAILED,
            EngineEvent::IterationError { .. } => ITERATION_ERROR,
            EngineEvent::LoopCompleted { .. } => LOOP_COMPLETED,
        }
    }

    /// Check if this is an iteration-scoped event
    pub fn is_iteration_event(&self) -> bool {
        self.event_type().starts_with("iteration.")
    }
}
