//! Completion status of a single agent turn.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Closed set of ways an iteration can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Work item done, loop continues
    Complete,
    /// Work item done and the whole phase is finished
    PhaseDone,
    /// Agent could not proceed
    Blocked,
    /// Agent reported a failure
    Failed,
    /// Session ended without a completion signal
    Stalled,
    /// Wall-clock or inactivity timeout
    Timeout,
    /// Unexpected error while running the iteration
    Error,
}

impl CompletionStatus {
    /// `complete` and `phase_done` are the success terminals.
    pub fn is_success(&self) -> bool {
        matches!(self, CompletionStatus::Complete | CompletionStatus::PhaseDone)
    }

    /// Failure statuses are the ones the retry/skip/abort strategy applies to.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CompletionStatus::Failed | CompletionStatus::Stalled | CompletionStatus::Timeout | CompletionStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Complete => "complete",
            CompletionStatus::PhaseDone => "phase_done",
            CompletionStatus::Blocked => "blocked",
            CompletionStatus::Failed => "failed",
            CompletionStatus::Stalled => "stalled",
            CompletionStatus::Timeout => "timeout",
            CompletionStatus::Error => "error",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(CompletionStatus::Complete),
            "phase_done" => Ok(CompletionStatus::PhaseDone),
            "blocked" => Ok(CompletionStatus::Blocked),
            "failed" => Ok(CompletionStatus::Failed),
            "stalled" => Ok(CompletionStatus::Stalled),
            "timeout" => Ok(CompletionStatus::Timeout),
            "error" => Ok(CompletionStatus::Error),
            other => Err(format!("unrecognized completion status '{}'", other)),
        }
    }
}

/// Status plus the optional reason the agent gave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CompletionResult {
    pub fn new(status: CompletionStatus, reason: Option<String>) -> Self {
        Self { status, reason }
    }

    pub fn complete() -> Self {
        Self::new(CompletionStatus::Complete, None)
    }

    pub fn with_reason(status: CompletionStatus, reason: impl Into<String>) -> Self {
        Self::new(status, Some(reason.into()))
    }

    /// Outcome used when a session ends without a completion signal.
    pub fn stalled() -> Self {
        Self::from(&EngineError::Stalled)
    }
}

/// An error that ends an iteration, recorded with its mapped status.
impl From<&EngineError> for CompletionResult {
    fn from(err: &EngineError) -> Self {
        Self::with_reason(err.status(), err.to_string())
    }
}
