//! Error types for phaseloop
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::domain::CompletionStatus;

/// All error types that can occur while driving a run
#[derive(Debug, Error)]
pub enum EngineError {
    /// Wall-clock deadline exceeded
    #[error("{0}")]
    Timeout(String),

    /// No stream events arrived within the inactivity bound
    #[error("Session inactive for {seconds}s")]
    Inactivity { seconds: u64 },

    /// Agent runtime reported a fatal error mid-session
    #[error("{0}")]
    SessionError(String),

    /// Session ended without a completion signal
    #[error("Session completed without calling task_complete")]
    Stalled,

    /// Failed to reach the agent runtime or work source
    #[error("Transport error: {0}")]
    Transport(String),

    /// Answer source declined to proceed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Run artifact persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Run directory lookup failed
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Status an iteration is recorded with when this error escapes it.
    pub fn status(&self) -> CompletionStatus {
        match self {
            EngineError::Timeout(_) | EngineError::Inactivity { .. } => CompletionStatus::Timeout,
            EngineError::Stalled => CompletionStatus::Stalled,
            EngineError::Cancelled(_) => CompletionStatus::Blocked,
            _ => CompletionStatus::Error,
        }
    }
}

/// Result type alias for phaseloop operations
pub type Result<T> = std::result::Result<T, EngineError>;
