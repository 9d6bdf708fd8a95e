//! Run session snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::now_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Running => f.write_str("running"),
            RunState::Completed => f.write_str("completed"),
            RunState::Failed => f.write_str("failed"),
        }
    }
}

/// Latest known state of a run, rewritten after every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSession {
    pub run_id: String,
    pub status: RunState,
    pub description: String,
    pub max_iterations: u32,
    pub started_at: String,
    pub updated_at: String,
    pub current_iteration: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl RunSession {
    pub fn new(run_id: impl Into<String>, description: impl Into<String>, max_iterations: u32) -> Self {
        let now = now_iso();
        Self {
            run_id: run_id.into(),
            status: RunState::Running,
            description: description.into(),
            max_iterations,
            started_at: now.clone(),
            updated_at: now,
            current_iteration: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
        }
    }
}
