//! Iteration and run outcome records.
//!
//! An `IterationOutcome` is created once per iteration attempt and never
//! mutated afterwards; the engine appends it to the run's ordered log.

use serde::{Deserialize, Serialize};

use super::CompletionStatus;

/// Token counters summed over every assistant message of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub reasoning: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.reasoning += other.reasoning;
    }

    pub fn is_empty(&self) -> bool {
        self.input == 0 && self.output == 0 && self.reasoning == 0
    }
}

/// Record of one iteration attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationOutcome {
    pub iteration_number: u32,
    pub work_ref: String,
    pub label: String,
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// `provider/model`
    pub model: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_ref: Option<String>,
}

/// Final counters of a run, returned to the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopResult {
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total_time_ms: u64,
    pub max_iterations: u32,
    pub iterations: Vec<IterationOutcome>,
    /// Absent for dry runs, which persist nothing
    pub run_id: Option<String>,
}

impl LoopResult {
    /// External tooling maps this to a non-zero exit code.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
