//! The pluggable supplier of work items.

use async_trait::async_trait;

use crate::config::Config;
use crate::domain::{CompletionResult, WorkItem};
use crate::error::Result;

/// Bounds and description returned by [`WorkSource::setup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSetup {
    pub max_iterations: u32,
    pub description: String,
}

impl PhaseSetup {
    pub fn new(max_iterations: u32, description: impl Into<String>) -> Self {
        Self {
            max_iterations,
            description: description.into(),
        }
    }
}

/// One phase's view of the work.
///
/// The engine asks for a work item only for fresh iteration slots. A retried
/// slot re-dispatches the item that failed, so `next_iteration` never has to
/// be idempotent for a given iteration number.
#[async_trait]
pub trait WorkSource: Send {
    async fn setup(&mut self, config: &Config, dry_run: bool) -> Result<PhaseSetup>;

    /// Next item for slot `iteration`; `None` ends the loop.
    async fn next_iteration(&mut self, config: &Config, iteration: u32) -> Result<Option<WorkItem>>;

    /// Called with every reported result; `false` stops the loop.
    async fn handle_result(&mut self, result: &CompletionResult, iteration: u32) -> Result<bool>;
}
