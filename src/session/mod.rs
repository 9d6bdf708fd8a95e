//! Session coordinators
//!
//! A coordinator drives one agent turn to completion and classifies it.
//! Two interchangeable variants share the same contract:
//! - `StreamingCoordinator`: consumes the runtime's event stream
//! - `PollingCoordinator`: polls the session status endpoint

mod polling;
mod results;
mod streaming;

pub use polling::PollingCoordinator;
pub use results::{PromptResult, collect_result, extract_completion, sum_usage};
pub use streaming::StreamingCoordinator;

use std::sync::Arc;

use async_trait::async_trait;
use log::warn;

use crate::answers::AnswerSource;
use crate::capture::SharedCapture;
use crate::config::{CoordinatorKind, EngineConfig};
use crate::error::Result;
use crate::output::OutputSink;
use crate::runtime::{AgentRuntime, PromptRequest};

#[async_trait]
pub trait SessionCoordinator: Send + Sync {
    /// Start `request` on its session and wait for the turn to end.
    ///
    /// Everything received is recorded into `capture`, which the caller keeps
    /// so a transcript survives even if this future is abandoned.
    async fn run(&self, runtime: &dyn AgentRuntime, request: &PromptRequest, capture: &SharedCapture) -> Result<PromptResult>;
}

/// Build the coordinator selected by `engine.coordinator`.
pub fn build_coordinator(
    config: &EngineConfig,
    answers: Arc<dyn AnswerSource>,
    output: Arc<dyn OutputSink>,
) -> Box<dyn SessionCoordinator> {
    match config.coordinator {
        CoordinatorKind::Stream => Box::new(StreamingCoordinator::new(config, answers, output)),
        CoordinatorKind::Poll => Box::new(PollingCoordinator::new(config, output)),
    }
}

/// Abort the remote session, logging instead of failing.
pub(crate) async fn abort_quietly(runtime: &dyn AgentRuntime, session_id: &str) {
    if let Err(e) = runtime.abort(session_id).await {
        warn!("Best-effort abort of session {} failed: {}", session_id, e);
    }
}

/// Run `f` against the capture; a poisoned lock still yields the buffers.
pub(crate) fn with_capture<T>(capture: &SharedCapture, f: impl FnOnce(&mut crate::capture::StreamCapture) -> T) -> T {
    let mut guard = capture.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}
