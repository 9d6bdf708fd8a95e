//! Agent runtime client trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::types::{FileDiff, PromptRequest, RuntimeEnvelope, SessionActivity, SessionMessage};
use crate::error::Result;

/// Event stream returned by [`AgentRuntime::subscribe`]. Dropping it closes
/// the subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RuntimeEnvelope>> + Send>>;

/// Connection to an agent runtime, shared by every iteration of a run.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Base URL the runtime is reachable at
    fn base_url(&self) -> &str;

    /// Cheap reachability probe (lists sessions)
    async fn health(&self) -> Result<()>;

    /// Create a session and return its id
    async fn create_session(&self, title: &str) -> Result<String>;

    /// Start an agent turn without waiting for it to finish
    async fn prompt_async(&self, request: &PromptRequest) -> Result<()>;

    /// Open the global event stream. Resolves once the stream is live, so no
    /// event emitted after this returns can be missed.
    async fn subscribe(&self) -> Result<EventStream>;

    /// Full ordered message history of a session
    async fn messages(&self, session_id: &str) -> Result<Vec<SessionMessage>>;

    /// Files changed during a session
    async fn diff(&self, session_id: &str) -> Result<Vec<FileDiff>>;

    /// Stop a running session
    async fn abort(&self, session_id: &str) -> Result<()>;

    /// Whether a session is currently working
    async fn session_status(&self, session_id: &str) -> Result<SessionActivity>;

    /// Answer a pending question request, one answer-set per question
    async fn reply_question(&self, request_id: &str, answers: Vec<Vec<String>>) -> Result<()>;

    /// Decline a pending question request
    async fn reject_question(&self, request_id: &str) -> Result<()>;
}
