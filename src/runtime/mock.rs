//! Scripted in-process agent runtime for tests.
//!
//! Each `prompt_async` consumes the next queued [`SessionScript`] (or a
//! default script that completes immediately) and pushes its events to every
//! open subscription, addressed to the prompted session.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};

use super::client::{AgentRuntime, EventStream};
use super::launcher::{RuntimeHandle, RuntimeLauncher, ServerGuard};
use super::types::{FileDiff, PromptRequest, QuestionInfo, RuntimeEnvelope, SessionActivity, SessionMessage};
use crate::domain::TokenUsage;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
enum ScriptEvent {
    Text(String),
    Tool {
        tool: String,
        status: String,
        error: Option<String>,
    },
    Question {
        request_id: String,
        questions: Vec<QuestionInfo>,
    },
    Idle,
    Error(String),
    Foreign(Value),
}

impl ScriptEvent {
    fn to_value(&self, session_id: &str) -> Value {
        match self {
            ScriptEvent::Text(delta) => json!({
                "type": "message.part.delta",
                "properties": {"sessionID": session_id, "field": "text", "delta": delta}
            }),
            ScriptEvent::Tool { tool, status, error } => json!({
                "type": "message.part.updated",
                "properties": {"part": {
                    "type": "tool", "sessionID": session_id, "tool": tool,
                    "state": {"status": status, "error": error}
                }}
            }),
            ScriptEvent::Question { request_id, questions } => json!({
                "type": "question.asked",
                "properties": {"id": request_id, "sessionID": session_id, "questions": questions}
            }),
            ScriptEvent::Idle => json!({"type": "session.idle", "properties": {"sessionID": session_id}}),
            ScriptEvent::Error(message) => json!({
                "type": "session.error",
                "properties": {"sessionID": session_id, "error": {"name": "SessionError", "data": {"message": message}}}
            }),
            ScriptEvent::Foreign(value) => value.clone(),
        }
    }
}

/// What the runtime does for one prompted session.
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    events: Vec<ScriptEvent>,
    messages: Vec<SessionMessage>,
    files: Vec<String>,
    diff_fails: bool,
    busy_polls: u32,
    hang: bool,
}

impl SessionScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams some text, goes idle and reports `status` through the
    /// completion tool.
    pub fn completing(status: &str, reason: Option<&str>) -> Self {
        Self::new()
            .text("working on it")
            .idle()
            .with_message(SessionMessage::assistant(0.01, TokenUsage { input: 100, output: 20, reasoning: 0 }).with_completion(status, reason))
    }

    /// Goes idle without ever reporting completion.
    pub fn stalling() -> Self {
        Self::new()
            .text("thinking")
            .idle()
            .with_message(SessionMessage::assistant(0.0, TokenUsage::default()).with_text("done?"))
    }

    /// Never emits anything and stays busy.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn text(mut self, delta: &str) -> Self {
        self.events.push(ScriptEvent::Text(delta.to_string()));
        self
    }

    pub fn tool(mut self, tool: &str, status: &str, error: Option<&str>) -> Self {
        self.events.push(ScriptEvent::Tool {
            tool: tool.to_string(),
            status: status.to_string(),
            error: error.map(str::to_string),
        });
        self
    }

    pub fn question(mut self, request_id: &str, questions: Vec<QuestionInfo>) -> Self {
        self.events.push(ScriptEvent::Question {
            request_id: request_id.to_string(),
            questions,
        });
        self
    }

    pub fn idle(mut self) -> Self {
        self.events.push(ScriptEvent::Idle);
        self
    }

    pub fn session_error(mut self, message: &str) -> Self {
        self.events.push(ScriptEvent::Error(message.to_string()));
        self
    }

    /// An event for another session sharing the stream.
    pub fn foreign_idle(mut self, other_session: &str) -> Self {
        self.events.push(ScriptEvent::Foreign(
            json!({"type": "session.idle", "properties": {"sessionID": other_session}}),
        ));
        self
    }

    pub fn raw_event(mut self, value: Value) -> Self {
        self.events.push(ScriptEvent::Foreign(value));
        self
    }

    pub fn with_message(mut self, message: SessionMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_files(mut self, files: &[&str]) -> Self {
        self.files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_failing_diff(mut self) -> Self {
        self.diff_fails = true;
        self
    }

    /// Number of status polls answered `busy` before going idle.
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }
}

#[derive(Debug, Default)]
struct ActiveSession {
    script: SessionScript,
    polls: u32,
}

#[derive(Default)]
struct MockState {
    scripts: VecDeque<SessionScript>,
    sessions: HashMap<String, ActiveSession>,
    subscribers: Vec<mpsc::UnboundedSender<Result<RuntimeEnvelope>>>,
    next_session: u32,
    calls: Vec<String>,
    titles: Vec<String>,
    prompts: Vec<PromptRequest>,
    aborts: Vec<String>,
    replies: Vec<(String, Vec<Vec<String>>)>,
    rejections: Vec<String>,
    fail_create: Option<String>,
    fail_abort: bool,
}

/// In-process [`AgentRuntime`] driven by queued scripts.
pub struct MockRuntime {
    state: Mutex<MockState>,
    open_streams: Arc<AtomicUsize>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub const URL: &'static str = "http://mock.invalid";

    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue scripts consumed by successive prompts.
    pub fn with_scripts(scripts: impl IntoIterator<Item = SessionScript>) -> Self {
        let runtime = Self::new();
        runtime.push_scripts(scripts);
        runtime
    }

    pub fn push_script(&self, script: SessionScript) {
        self.lock().scripts.push_back(script);
    }

    pub fn push_scripts(&self, scripts: impl IntoIterator<Item = SessionScript>) {
        self.lock().scripts.extend(scripts);
    }

    /// Make every `create_session` fail with a transport error.
    pub fn fail_create_session(&self, message: &str) {
        self.lock().fail_create = Some(message.to_string());
    }

    /// Make every `abort` fail.
    pub fn fail_abort(&self) {
        self.lock().fail_abort = true;
    }

    /// Names of the calls received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn session_titles(&self) -> Vec<String> {
        self.lock().titles.clone()
    }

    pub fn prompts(&self) -> Vec<PromptRequest> {
        self.lock().prompts.clone()
    }

    pub fn aborts(&self) -> Vec<String> {
        self.lock().aborts.clone()
    }

    pub fn replies(&self) -> Vec<(String, Vec<Vec<String>>)> {
        self.lock().replies.clone()
    }

    pub fn rejections(&self) -> Vec<String> {
        self.lock().rejections.clone()
    }

    /// Subscriptions currently held open by callers.
    pub fn open_subscriptions(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: &str) {
        self.lock().calls.push(call.to_string());
    }
}

struct TrackedStream {
    rx: mpsc::UnboundedReceiver<Result<RuntimeEnvelope>>,
    open: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = Result<RuntimeEnvelope>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_next_unpin(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    fn base_url(&self) -> &str {
        Self::URL
    }

    async fn health(&self) -> Result<()> {
        self.record("health");
        Ok(())
    }

    async fn create_session(&self, title: &str) -> Result<String> {
        let mut state = self.lock();
        state.calls.push("create_session".to_string());
        if let Some(message) = &state.fail_create {
            return Err(EngineError::Transport(message.clone()));
        }
        state.next_session += 1;
        let id = format!("ses-{}", state.next_session);
        state.titles.push(title.to_string());
        Ok(id)
    }

    async fn prompt_async(&self, request: &PromptRequest) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("prompt_async".to_string());
        state.prompts.push(request.clone());

        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| SessionScript::completing("complete", None));

        if !script.hang {
            let envelopes: Vec<RuntimeEnvelope> = script
                .events
                .iter()
                .map(|event| RuntimeEnvelope::from_value(event.to_value(&request.session_id)))
                .collect();
            state.subscribers.retain(|tx| {
                envelopes
                    .iter()
                    .all(|envelope| tx.unbounded_send(Ok(envelope.clone())).is_ok())
            });
        }

        state
            .sessions
            .insert(request.session_id.clone(), ActiveSession { script, polls: 0 });
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream> {
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.lock();
        state.calls.push("subscribe".to_string());
        state.subscribers.push(tx);
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(TrackedStream {
            rx,
            open: self.open_streams.clone(),
        }))
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let mut state = self.lock();
        state.calls.push("messages".to_string());
        let prompt = state
            .prompts
            .iter()
            .rev()
            .find(|p| p.session_id == session_id)
            .map(|p| SessionMessage::user(p.prompt.clone()));
        let mut history: Vec<SessionMessage> = prompt.into_iter().collect();
        if let Some(active) = state.sessions.get(session_id) {
            if !active.script.hang {
                history.extend(active.script.messages.iter().cloned());
            }
        }
        Ok(history)
    }

    async fn diff(&self, session_id: &str) -> Result<Vec<FileDiff>> {
        let mut state = self.lock();
        state.calls.push("diff".to_string());
        match state.sessions.get(session_id) {
            Some(active) if active.script.diff_fails => Err(EngineError::Transport("diff unavailable".to_string())),
            Some(active) => Ok(active.script.files.iter().map(FileDiff::new).collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn abort(&self, session_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("abort".to_string());
        state.aborts.push(session_id.to_string());
        if state.fail_abort {
            return Err(EngineError::Transport("abort refused".to_string()));
        }
        Ok(())
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionActivity> {
        let mut state = self.lock();
        state.calls.push("session_status".to_string());
        let Some(active) = state.sessions.get_mut(session_id) else {
            return Ok(SessionActivity::Idle);
        };
        if active.script.hang {
            return Ok(SessionActivity::Busy);
        }
        active.polls += 1;
        if active.polls <= active.script.busy_polls {
            Ok(SessionActivity::Busy)
        } else {
            Ok(SessionActivity::Idle)
        }
    }

    async fn reply_question(&self, request_id: &str, answers: Vec<Vec<String>>) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("reply_question".to_string());
        state.replies.push((request_id.to_string(), answers));
        Ok(())
    }

    async fn reject_question(&self, request_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("reject_question".to_string());
        state.rejections.push(request_id.to_string());
        Ok(())
    }
}

/// Launcher handing out a shared [`MockRuntime`].
pub struct MockLauncher {
    runtime: Arc<MockRuntime>,
    attached: bool,
    launches: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
}

struct MockServer(Arc<AtomicUsize>);

impl ServerGuard for MockServer {
    fn shutdown(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl MockLauncher {
    /// Behaves like a spawned server owned by the run.
    pub fn owned(runtime: Arc<MockRuntime>) -> Self {
        Self::build(runtime, false)
    }

    /// Behaves like an externally managed server.
    pub fn attached(runtime: Arc<MockRuntime>) -> Self {
        Self::build(runtime, true)
    }

    fn build(runtime: Arc<MockRuntime>, attached: bool) -> Self {
        Self {
            runtime,
            attached,
            launches: AtomicUsize::new(0),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeLauncher for MockLauncher {
    async fn launch(&self) -> Result<RuntimeHandle> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let client: Arc<dyn AgentRuntime> = self.runtime.clone();
        if self.attached {
            Ok(RuntimeHandle::attached(client))
        } else {
            Ok(RuntimeHandle::owned(client, Box::new(MockServer(self.shutdowns.clone()))))
        }
    }
}
