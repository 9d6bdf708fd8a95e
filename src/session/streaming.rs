//! Push-based coordinator over the runtime event stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::results::{PromptResult, collect_result};
use super::{SessionCoordinator, abort_quietly, with_capture};
use crate::answers::AnswerSource;
use crate::capture::{SharedCapture, tool_status_text};
use crate::config::EngineConfig;
use crate::domain::{CompletionResult, CompletionStatus};
use crate::error::{EngineError, Result};
use crate::output::OutputSink;
use crate::runtime::{AgentRuntime, EventStream, PromptRequest, QuestionInfo, RuntimeEvent};

/// How the event loop ended.
#[derive(Debug, PartialEq)]
enum StreamExit {
    Idle,
    SessionError(String),
    Cancelled(String),
    Closed,
}

pub struct StreamingCoordinator {
    poll_interval: Duration,
    inactivity_timeout: Duration,
    heartbeat_interval: Duration,
    answers: Arc<dyn AnswerSource>,
    output: Arc<dyn OutputSink>,
}

impl StreamingCoordinator {
    pub fn new(config: &EngineConfig, answers: Arc<dyn AnswerSource>, output: Arc<dyn OutputSink>) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            inactivity_timeout: config.inactivity_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            answers,
            output,
        }
    }

    fn show(&self, capture: &SharedCapture, text: &str) {
        with_capture(capture, |c| c.add_display_text(text));
        self.output.write(text);
    }

    async fn consume(
        &self,
        runtime: &dyn AgentRuntime,
        session_id: &str,
        stream: &mut EventStream,
        capture: &SharedCapture,
    ) -> Result<StreamExit> {
        let start = Instant::now();
        let mut ticker = interval_at(start + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_event = start;
        let mut last_heartbeat = start;

        loop {
            tokio::select! {
                next = stream.next() => {
                    let Some(item) = next else {
                        warn!("Event stream closed before session {} went idle", session_id);
                        return Ok(StreamExit::Closed);
                    };
                    let envelope = item?;
                    last_event = Instant::now();
                    with_capture(capture, |c| c.add_raw_line(&envelope.raw.to_string()));

                    // The stream is shared by every session on the server.
                    if envelope.event.session_id().is_some_and(|id| id != session_id) {
                        continue;
                    }
                    debug!("Session {} event: {}", session_id, envelope.event_type());

                    match envelope.event {
                        RuntimeEvent::TextDelta { field, delta, .. } if field == "text" => {
                            self.show(capture, &delta);
                        }
                        RuntimeEvent::ToolUpdate { tool, status, error, .. } => {
                            let text = tool_status_text(&tool, &status, error.as_deref());
                            if !text.is_empty() {
                                self.show(capture, &text);
                            }
                        }
                        RuntimeEvent::QuestionAsked { request_id, questions, .. } => {
                            if let Some(reason) = self.ask(runtime, &request_id, &questions, capture).await? {
                                return Ok(StreamExit::Cancelled(reason));
                            }
                            // Waiting on a human is not inactivity.
                            last_event = Instant::now();
                        }
                        RuntimeEvent::SessionIdle { .. } => {
                            self.show(capture, "\n");
                            return Ok(StreamExit::Idle);
                        }
                        RuntimeEvent::SessionError { session_id: None, message } => {
                            warn!("Ignoring session error not scoped to a session: {}", message);
                        }
                        RuntimeEvent::SessionError { message, .. } => {
                            self.show(capture, &format!("\n[session error: {}]\n", message));
                            return Ok(StreamExit::SessionError(message));
                        }
                        _ => {}
                    }
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let idle = now.duration_since(last_event);
                    if idle >= self.inactivity_timeout {
                        warn!("Session {} inactive for {}s", session_id, idle.as_secs());
                        return Err(EngineError::Inactivity { seconds: self.inactivity_timeout.as_secs() });
                    }
                    if now.duration_since(last_heartbeat) >= self.heartbeat_interval {
                        self.output.write(&format!(
                            "\n[heartbeat] session active, waiting for events ({}s idle)\n",
                            idle.as_secs()
                        ));
                        last_heartbeat = now;
                    }
                }
            }
        }
    }

    /// Returns the cancellation reason when the answer source declines.
    async fn ask(
        &self,
        runtime: &dyn AgentRuntime,
        request_id: &str,
        questions: &[QuestionInfo],
        capture: &SharedCapture,
    ) -> Result<Option<String>> {
        for question in questions {
            with_capture(capture, |c| c.add_display_text(&format!("\n[question] {}\n", question.prompt_text())));
        }

        match self.answers.answer(questions).await {
            Ok(answers) => {
                for answer in &answers {
                    self.show(capture, &format!("[answer] {}\n", answer.join(", ")));
                }
                runtime.reply_question(request_id, answers).await?;
                Ok(None)
            }
            Err(EngineError::Cancelled(reason)) => {
                info!("Question {} cancelled: {}", request_id, reason);
                if let Err(e) = runtime.reject_question(request_id).await {
                    warn!("Failed to reject question {}: {}", request_id, e);
                }
                Ok(Some(reason))
            }
            Err(e) => {
                if let Err(reject) = runtime.reject_question(request_id).await {
                    warn!("Failed to reject question {}: {}", request_id, reject);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SessionCoordinator for StreamingCoordinator {
    async fn run(&self, runtime: &dyn AgentRuntime, request: &PromptRequest, capture: &SharedCapture) -> Result<PromptResult> {
        let session_id = request.session_id.as_str();

        // Subscribe first so nothing emitted right after the prompt is lost.
        let mut stream = runtime.subscribe().await?;
        runtime.prompt_async(request).await?;

        let exit = self.consume(runtime, session_id, &mut stream, capture).await;
        drop(stream);

        let exit = match exit {
            Ok(exit) => exit,
            Err(e) => {
                if matches!(e, EngineError::Inactivity { .. }) {
                    abort_quietly(runtime, session_id).await;
                }
                return Err(e);
            }
        };
        debug!("Session {} stream ended: {:?}", session_id, exit);

        match exit {
            StreamExit::Idle | StreamExit::Closed => collect_result(runtime, session_id, None, None).await,
            StreamExit::SessionError(message) => {
                let fallback = CompletionResult::from(&EngineError::SessionError(message));
                collect_result(runtime, session_id, Some(fallback), None).await
            }
            StreamExit::Cancelled(reason) => {
                let blocked = CompletionResult::with_reason(CompletionStatus::Blocked, reason);
                collect_result(runtime, session_id, None, Some(blocked)).await
            }
        }
    }
}
