//! Poll-based coordinator.
//!
//! Starts the turn, then polls the session status endpoint until the session
//! goes idle. Progress is measured by growth of the message history; there is
//! no event stream, so interactive questions cannot be answered here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::json;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::results::{PromptResult, collect_result};
use super::{SessionCoordinator, abort_quietly, with_capture};
use crate::capture::SharedCapture;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::output::OutputSink;
use crate::runtime::{AgentRuntime, MessagePart, PromptRequest, SessionActivity};

pub struct PollingCoordinator {
    poll_interval: Duration,
    inactivity_timeout: Duration,
    heartbeat_interval: Duration,
    output: Arc<dyn OutputSink>,
}

impl PollingCoordinator {
    pub fn new(config: &EngineConfig, output: Arc<dyn OutputSink>) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            inactivity_timeout: config.inactivity_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            output,
        }
    }

    async fn wait_for_idle(&self, runtime: &dyn AgentRuntime, session_id: &str, capture: &SharedCapture) -> Result<()> {
        let start = Instant::now();
        let mut ticker = interval_at(start + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seen = 0;
        let mut last_progress = start;
        let mut last_heartbeat = start;

        loop {
            ticker.tick().await;
            let activity = runtime.session_status(session_id).await?;
            let label = match activity {
                SessionActivity::Idle => "idle",
                SessionActivity::Busy => "busy",
            };
            with_capture(capture, |c| {
                c.add_raw_line(&json!({"type": "session.status", "sessionID": session_id, "status": label}).to_string())
            });
            if activity == SessionActivity::Idle {
                return Ok(());
            }

            let now = Instant::now();
            let count = runtime.messages(session_id).await?.len();
            if count != seen {
                debug!("Session {} history grew to {} messages", session_id, count);
                seen = count;
                last_progress = now;
                continue;
            }

            let idle = now.duration_since(last_progress);
            if idle >= self.inactivity_timeout {
                warn!("Session {} made no progress for {}s", session_id, idle.as_secs());
                return Err(EngineError::Inactivity {
                    seconds: self.inactivity_timeout.as_secs(),
                });
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

#[async_trait]
impl SessionCoordinator for PollingCoordinator {
    async fn run(&self, runtime: &dyn AgentRuntime, request: &PromptRequest, capture: &SharedCapture) -> Result<PromptResult> {
        let session_id = request.session_id.as_str();
        runtime.prompt_async(request).await?;

        if let Err(e) = self.wait_for_idle(runtime, session_id, capture).await {
            if matches!(e, EngineError::Inactivity { .. }) {
                abort_quietly(runtime, session_id).await;
            }
            return Err(e);
        }

        // Without a stream the transcript is rebuilt from the final history.
        for message in runtime.messages(session_id).await?.iter().filter(|m| m.is_assistant()) {
            for part in &message.parts {
                if let MessagePart::Text { text } = part {
                    with_capture(capture, |c| c.add_display_text(text));
                    self.output.write(text);
                }
            }
        }
        self.output.write("\n");

        collect_result(runtime, session_id, None, None).await
    }
}
