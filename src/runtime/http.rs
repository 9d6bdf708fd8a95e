//! HTTP client for an OpenCode-compatible agent runtime.
//!
//! Plain endpoints use JSON over `reqwest`; the global event stream is
//! server-sent events via `reqwest-eventsource`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use serde_json::{Value, json};

use super::client::{AgentRuntime, EventStream};
use super::types::{FileDiff, PromptRequest, RuntimeEnvelope, SessionActivity, SessionMessage};
use crate::error::{EngineError, Result};

/// Per-request timeout for every call except the event stream.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpRuntime {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CreatedSession {
    id: String,
}

#[derive(Deserialize)]
struct StatusEntry {
    #[serde(rename = "type")]
    kind: String,
}

impl HttpRuntime {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| EngineError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and turn non-2xx responses into transport errors.
    async fn send(&self, what: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("{} failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::Transport(format!("{} returned {}: {}", what, status, body)));
        }
        Ok(response)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<T> {
        let response = self.send(what, request).await?;
        response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("{}: failed to parse response: {}", what, e)))
    }
}

#[async_trait]
impl AgentRuntime for HttpRuntime {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn health(&self) -> Result<()> {
        self.send("List sessions", self.client.get(self.url("/session"))).await?;
        Ok(())
    }

    async fn create_session(&self, title: &str) -> Result<String> {
        let created: CreatedSession = self
            .send_json(
                "Create session",
                self.client.post(self.url("/session")).json(&json!({ "title": title })),
            )
            .await?;
        debug!("Created session {} ({})", created.id, title);
        Ok(created.id)
    }

    async fn prompt_async(&self, request: &PromptRequest) -> Result<()> {
        let path = format!("/session/{}/prompt_async", request.session_id);
        self.send("Send prompt", self.client.post(self.url(&path)).json(&request.body()))
            .await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream> {
        let mut source = EventSource::new(self.client.get(self.url("/event")))
            .map_err(|e| EngineError::Transport(format!("Failed to create event source: {}", e)))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        // Wait for the connection so callers can safely start the turn afterwards.
        match source.next().await {
            Some(Ok(Event::Open)) => debug!("Event stream open at {}", self.base_url),
            Some(Ok(Event::Message(message))) => {
                return Err(EngineError::Transport(format!(
                    "Event stream sent data before opening: {}",
                    message.event
                )));
            }
            Some(Err(e)) => {
                source.close();
                return Err(EngineError::Transport(format!("Event stream failed to open: {}", e)));
            }
            None => return Err(EngineError::Transport("Event stream closed before opening".to_string())),
        }

        let stream = futures::stream::unfold(source, |mut source| async move {
            loop {
                match source.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(message))) => {
                        if message.data.trim().is_empty() {
                            continue;
                        }
                        let item = RuntimeEnvelope::parse(&message.data).map_err(EngineError::from);
                        return Some((item, source));
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                        source.close();
                        return None;
                    }
                    Some(Err(e)) => {
                        source.close();
                        return Some((Err(EngineError::Transport(format!("Event stream error: {}", e))), source));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let path = format!("/session/{}/message", session_id);
        self.send_json("List messages", self.client.get(self.url(&path))).await
    }

    async fn diff(&self, session_id: &str) -> Result<Vec<FileDiff>> {
        let path = format!("/session/{}/diff", session_id);
        self.send_json("Session diff", self.client.get(self.url(&path))).await
    }

    async fn abort(&self, session_id: &str) -> Result<()> {
        let path = format!("/session/{}/abort", session_id);
        self.send("Abort session", self.client.post(self.url(&path))).await?;
        Ok(())
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionActivity> {
        let statuses: HashMap<String, StatusEntry> = self
            .send_json("Session status", self.client.get(self.url("/session/status")))
            .await?;
        // Sessions missing from the map are idle.
        Ok(match statuses.get(session_id) {
            Some(entry) if entry.kind != "idle" => SessionActivity::Busy,
            _ => SessionActivity::Idle,
        })
    }

    async fn reply_question(&self, request_id: &str, answers: Vec<Vec<String>>) -> Result<()> {
        let path = format!("/question/{}/reply", request_id);
        let body: Value = json!({ "answers": answers });
        self.send("Reply to question", self.client.post(self.url(&path)).json(&body))
            .await?;
        Ok(())
    }

    async fn reject_question(&self, request_id: &str) -> Result<()> {
        let path = format!("/question/{}/reject", request_id);
        self.send("Reject question", self.client.post(self.url(&path))).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRuntime").field("base_url", &self.base_url).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let runtime = HttpRuntime::new("http://127.0.0.1:4096/").unwrap();
        assert_eq!(runtime.base_url(), "http://127.0.0.1:4096");
        assert_eq!(runtime.url("/session"), "http://127.0.0.1:4096/session");
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpRuntime>();
    }

    #[tokio::test]
    async fn test_health_fails_for_unreachable_server() {
        // Port 9 (discard) is essentially never served over HTTP locally.
        let runtime = HttpRuntime::new("http://127.0.0.1:9").unwrap();
        let err = runtime.health().await.unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
    }
}
