//! Wire types exchanged with the agent runtime.
//!
//! Stream events arrive as `{"type": ..., "properties": {...}}` objects. They
//! are parsed leniently: anything unrecognized becomes `RuntimeEvent::Other`
//! and is still recorded verbatim in the raw capture.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::{CompletionResult, CompletionStatus, ModelRef, TokenUsage};

/// Name of the tool an agent calls to signal how its turn ended.
pub const COMPLETION_TOOL: &str = "task_complete";

/// A structured question raised by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionInfo {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Multi-select when true
    #[serde(default)]
    pub multiple: bool,
    /// Free-text input allowed unless explicitly disabled
    #[serde(default = "default_true")]
    pub custom: bool,
}

fn default_true() -> bool {
    true
}

impl QuestionInfo {
    pub fn new(question: impl Into<String>, options: &[&str]) -> Self {
        Self {
            question: question.into(),
            header: None,
            options: options.iter().map(|label| QuestionOption::new(*label)).collect(),
            multiple: false,
            custom: true,
        }
    }

    /// Header and question joined for display and matching.
    pub fn prompt_text(&self) -> String {
        match &self.header {
            Some(header) if !header.is_empty() => format!("{}: {}", header, self.question),
            _ => self.question.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl QuestionOption {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: None,
        }
    }
}

/// Typed view of one stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    TextDelta {
        session_id: String,
        field: String,
        delta: String,
    },
    ToolUpdate {
        session_id: String,
        tool: String,
        status: String,
        error: Option<String>,
    },
    QuestionAsked {
        session_id: String,
        request_id: String,
        questions: Vec<QuestionInfo>,
    },
    SessionIdle {
        session_id: String,
    },
    SessionError {
        session_id: Option<String>,
        message: String,
    },
    Other {
        event_type: String,
    },
}

impl RuntimeEvent {
    /// Session this event belongs to, when it names one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            RuntimeEvent::TextDelta { session_id, .. }
            | RuntimeEvent::ToolUpdate { session_id, .. }
            | RuntimeEvent::QuestionAsked { session_id, .. }
            | RuntimeEvent::SessionIdle { session_id } => Some(session_id),
            RuntimeEvent::SessionError { session_id, .. } => session_id.as_deref(),
            RuntimeEvent::Other { .. } => None,
        }
    }
}

/// An event as received: the raw JSON plus its typed view.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeEnvelope {
    pub raw: Value,
    pub event: RuntimeEvent,
}

impl RuntimeEnvelope {
    pub fn from_value(raw: Value) -> Self {
        let event = parse_event(&raw);
        Self { raw, event }
    }

    pub fn parse(data: &str) -> serde_json::Result<Self> {
        Ok(Self::from_value(serde_json::from_str(data)?))
    }

    pub fn event_type(&self) -> &str {
        self.raw.get("type").and_then(Value::as_str).unwrap_or("")
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn parse_event(raw: &Value) -> RuntimeEvent {
    let event_type = str_field(raw, "type").unwrap_or("").to_string();
    let props = raw.get("properties").cloned().unwrap_or(Value::Null);

    let parsed = match event_type.as_str() {
        "message.part.delta" => parse_text_delta(&props),
        "message.part.updated" => parse_part_updated(&props),
        "question.asked" => parse_question(&props),
        "session.idle" => str_field(&props, "sessionID").map(|id| RuntimeEvent::SessionIdle {
            session_id: id.to_string(),
        }),
        "session.error" => Some(RuntimeEvent::SessionError {
            session_id: str_field(&props, "sessionID").map(str::to_string),
            message: describe_session_error(props.get("error")),
        }),
        _ => None,
    };

    parsed.unwrap_or(RuntimeEvent::Other { event_type })
}

fn parse_text_delta(props: &Value) -> Option<RuntimeEvent> {
    Some(RuntimeEvent::TextDelta {
        session_id: str_field(props, "sessionID")?.to_string(),
        field: str_field(props, "field").unwrap_or("text").to_string(),
        delta: str_field(props, "delta").unwrap_or("").to_string(),
    })
}

fn parse_part_updated(props: &Value) -> Option<RuntimeEvent> {
    let part = props.get("part")?;
    if str_field(part, "type")? != "tool" {
        return None;
    }
    let session_id = str_field(part, "sessionID").or_else(|| str_field(props, "sessionID"))?;
    let state = part.get("state");
    Some(RuntimeEvent::ToolUpdate {
        session_id: session_id.to_string(),
        tool: str_field(part, "tool").unwrap_or("unknown").to_string(),
        status: state.and_then(|s| str_field(s, "status")).unwrap_or("").to_string(),
        error: state.and_then(|s| str_field(s, "error")).map(str::to_string),
    })
}

fn parse_question(props: &Value) -> Option<RuntimeEvent> {
    let questions = props
        .get("questions")
        .cloned()
        .and_then(|q| serde_json::from_value::<Vec<QuestionInfo>>(q).ok())
        .unwrap_or_default();
    Some(RuntimeEvent::QuestionAsked {
        session_id: str_field(props, "sessionID")?.to_string(),
        request_id: str_field(props, "id")?.to_string(),
        questions,
    })
}

/// Session errors come either as a bare string or as `{name, data: {message}}`.
fn describe_session_error(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(text)) => text.clone(),
        Some(obj @ Value::Object(_)) => {
            let name = str_field(obj, "name").unwrap_or("Error");
            let message = obj
                .get("data")
                .and_then(|d| str_field(d, "message"))
                .map(str::to_string)
                .unwrap_or_else(|| obj.to_string());
            format!("{}: {}", name, message)
        }
        _ => "unknown error".to_string(),
    }
}

/// One message of a session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub role: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text {
        #[serde(default)]
        text: String,
    },
    Tool {
        tool: String,
        state: ToolState,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolState {
    pub status: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionMessage {
    pub fn is_assistant(&self) -> bool {
        self.info.role == "assistant"
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            info: MessageInfo {
                role: "user".to_string(),
                cost: 0.0,
                tokens: None,
            },
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    pub fn assistant(cost: f64, tokens: TokenUsage) -> Self {
        Self {
            info: MessageInfo {
                role: "assistant".to_string(),
                cost,
                tokens: Some(tokens),
            },
            parts: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(MessagePart::Text { text: text.into() });
        self
    }

    /// Append a completed `task_complete` tool call.
    pub fn with_completion(mut self, status: &str, reason: Option<&str>) -> Self {
        let mut input = json!({ "status": status });
        if let Some(reason) = reason {
            input["reason"] = json!(reason);
        }
        self.parts.push(MessagePart::Tool {
            tool: COMPLETION_TOOL.to_string(),
            state: ToolState {
                status: "completed".to_string(),
                input,
                error: None,
            },
        });
        self
    }

    /// Completion signal carried by this message, if any.
    pub fn completion(&self) -> Option<CompletionResult> {
        self.parts.iter().find_map(|part| match part {
            MessagePart::Tool { tool, state } if tool == COMPLETION_TOOL && state.status == "completed" => {
                Some(completion_from_input(&state.input))
            }
            _ => None,
        })
    }
}

fn completion_from_input(input: &Value) -> CompletionResult {
    let reason = str_field(input, "reason").map(str::to_string);
    match str_field(input, "status") {
        None => CompletionResult::new(CompletionStatus::Complete, reason),
        Some(raw) => match raw.parse::<CompletionStatus>() {
            Ok(status) => CompletionResult::new(status, reason),
            Err(err) => CompletionResult::with_reason(
                CompletionStatus::Failed,
                match reason {
                    Some(r) => format!("{} ({})", err, r),
                    None => err,
                },
            ),
        },
    }
}

/// A file touched during the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub file: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

impl FileDiff {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            additions: 0,
            deletions: 0,
        }
    }
}

/// Everything needed to start one agent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub session_id: String,
    pub model: ModelRef,
    pub prompt: String,
    pub system_prompt: Option<String>,
}

impl PromptRequest {
    /// JSON body of the non-blocking prompt call.
    pub fn body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "parts": [{ "type": "text", "text": self.prompt }],
        });
        if let Some(system) = &self.system_prompt {
            body["system"] = json!(system);
        }
        body
    }
}

/// Coarse session activity reported by the runtime's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionActivity {
    Idle,
    Busy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_delta() {
        let env = RuntimeEnvelope::parse(
            r#"{"type":"message.part.delta","properties":{"sessionID":"s1","field":"text","delta":"Hi"}}"#,
        )
        .unwrap();
        assert_eq!(
            env.event,
            RuntimeEvent::TextDelta {
                session_id: "s1".into(),
                field: "text".into(),
                delta: "Hi".into()
            }
        );
        assert_eq!(env.event_type(), "message.part.delta");
    }

    #[test]
    fn test_parse_tool_update_reads_session_from_part() {
        let raw = json!({
            "type": "message.part.updated",
            "properties": {"part": {"type": "tool", "sessionID": "s1", "tool": "bash", "state": {"status": "error", "error": "exit 1"}}}
        });
        let env = RuntimeEnvelope::from_value(raw);
        assert_eq!(
            env.event,
            RuntimeEvent::ToolUpdate {
                session_id: "s1".into(),
                tool: "bash".into(),
                status: "error".into(),
                error: Some("exit 1".into())
            }
        );
    }

    #[test]
    fn test_non_tool_part_update_is_other() {
        let raw = json!({
            "type": "message.part.updated",
            "properties": {"part": {"type": "text", "sessionID": "s1", "text": "x"}}
        });
        assert_eq!(
            RuntimeEnvelope::from_value(raw).event,
            RuntimeEvent::Other {
                event_type: "message.part.updated".into()
            }
        );
    }

    #[test]
    fn test_parse_question() {
        let raw = json!({
            "type": "question.asked",
            "properties": {
                "id": "req-1",
                "sessionID": "s1",
                "questions": [{"question": "Which DB?", "options": [{"label": "Postgres"}, {"label": "SQLite"}]}]
            }
        });
        match RuntimeEnvelope::from_value(raw).event {
            RuntimeEvent::QuestionAsked {
                request_id, questions, ..
            } => {
                assert_eq!(request_id, "req-1");
                assert_eq!(questions.len(), 1);
                assert!(questions[0].custom);
                assert!(!questions[0].multiple);
                assert_eq!(questions[0].options[1].label, "SQLite");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_session_error_shapes() {
        let structured = json!({
            "type": "session.error",
            "properties": {"sessionID": "s1", "error": {"name": "ProviderAuthError", "data": {"message": "bad key"}}}
        });
        match RuntimeEnvelope::from_value(structured).event {
            RuntimeEvent::SessionError { message, .. } => assert_eq!(message, "ProviderAuthError: bad key"),
            other => panic!("unexpected event {:?}", other),
        }

        let plain = json!({"type": "session.error", "properties": {"error": "boom"}});
        let event = RuntimeEnvelope::from_value(plain).event;
        assert_eq!(event.session_id(), None);
        assert_eq!(
            event,
            RuntimeEvent::SessionError {
                session_id: None,
                message: "boom".into()
            }
        );
    }

    #[test]
    fn test_unknown_event_is_other() {
        let env = RuntimeEnvelope::parse(r#"{"type":"server.heartbeat","properties":{}}"#).unwrap();
        assert_eq!(
            env.event,
            RuntimeEvent::Other {
                event_type: "server.heartbeat".into()
            }
        );
    }

    #[test]
    fn test_message_parsing_ignores_unknown_parts() {
        let raw = json!({
            "info": {"role": "assistant", "cost": 0.5, "tokens": {"input": 10, "output": 4, "reasoning": 1, "cache": {"read": 3}}},
            "parts": [
                {"type": "step-start"},
                {"type": "tool", "tool": "task_complete", "state": {"status": "completed", "input": {"status": "blocked", "reason": "need creds"}}}
            ]
        });
        let message: SessionMessage = serde_json::from_value(raw).unwrap();
        assert!(message.is_assistant());
        assert_eq!(message.parts[0], MessagePart::Other);
        assert_eq!(
            message.completion(),
            Some(CompletionResult::with_reason(CompletionStatus::Blocked, "need creds"))
        );
    }

    #[test]
    fn test_completion_defaults_to_complete() {
        let message = SessionMessage::assistant(0.0, TokenUsage::default());
        let mut message = message;
        message.parts.push(MessagePart::Tool {
            tool: COMPLETION_TOOL.into(),
            state: ToolState {
                status: "completed".into(),
                input: json!({}),
                error: None,
            },
        });
        assert_eq!(message.completion(), Some(CompletionResult::complete()));
    }

    #[test]
    fn test_completion_ignores_running_tool() {
        let mut message = SessionMessage::assistant(0.0, TokenUsage::default());
        message.parts.push(MessagePart::Tool {
            tool: COMPLETION_TOOL.into(),
            state: ToolState {
                status: "running".into(),
                input: json!({"status": "complete"}),
                error: None,
            },
        });
        assert_eq!(message.completion(), None);
    }

    #[test]
    fn test_unrecognized_completion_status_is_failed() {
        let message = SessionMessage::assistant(0.0, TokenUsage::default()).with_completion("finished", Some("all good"));
        let completion = message.completion().unwrap();
        assert_eq!(completion.status, CompletionStatus::Failed);
        assert!(completion.reason.unwrap().contains("'finished'"));
    }

    #[test]
    fn test_prompt_body() {
        let request = PromptRequest {
            session_id: "s1".into(),
            model: ModelRef::new("anthropic", "claude"),
            prompt: "build it".into(),
            system_prompt: Some("be careful".into()),
        };
        assert_eq!(
            request.body(),
            json!({
                "model": {"providerID": "anthropic", "modelID": "claude"},
                "parts": [{"type": "text", "text": "build it"}],
                "system": "be careful"
            })
        );
    }

    #[test]
    fn test_question_prompt_text() {
        let mut q = QuestionInfo::new("Pick one", &["a"]);
        assert_eq!(q.prompt_text(), "Pick one");
        q.header = Some("Storage".into());
        assert_eq!(q.prompt_text(), "Storage: Pick one");
    }
}
