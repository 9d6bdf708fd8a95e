//! Post-turn classification from the session history.

use log::{debug, warn};

use crate::domain::{CompletionResult, TokenUsage};
use crate::error::Result;
use crate::runtime::{AgentRuntime, SessionMessage};

/// What one agent turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptResult {
    pub completion: CompletionResult,
    pub cost: Option<f64>,
    pub tokens: Option<TokenUsage>,
    pub files_changed: Vec<String>,
}

/// The last completion signal in the history.
pub fn extract_completion(messages: &[SessionMessage]) -> Option<CompletionResult> {
    messages.iter().rev().find_map(SessionMessage::completion)
}

/// Cost and tokens summed over every assistant message.
pub fn sum_usage(messages: &[SessionMessage]) -> (Option<f64>, Option<TokenUsage>) {
    let mut cost = 0.0;
    let mut tokens = TokenUsage::default();
    for message in messages.iter().filter(|m| m.is_assistant()) {
        cost += message.info.cost;
        if let Some(usage) = &message.info.tokens {
            tokens.add(usage);
        }
    }
    let cost = (cost > 0.0).then_some(cost);
    let tokens = (!tokens.is_empty()).then_some(tokens);
    (cost, tokens)
}

/// Read the history and diff of a finished session.
///
/// `fallback` classifies a history without a completion signal; `None` means
/// `stalled`. `forced` overrides whatever the history says.
pub async fn collect_result(
    runtime: &dyn AgentRuntime,
    session_id: &str,
    fallback: Option<CompletionResult>,
    forced: Option<CompletionResult>,
) -> Result<PromptResult> {
    let messages = runtime.messages(session_id).await?;
    let (cost, tokens) = sum_usage(&messages);

    let completion = match forced {
        Some(completion) => completion,
        None => extract_completion(&messages)
            .or(fallback)
            .unwrap_or_else(CompletionResult::stalled),
    };
    debug!("Session {} classified as {}", session_id, completion.status);

    let files_changed = match runtime.diff(session_id).await {
        Ok(diffs) => diffs.into_iter().map(|d| d.file).collect(),
        Err(e) => {
            warn!("Could not read diff for session {}: {}", session_id, e);
            Vec::new()
        }
    };

    Ok(PromptResult {
        completion,
        cost,
        tokens,
        files_changed,
    })
}
