//! Default human-readable rendering of engine events.

use std::sync::Arc;

use colored::*;

use super::bus::{EventBus, Subscription};
use crate::domain::EngineEvent;
use crate::output::OutputSink;

/// Render one event as console text. Returns `None` for events that have no
/// console representation.
pub fn render_event(event: &EngineEvent) -> Option<String> {
    let text = match event {
        EngineEvent::LoopDescription { description } => description.bold().to_string(),
        EngineEvent::DryRunIteration { iteration, label, model } => {
            format!("{} Iteration {}: {} (model: {})", "[dry-run]".yellow(), iteration, label, model)
        }
        EngineEvent::DryRunComplete { iterations, .. } => {
            format!("\n{} Would run up to {} iterations", "[dry-run]".yellow(), iterations)
        }
        EngineEvent::ServerStarted { url } => format!("Runtime server at {}", url.cyan()),
        EngineEvent::ServerAttached { url } => format!("Attached to runtime server at {}", url.cyan()),
        EngineEvent::ServerAttachHint { url } => format!("Attach TUI: opencode attach {}", url),
        EngineEvent::IterationStarted { iteration, label, model } => format!(
            "\n{}\n{}\nModel: {}",
            format!("--- Iteration {} ---", iteration).cyan().bold(),
            label,
            model.dimmed()
        ),
        EngineEvent::IterationSessionCreated { session_id, .. } => {
            format!("Session: {} - sending prompt...", session_id.dimmed())
        }
        EngineEvent::IterationRecorded { .. } => return None,
        EngineEvent::IterationCompleted {
            label, status, reason, ..
        } => {
            let mut text = format!("{} {} - {}", "✓".green(), label, status);
            if let Some(reason) = reason {
                text.push_str(&format!("\n  reason: {}", reason));
            }
            text
        }
        EngineEvent::IterationBlocked { label, reason, .. } => format!(
            "{} {} blocked: {}",
            "⚠".yellow(),
            label,
            reason.as_deref().unwrap_or("unknown")
        ),
        EngineEvent::IterationRetrying {
            label,
            status,
            attempt,
            max_retries,
            ..
        } => format!(
            "{} {} {}, retrying ({}/{})",
            "⚠".yellow(),
            label,
            status,
            attempt,
            max_retries
        ),
        EngineEvent::IterationFailed {
            label, status, action, ..
        } => format!("{} {} {} - {}", "✗".red(), label, status, action),
        EngineEvent::IterationError { label, error, .. } => format!("{} {} error: {}", "✗".red(), label, error),
        EngineEvent::LoopCompleted {
            completed,
            failed,
            skipped,
            total_time_ms,
        } => format!(
            "\n{}\nCompleted: {}, Failed: {}, Skipped: {}\nTotal time: {}s",
            "=== Phase Complete ===".bold(),
            completed.to_string().green(),
            failed.to_string().red(),
            skipped.to_string().yellow(),
            (*total_time_ms as f64 / 1000.0).round() as u64
        ),
    };
    Some(text)
}

/// Subscribe the console renderer to `bus`, writing through `sink`.
pub fn attach_console_renderer(bus: &EventBus, sink: Arc<dyn OutputSink>) -> Subscription {
    bus.subscribe(move |event| {
        if let Some(text) = render_event(event) {
            sink.line(&text);
        }
    })
}
