//! Bounded capture of a session's event stream.
//!
//! Two independent buffers are kept per iteration: the raw wire-level log
//! (one JSON line per event) and the human-readable rendering that was shown
//! live. Both keep only the most recent content once they reach their bound.

use std::sync::{Arc, Mutex};

/// Default retained size of each buffer, in characters.
pub const DEFAULT_MAX_CAPTURE_CHARS: usize = 250_000;

/// Prefix written in front of a buffer that lost its oldest content.
pub const TRUNCATION_MARKER: &str = "\n... [truncated] ...\n";

/// Capture shared between the engine and one coordinator invocation.
pub type SharedCapture = Arc<Mutex<StreamCapture>>;

#[derive(Debug, Clone)]
pub struct StreamCapture {
    raw: String,
    display: String,
    max_chars: usize,
}

impl Default for StreamCapture {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPTURE_CHARS)
    }
}

impl StreamCapture {
    pub fn new(max_chars: usize) -> Self {
        Self {
            raw: String::new(),
            display: String::new(),
            // The marker alone must fit.
            max_chars: max_chars.max(TRUNCATION_MARKER.chars().count() + 1),
        }
    }

    pub fn shared(max_chars: usize) -> SharedCapture {
        Arc::new(Mutex::new(Self::new(max_chars)))
    }

    pub fn add_raw_line(&mut self, line: &str) {
        append_with_limit(&mut self.raw, line, self.max_chars);
        append_with_limit(&mut self.raw, "\n", self.max_chars);
    }

    pub fn add_display_text(&mut self, text: &str) {
        append_with_limit(&mut self.display, text, self.max_chars);
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty() && self.display.trim().is_empty()
    }
}

/// Render a tool status change as a short inline fragment.
///
/// `running` opens a marker naming the tool, `completed` closes it, `error`
/// prints the error text (or `unknown`); every other status renders nothing.
pub fn tool_status_text(tool: &str, status: &str, error: Option<&str>) -> String {
    match status {
        "running" => format!("\n[tool: {}] ", tool),
        "completed" => "done\n".to_string(),
        "error" => format!("error: {}\n", error.filter(|e| !e.is_empty()).unwrap_or("unknown")),
        _ => String::new(),
    }
}

fn append_with_limit(buffer: &mut String, chunk: &str, max_chars: usize) {
    if chunk.is_empty() {
        return;
    }
    buffer.push_str(chunk);

    let total = buffer.chars().count();
    if total <= max_chars {
        return;
    }

    let keep = max_chars - TRUNCATION_MARKER.chars().count();
    let skip = total - keep;
    let cut = buffer.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(buffer.len());
    let mut truncated = String::with_capacity(TRUNCATION_MARKER.len() + buffer.len() - cut);
    truncated.push_str(TRUNCATION_MARKER);
    truncated.push_str(&buffer[cut..]);
    *buffer = truncated;
}
