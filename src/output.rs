//! Destinations for user-facing live output.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Where live session text and rendered lifecycle lines are written.
pub trait OutputSink: Send + Sync {
    fn write(&self, text: &str);

    fn line(&self, text: &str) {
        self.write(text);
        self.write("\n");
    }
}

/// Writes straight to the process stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout must not take the run down with it.
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

/// Collects output in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    buffer: Arc<Mutex<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl OutputSink for BufferSink {
    fn write(&self, text: &str) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push_str(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_collects_lines() {
        let sink = BufferSink::new();
        sink.write("a");
        sink.line("b");
        let clone = sink.clone();
        clone.line("c");
        assert_eq!(sink.contents(), "ab\nc\n");
    }
}
