//! Human-readable progress journal (`.phaseloop/progress.md`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::IterationOutcome;
use crate::error::Result;

use super::{PROGRESS_FILE, STATE_DIR};

const HEADER: &str = "# Execution Progress\n\n";
const ENTRY_PREFIX: &str = "## Iteration ";

fn progress_path(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR).join(PROGRESS_FILE)
}

/// Append one entry, creating the journal with its header if needed.
pub fn append_progress(project_dir: &Path, outcome: &IterationOutcome) -> Result<()> {
    let path = progress_path(project_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        fs::write(&path, HEADER)?;
    }
    let mut file = OpenOptions::new().append(true).open(&path)?;
    file.write_all(format_progress_entry(outcome).as_bytes())?;
    Ok(())
}

/// The last `count` entries, joined, or an empty string without a journal.
pub fn read_recent_progress(project_dir: &Path, count: usize) -> String {
    let Ok(content) = fs::read_to_string(progress_path(project_dir)) else {
        return String::new();
    };

    let mut blocks: Vec<String> = Vec::new();
    for line in content.lines() {
        if line.starts_with(ENTRY_PREFIX) {
            blocks.push(String::new());
        }
        if let Some(block) = blocks.last_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }

    let skip = blocks.len().saturating_sub(count);
    blocks[skip..].join("\n").trim().to_string()
}

pub fn format_progress_entry(outcome: &IterationOutcome) -> String {
    let mut entry = format!(
        "{}{} - {}: {} [{}]\n",
        ENTRY_PREFIX,
        outcome.iteration_number,
        outcome.work_ref,
        outcome.label,
        outcome.status.as_str().to_uppercase()
    );
    entry.push_str(&format!("- Model: {}\n", outcome.model));
    entry.push_str(&format!("- Duration: {}\n", format_duration(outcome.duration_ms)));
    if let Some(cost) = outcome.cost {
        entry.push_str(&format!("- Cost: ${:.4}\n", cost));
    }
    if let Some(tokens) = &outcome.tokens {
        entry.push_str(&format!("- Tokens: {} in / {} out", tokens.input, tokens.output));
        if tokens.reasoning > 0 {
            entry.push_str(&format!(" / {} reasoning", tokens.reasoning));
        }
        entry.push('\n');
    }
    if let Some(files) = outcome.files_changed.as_ref().filter(|f| !f.is_empty()) {
        entry.push_str(&format!("- Files changed: {}\n", files.join(", ")));
    }
    if let Some(transcript) = &outcome.transcript_ref {
        entry.push_str(&format!("- Transcript: {}\n", transcript));
    }
    if let Some(reason) = &outcome.reason {
        entry.push_str(&format!("- Notes: {}\n", reason));
    }
    entry.push('\n');
    entry
}

/// `42s` or `3m 7s`
pub fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    if minutes == 0 {
        format!("{}s", seconds % 60)
    } else {
        format!("{}m {}s", minutes, seconds % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompletionStatus, TokenUsage};
    use tempfile::TempDir;

    fn outcome(n: u32, status: CompletionStatus) -> IterationOutcome {
        IterationOutcome {
            iteration_number: n,
            work_ref: format!("bd-{}", n),
            label: format!("task {}", n),
            status,
            reason: None,
            model: "anthropic/claude".into(),
            duration_ms: 65_000,
            cost: None,
            tokens: None,
            files_changed: None,
            transcript_ref: None,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(999), "0s");
        assert_eq!(format_duration(42_000), "42s");
        assert_eq!(format_duration(187_500), "3m 7s");
    }

    #[test]
    fn test_format_full_entry() {
        let mut o = outcome(3, CompletionStatus::Failed);
        o.cost = Some(0.12346);
        o.tokens = Some(TokenUsage {
            input: 1000,
            output: 200,
            reasoning: 50,
        });
        o.files_changed = Some(vec!["a.rs".into(), "b.rs".into()]);
        o.reason = Some("tests red".into());
        assert_eq!(
            format_progress_entry(&o),
            "## Iteration 3 - bd-3: task 3 [FAILED]\n\
             - Model: anthropic/claude\n\
             - Duration: 1m 5s\n\
             - Cost: $0.1235\n\
             - Tokens: 1000 in / 200 out / 50 reasoning\n\
             - Files changed: a.rs, b.rs\n\
             - Notes: tests red\n\n"
        );
    }

    #[test]
    fn test_minimal_entry() {
        let entry = format_progress_entry(&outcome(1, CompletionStatus::PhaseDone));
        assert!(entry.starts_with("## Iteration 1 - bd-1: task 1 [PHASE_DONE]\n"));
        assert!(!entry.contains("Cost"));
        assert!(!entry.contains("Files changed"));
    }

    #[test]
    fn test_append_and_read_recent() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_recent_progress(temp.path(), 5), "");

        for n in 1..=4 {
            append_progress(temp.path(), &outcome(n, CompletionStatus::Complete)).unwrap();
        }
        let content = fs::read_to_string(progress_path(temp.path())).unwrap();
        assert!(content.starts_with(HEADER));

        let recent = read_recent_progress(temp.path(), 2);
        assert!(recent.starts_with("## Iteration 3"));
        assert!(recent.contains("## Iteration 4"));
        assert!(!recent.contains("## Iteration 2"));

        let all = read_recent_progress(temp.path(), 10);
        assert!(all.starts_with("## Iteration 1"));
    }
}
