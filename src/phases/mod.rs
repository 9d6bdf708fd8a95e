//! Work sources for the built-in phases
//!
//! - `TaskFileSource`: one task per iteration from a YAML task file
//! - `PromptLoopSource`: the same prompt every iteration until the agent
//!   declares the phase done

mod prompt_loop;
mod task_file;

pub use prompt_loop::PromptLoopSource;
pub use task_file::{TaskFileSource, TaskSpec, load_tasks};

use crate::storage::read_recent_progress;
use std::path::Path;

/// Progress entries fed back into each prompt.
const RECENT_PROGRESS_ENTRIES: usize = 5;

/// Instructions shared by every phase for reporting how a turn ended.
const COMPLETION_INSTRUCTIONS: &str = "\
You MUST call the task_complete tool as your FINAL action. Never end without it.
- status: \"complete\" - the work item is done, the loop continues
- status: \"phase_done\" - all work is done, the loop ends
- status: \"blocked\" - you cannot proceed, explain why
- status: \"failed\" - something went wrong, explain what
Always provide a `reason` explaining your status.";

fn system_prompt(role: &str) -> String {
    format!("{}\n\n{}", role, COMPLETION_INSTRUCTIONS)
}

/// Append the recent progress journal, when there is one.
fn with_recent_progress(prompt: &str, project_dir: &Path) -> String {
    let progress = read_recent_progress(project_dir, RECENT_PROGRESS_ENTRIES);
    if progress.is_empty() {
        prompt.to_string()
    } else {
        format!("{}\n\n## Recent Progress\n\n{}\n", prompt.trim_end(), progress)
    }
}
