//! Run persistence for phaseloop
//!
//! Everything lives under `.phaseloop/` in the project directory:
//! - `tracker`: per-run event log, session snapshot and transcripts
//! - `status`: read-only status query over those files
//! - `progress`: the markdown progress journal

mod progress;
mod session;
mod status;
mod tracker;

pub use progress::{append_progress, format_duration, format_progress_entry, read_recent_progress};
pub use session::{RunSession, RunState};
pub use status::{LATEST, RunStatus, get_run_status, resolve_run_id};
pub use tracker::{FinalizeGuard, RunTracker, transcript_filename, transcript_order};

/// State directory at the project root
pub const STATE_DIR: &str = ".phaseloop";
pub const RUNS_DIR: &str = "runs";
pub const SESSION_FILE: &str = "session.json";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const ITERATIONS_DIR: &str = "iterations";
pub const PROGRESS_FILE: &str = "progress.md";
pub const CONFIG_FILE: &str = "config.yml";
