//! Read-only status query over persisted run artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use super::session::RunSession;
use super::tracker::transcript_order;
use super::{EVENTS_FILE, ITERATIONS_DIR, RUNS_DIR, SESSION_FILE, STATE_DIR};
use crate::error::{EngineError, Result};

/// Run reference that resolves to the most recent run.
pub const LATEST: &str = "latest";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub session: RunSession,
    pub event_count: usize,
    pub last_event_type: Option<String>,
    pub last_event_timestamp: Option<String>,
    /// Project-relative path of the newest transcript
    pub latest_transcript: Option<String>,
}

fn runs_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR).join(RUNS_DIR)
}

fn no_runs() -> EngineError {
    EngineError::RunNotFound(format!("no run artifacts found ({}/{})", STATE_DIR, RUNS_DIR))
}

/// A run id names a directory directly under `runs/`.
fn is_plain_run_ref(run_ref: &str) -> bool {
    !run_ref.is_empty() && run_ref != "." && run_ref != ".." && !run_ref.contains(['/', '\\'])
}

/// Resolve a run id or `latest` to an existing run directory name.
pub fn resolve_run_id(project_dir: &Path, run_ref: &str) -> Result<String> {
    let runs = runs_dir(project_dir);
    if !runs.is_dir() {
        return Err(no_runs());
    }

    if run_ref != LATEST {
        if !is_plain_run_ref(run_ref) || !runs.join(run_ref).is_dir() {
            return Err(EngineError::RunNotFound(run_ref.to_string()));
        }
        return Ok(run_ref.to_string());
    }

    // Fast path through the mirror, which names the last run that wrote.
    let mirror = project_dir.join(STATE_DIR).join(SESSION_FILE);
    if let Ok(content) = fs::read_to_string(&mirror) {
        if let Ok(session) = serde_json::from_str::<RunSession>(&content) {
            if runs.join(&session.run_id).is_dir() {
                return Ok(session.run_id);
            }
        }
    }

    let mut ids: Vec<String> = fs::read_dir(&runs)?
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    ids.sort();
    ids.pop().ok_or_else(no_runs)
}

/// Snapshot, event statistics and latest transcript of a run.
pub fn get_run_status(project_dir: &Path, run_ref: &str) -> Result<RunStatus> {
    let run_id = resolve_run_id(project_dir, run_ref)?;
    let run_dir = runs_dir(project_dir).join(&run_id);

    let session_path = run_dir.join(SESSION_FILE);
    if !session_path.exists() {
        return Err(EngineError::Storage(format!(
            "Run session artifact missing: {}",
            session_path.display()
        )));
    }
    let session: RunSession = serde_json::from_str(&fs::read_to_string(&session_path)?)?;

    let mut event_count = 0;
    let mut last_event_type = None;
    let mut last_event_timestamp = None;
    if let Ok(log) = fs::read_to_string(run_dir.join(EVENTS_FILE)) {
        let lines: Vec<&str> = log.lines().filter(|l| !l.trim().is_empty()).collect();
        event_count = lines.len();
        if let Some(last) = lines.last().and_then(|l| serde_json::from_str::<Value>(l).ok()) {
            last_event_type = last
                .get("event")
                .and_then(|e| e.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            last_event_timestamp = last.get("ts").and_then(Value::as_str).map(str::to_string);
        }
    }

    let latest_transcript = latest_transcript(&run_dir.join(ITERATIONS_DIR)).map(|name| {
        Path::new(STATE_DIR)
            .join(RUNS_DIR)
            .join(&run_id)
            .join(ITERATIONS_DIR)
            .join(name)
            .display()
            .to_string()
    });

    Ok(RunStatus {
        run_id,
        run_dir,
        session,
        event_count,
        last_event_type,
        last_event_timestamp,
        latest_transcript,
    })
}

fn latest_transcript(dir: &Path) -> Option<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".log"))
        .collect();
    names.sort_by_key(|name| (transcript_order(name), name.clone()));
    names.pop()
}
