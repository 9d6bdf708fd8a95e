//! Durable record of one run.
//!
//! Layout under the project:
//!
//! ```text
//! .phaseloop/
//!   session.json                 mirror of the most recently updated run
//!   runs/<runId>/session.json    snapshot, rewritten after every event
//!   runs/<runId>/events.jsonl    {"ts": ..., "event": {...}} per line
//!   runs/<runId>/iterations/     NNN-<label>.log transcripts
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use serde_json::json;

use super::session::{RunSession, RunState};
use super::{EVENTS_FILE, ITERATIONS_DIR, RUNS_DIR, SESSION_FILE, STATE_DIR};
use crate::capture::StreamCapture;
use crate::domain::EngineEvent;
use crate::error::{EngineError, Result};
use crate::events::{EventBus, Subscription};
use crate::id::{generate_run_id, now_iso, sanitize_label};

struct TrackerState {
    session: RunSession,
    finalized: bool,
}

pub struct RunTracker {
    run_id: String,
    run_dir: PathBuf,
    mirror_path: PathBuf,
    state: Mutex<TrackerState>,
}

impl RunTracker {
    /// Allocate a run id, create its directory and write the initial
    /// `running` snapshot.
    pub fn start(project_dir: &Path, description: &str, max_iterations: u32) -> Result<Self> {
        let run_id = generate_run_id();
        let state_dir = project_dir.join(STATE_DIR);
        let run_dir = state_dir.join(RUNS_DIR).join(&run_id);
        fs::create_dir_all(run_dir.join(ITERATIONS_DIR))?;

        let tracker = Self {
            run_id: run_id.clone(),
            run_dir,
            mirror_path: state_dir.join(SESSION_FILE),
            state: Mutex::new(TrackerState {
                session: RunSession::new(run_id, description, max_iterations),
                finalized: false,
            }),
        };
        {
            let mut state = tracker.lock()?;
            tracker.write_session(&mut state.session)?;
        }
        info!("Started run {} at {}", tracker.run_id, tracker.run_dir.display());
        Ok(tracker)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Copy of the current snapshot.
    pub fn session(&self) -> RunSession {
        self.state
            .lock()
            .map(|s| s.session.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().session.clone())
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().map(|s| s.finalized).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, TrackerState>> {
        self.state
            .lock()
            .map_err(|e| EngineError::Storage(format!("Run tracker state poisoned: {}", e)))
    }

    /// Append `event` to the log, update counters and rewrite both snapshots.
    /// Ignored once the run is finalized.
    pub fn record_event(&self, event: &EngineEvent) -> Result<()> {
        let mut state = self.lock()?;
        if state.finalized {
            warn!("Run {} already finalized, dropping {}", self.run_id, event.event_type());
            return Ok(());
        }

        let line = json!({ "ts": now_iso(), "event": event });
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_dir.join(EVENTS_FILE))?;
        writeln!(file, "{}", serde_json::to_string(&line)?)?;

        apply_event(&mut state.session, event);
        self.write_session(&mut state.session)
    }

    /// Persist the iteration's buffers. Returns the project-relative path, or
    /// `None` when both buffers are blank. `retry` is 0 for the first attempt
    /// at a slot; retries get their own file.
    pub fn write_iteration_transcript(
        &self,
        iteration: u32,
        retry: u32,
        label: &str,
        capture: &StreamCapture,
    ) -> Result<Option<String>> {
        let state = self.lock()?;
        if state.finalized {
            warn!("Run {} already finalized, not writing transcript", self.run_id);
            return Ok(None);
        }

        let raw = capture.raw();
        let display = capture.display();
        let has_raw = !raw.trim().is_empty();
        let has_display = !display.trim().is_empty();
        if !has_raw && !has_display {
            debug!("Iteration {} produced no output, skipping transcript", iteration);
            return Ok(None);
        }

        let filename = transcript_filename(iteration, retry, label);
        let mut body = format!("# Iteration {} Transcript\n# Label: {}\n", iteration, label);
        if retry > 0 {
            body.push_str(&format!("# Retry: {}\n", retry));
        }
        body.push('\n');
        if has_display {
            body.push_str("## Display Stream\n\n");
            body.push_str(display);
            body.push_str("\n\n");
        }
        if has_raw {
            body.push_str("## Raw Event Stream\n\n");
            body.push_str(raw);
            body.push('\n');
        }
        fs::write(self.run_dir.join(ITERATIONS_DIR).join(&filename), body)?;

        let relative = Path::new(STATE_DIR)
            .join(RUNS_DIR)
            .join(&self.run_id)
            .join(ITERATIONS_DIR)
            .join(filename);
        Ok(Some(relative.display().to_string()))
    }

    /// Set the final status. Only the first call has an effect; returns
    /// whether this call finalized the run.
    pub fn finalize(&self, status: RunState) -> Result<bool> {
        let mut state = self.lock()?;
        if state.finalized {
            debug!("Run {} already finalized as {}", self.run_id, state.session.status);
            return Ok(false);
        }
        state.session.status = status;
        self.write_session(&mut state.session)?;
        state.finalized = true;
        info!("Run {} finalized as {}", self.run_id, status);
        Ok(true)
    }

    /// Record every event published on `bus`. Write failures are logged.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Subscription {
        let tracker = Arc::clone(self);
        bus.subscribe(move |event| {
            if let Err(e) = tracker.record_event(event) {
                warn!("Failed to record {} for run {}: {}", event.event_type(), tracker.run_id, e);
            }
        })
    }

    fn write_session(&self, session: &mut RunSession) -> Result<()> {
        session.updated_at = now_iso();
        let content = format!("{}\n", serde_json::to_string_pretty(session)?);
        fs::write(self.run_dir.join(SESSION_FILE), &content)?;
        // The mirror is a convenience pointer only.
        if let Err(e) = fs::write(&self.mirror_path, &content) {
            warn!("Failed to update {}: {}", self.mirror_path.display(), e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RunTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTracker")
            .field("run_id", &self.run_id)
            .field("run_dir", &self.run_dir)
            .finish()
    }
}

fn apply_event(session: &mut RunSession, event: &EngineEvent) {
    match event {
        EngineEvent::IterationStarted { iteration, .. } => session.current_iteration = *iteration,
        EngineEvent::IterationCompleted { .. } => session.completed += 1,
        EngineEvent::IterationBlocked { .. } => session.skipped += 1,
        EngineEvent::IterationFailed { .. } => session.failed += 1,
        EngineEvent::LoopCompleted {
            completed,
            failed,
            skipped,
            ..
        } => {
            session.completed = *completed;
            session.failed = *failed;
            session.skipped = *skipped;
        }
        _ => {}
    }
}

/// `NNN-<sanitized label>.log`, or `NNN-<sanitized label>-retryK.log` for
/// the K-th retry of the slot.
pub fn transcript_filename(iteration: u32, retry: u32, label: &str) -> String {
    let label = sanitize_label(label);
    if retry == 0 {
        format!("{:03}-{}.log", iteration, label)
    } else {
        format!("{:03}-{}-retry{}.log", iteration, label, retry)
    }
}

/// Iteration and retry number encoded in a transcript file name.
pub fn transcript_order(name: &str) -> Option<(u32, u32)> {
    let stem = name.strip_suffix(".log")?;
    let (number, rest) = stem.split_once('-')?;
    let iteration = number.parse().ok()?;
    let retry = rest
        .rsplit_once("-retry")
        .and_then(|(_, k)| k.parse().ok())
        .unwrap_or(0);
    Some((iteration, retry))
}

/// Finalizes the run as `failed` if it is dropped before anyone else
/// finalized it, e.g. when the engine returns early with an error.
pub struct FinalizeGuard {
    tracker: Arc<RunTracker>,
}

impl FinalizeGuard {
    pub fn new(tracker: Arc<RunTracker>) -> Self {
        Self { tracker }
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if self.tracker.is_finalized() {
            return;
        }
        warn!("Run {} ended without finalizing, marking failed", self.tracker.run_id());
        if let Err(e) = self.tracker.finalize(RunState::Failed) {
            warn!("Failed to finalize run {}: {}", self.tracker.run_id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompletionStatus, FailureAction};
    use tempfile::TempDir;

    fn read_session(path: &Path) -> RunSession {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    fn started(iteration: u32) -> EngineEvent {
        EngineEvent::IterationStarted {
            iteration,
            label: format!("task {}", iteration),
            model: "p/m".into(),
        }
    }

    #[test]
    fn test_start_writes_both_snapshots() {
        let temp = TempDir::new().unwrap();
        let tracker = RunTracker::start(temp.path(), "Forward", 5).unwrap();

        let run_session = read_session(&tracker.run_dir().join(SESSION_FILE));
        let mirror = read_session(&temp.path().join(STATE_DIR).join(SESSION_FILE));
        assert_eq!(run_session.status, RunState::Running);
        assert_eq!(run_session.run_id, tracker.run_id());
        assert_eq!(mirror.run_id, tracker.run_id());
        assert!(tracker.run_dir().join(ITERATIONS_DIR).is_dir());
    }

    #[test]
    fn test_record_event_appends_and_counts() {
        let temp = TempDir::new().unwrap();
        let tracker = RunTracker::start(temp.path(), "Forward", 5).unwrap();

        tracker.record_event(&started(1)).unwrap();
        tracker
            .record_event(&EngineEvent::IterationCompleted {
                iteration: 1,
                label: "task 1".into(),
                status: CompletionStatus::Complete,
                reason: None,
            })
            .unwrap();
        tracker.record_event(&started(2)).unwrap();
        tracker
            .record_event(&EngineEvent::IterationBlocked {
                iteration: 2,
                label: "task 2".into(),
                reason: Some("creds".into()),
            })
            .unwrap();
        tracker.record_event(&started(3)).unwrap();
        tracker
            .record_event(&EngineEvent::IterationError {
                iteration: 3,
                label: "task 3".into(),
                error: "boom".into(),
            })
            .unwrap();
        tracker
            .record_event(&EngineEvent::IterationFailed {
                iteration: 3,
                label: "task 3".into(),
                status: CompletionStatus::Error,
                action: FailureAction::Skipping,
            })
            .unwrap();

        let session = read_session(&tracker.run_dir().join(SESSION_FILE));
        assert_eq!(session.current_iteration, 3);
        assert_eq!((session.completed, session.failed, session.skipped), (1, 1, 1));

        let log = fs::read_to_string(tracker.run_dir().join(EVENTS_FILE)).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 7);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"]["type"], "iteration.started");
        assert!(first["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_loop_completed_counters_are_verbatim() {
        let temp = TempDir::new().unwrap();
        let tracker = RunTracker::start(temp.path(), "d", 5).unwrap();
        tracker
            .record_event(&EngineEvent::IterationFailed {
                iteration: 1,
                label: "x".into(),
                status: CompletionStatus::Failed,
                action: FailureAction::Skipping,
            })
            .unwrap();
        tracker
            .record_event(&EngineEvent::LoopCompleted {
                completed: 4,
                failed: 0,
                skipped: 2,
                total_time_ms: 10,
            })
            .unwrap();
        let session = tracker.session();
        assert_eq!((session.completed, session.failed, session.skipped), (4, 0, 2));
    }

    #[test]
    fn test_transcript_written_with_sections() {
        let temp = TempDir::new().unwrap();
        let tracker = RunTracker::start(temp.path(), "d", 5).unwrap();
        let mut capture = StreamCapture::default();
        capture.add_display_text("Hello world");
        capture.add_raw_line(r#"{"type":"session.idle"}"#);

        let reference = tracker
            .write_iteration_transcript(7, 0, "bd-3: Add Login!", &capture)
            .unwrap()
            .unwrap();
        assert_eq!(
            PathBuf::from(&reference),
            Path::new(STATE_DIR)
                .join(RUNS_DIR)
                .join(tracker.run_id())
                .join(ITERATIONS_DIR)
                .join("007-bd-3-add-login.log")
        );

        let body = fs::read_to_string(temp.path().join(&reference)).unwrap();
        assert!(body.starts_with("# Iteration 7 Transcript\n# Label: bd-3: Add Login!\n\n## Display Stream\n\nHello world\n\n"));
        assert!(body.ends_with("## Raw Event Stream\n\n{\"type\":\"session.idle\"}\n\n"));
    }

    #[test]
    fn test_display_only_transcript_has_no_raw_section() {
        let temp = TempDir::new().unwrap();
        let tracker = RunTracker::start(temp.path(), "d", 5).unwrap();
        let mut capture = StreamCapture::default();
        capture.add_display_text("text");
        let reference = tracker.write_iteration_transcript(1, 0, "x", &capture).unwrap().unwrap();
        let body = fs::read_to_string(temp.path().join(reference)).unwrap();
        assert!(!body.contains("## Raw Event Stream"));
    }

    #[test]
    fn test_empty_buffers_write_nothing() {
        let temp = TempDir::new().unwrap();
        let tracker = RunTracker::start(temp.path(), "d", 5).unwrap();
        let mut capture = StreamCapture::default();
        capture.add_display_text("  \n");
        assert_eq!(tracker.write_iteration_transcript(1, 0, "x", &capture).unwrap(), None);
        assert_eq!(fs::read_dir(tracker.run_dir().join(ITERATIONS_DIR)).unwrap().count(), 0);
    }

    #[test]
    fn test_finalize_first_call_wins_and_freezes_run() {
        let temp = TempDir::new().unwrap();
        let tracker = RunTracker::start(temp.path(), "d", 5).unwrap();
        assert!(tracker.finalize(RunState::Completed).unwrap());
        assert!(!tracker.finalize(RunState::Failed).unwrap());
        assert_eq!(tracker.session().status, RunState::Completed);

        let events_path = tracker.run_dir().join(EVENTS_FILE);
        tracker.record_event(&started(1)).unwrap();
        assert!(!events_path.exists());
        let on_disk = read_session(&tracker.run_dir().join(SESSION_FILE));
        assert_eq!(on_disk.status, RunState::Completed);
        assert_eq!(on_disk.current_iteration, 0);
    }

    #[test]
    fn test_guard_finalizes_failed_when_dropped_early() {
        let temp = TempDir::new().unwrap();
        let tracker = Arc::new(RunTracker::start(temp.path(), "d", 5).unwrap());
        drop(FinalizeGuard::new(tracker.clone()));
        assert_eq!(tracker.session().status, RunState::Failed);
        assert!(tracker.is_finalized());
    }

    #[test]
    fn test_guard_keeps_explicit_status() {
        let temp = TempDir::new().unwrap();
        let tracker = Arc::new(RunTracker::start(temp.path(), "d", 5).unwrap());
        let guard = FinalizeGuard::new(tracker.clone());
        tracker.finalize(RunState::Completed).unwrap();
        drop(guard);
        assert_eq!(tracker.session().status, RunState::Completed);
    }

    #[test]
    fn test_attach_records_bus_events() {
        let temp = TempDir::new().unwrap();
        let tracker = Arc::new(RunTracker::start(temp.path(), "d", 5).unwrap());
        let bus = EventBus::new();
        let _sub = tracker.attach(&bus);
        bus.emit(&started(4));
        assert_eq!(tracker.session().current_iteration, 4);
    }

    #[test]
    fn test_transcript_filename() {
        assert_eq!(transcript_filename(12, 0, "Refine spec"), "012-refine-spec.log");
        assert_eq!(transcript_filename(1000, 0, "!!"), "1000-iteration.log");
        assert_eq!(transcript_filename(3, 2, "flaky"), "003-flaky-retry2.log");
    }

    #[test]
    fn test_transcript_order() {
        assert_eq!(transcript_order("012-refine-spec.log"), Some((12, 0)));
        assert_eq!(transcript_order("003-flaky-retry2.log"), Some((3, 2)));
        assert_eq!(transcript_order("1000-iteration.log"), Some((1000, 0)));
        assert_eq!(transcript_order("notes.txt"), None);
        assert_eq!(transcript_order("x-y.log"), None);
    }

    #[test]
    fn test_retry_keeps_first_attempt_transcript() {
        let temp = TempDir::new().unwrap();
        let tracker = RunTracker::start(temp.path(), "d", 5).unwrap();
        let mut first = StreamCapture::new(1_000);
        first.add_display_text("FIRST ATTEMPT");
        let mut second = StreamCapture::new(1_000);
        second.add_display_text("SECOND ATTEMPT");

        let a = tracker.write_iteration_transcript(1, 0, "flaky", &first).unwrap().unwrap();
        let b = tracker.write_iteration_transcript(1, 1, "flaky", &second).unwrap().unwrap();

        assert_ne!(a, b);
        assert!(fs::read_to_string(temp.path().join(&a)).unwrap().contains("FIRST ATTEMPT"));
        let retry = fs::read_to_string(temp.path().join(&b)).unwrap();
        assert!(retry.contains("SECOND ATTEMPT"));
        assert!(retry.contains("# Retry: 1"));
    }
}
