//! Persisted run artifacts: event log, snapshots, transcripts and status.

mod common;

use std::fs;

use common::{ListSource, harness, test_config};
use phaseloop::config::FailureStrategy;
use phaseloop::domain::{EngineEvent, IterationOutcome};
use phaseloop::runner::RunFlags;
use phaseloop::runtime::{MockRuntime, SessionScript};
use phaseloop::storage::{
    EVENTS_FILE, ITERATIONS_DIR, PROGRESS_FILE, RUNS_DIR, RunSession, RunState, RunTracker, SESSION_FILE, STATE_DIR,
    get_run_status,
};
use serde_json::Value;
use tempfile::TempDir;

fn recorded_outcomes(events: &str) -> Vec<IterationOutcome> {
    events
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .map(|line| {
            assert!(line["ts"].is_string());
            serde_json::from_value::<EngineEvent>(line["event"].clone()).unwrap()
        })
        .filter_map(|event| match event {
            EngineEvent::IterationRecorded { outcome } => Some(outcome),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_outcomes_round_trip_through_event_log() {
    let runtime = MockRuntime::with_scripts([
        SessionScript::completing("complete", Some("added endpoint")).with_files(&["src/api.rs", "src/lib.rs"]),
        SessionScript::completing("blocked", Some("needs API key")),
        SessionScript::completing("failed", Some("tests red")),
    ]);
    let h = harness(test_config(FailureStrategy::Skip, 0), runtime);
    let mut source = ListSource::new(&["T-1", "T-2", "T-3"]);

    let result = h.engine.run(&mut source, &RunFlags::default()).await.unwrap();
    let run_id = result.run_id.clone().unwrap();
    let run_dir = h.dir.path().join(STATE_DIR).join(RUNS_DIR).join(&run_id);

    let events = fs::read_to_string(run_dir.join(EVENTS_FILE)).unwrap();
    let outcomes = recorded_outcomes(&events);
    assert_eq!(outcomes, result.iterations);
    assert_eq!(outcomes[0].files_changed, Some(vec!["src/api.rs".to_string(), "src/lib.rs".to_string()]));
    assert_eq!(outcomes[0].cost, Some(0.01));
    assert_eq!(outcomes[0].model, "anthropic/claude-test");
    assert_eq!(outcomes[1].reason.as_deref(), Some("needs API key"));

    let session: RunSession = serde_json::from_str(&fs::read_to_string(run_dir.join(SESSION_FILE)).unwrap()).unwrap();
    assert_eq!(session.run_id, run_id);
    assert_eq!(session.status, RunState::Completed);
    assert_eq!((session.completed, session.failed, session.skipped), (1, 1, 1));
    assert_eq!(session.current_iteration, 3);

    // The mirror names the same run.
    let mirror: RunSession =
        serde_json::from_str(&fs::read_to_string(h.dir.path().join(STATE_DIR).join(SESSION_FILE)).unwrap()).unwrap();
    assert_eq!(mirror.run_id, run_id);

    let progress = fs::read_to_string(h.dir.path().join(STATE_DIR).join(PROGRESS_FILE)).unwrap();
    assert!(progress.contains("added endpoint"));
    assert!(progress.contains("tests red"));
}

#[tokio::test]
async fn test_event_log_is_camel_case() {
    let h = harness(test_config(FailureStrategy::Skip, 0), MockRuntime::new());
    let mut source = ListSource::new(&["only"]);

    let result = h.engine.run(&mut source, &RunFlags::default()).await.unwrap();
    let run_dir = h.dir.path().join(STATE_DIR).join(RUNS_DIR).join(result.run_id.unwrap());
    let events = fs::read_to_string(run_dir.join(EVENTS_FILE)).unwrap();

    let types: Vec<String> = events
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap()["event"]["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(types.first().map(String::as_str), Some("loop.description"));
    assert!(types.contains(&"server.started".to_string()));
    assert!(types.contains(&"iteration.session_created".to_string()));
    assert_eq!(types.last().map(String::as_str), Some("loop.completed"));

    assert!(events.contains("\"sessionId\":\"ses-1\""));
    assert!(events.contains("\"iterationNumber\":1"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_iteration_leaves_no_transcript() {
    let runtime = MockRuntime::with_scripts([
        SessionScript::completing("complete", None),
        SessionScript::hanging(),
    ]);
    let mut config = test_config(FailureStrategy::Skip, 0);
    config.engine.timeout_minutes = 1;
    let h = harness(config, runtime);
    let mut source = ListSource::new(&["talkative", "silent"]);

    let result = h.engine.run(&mut source, &RunFlags::default()).await.unwrap();
    let run_id = result.run_id.clone().unwrap();

    assert!(result.iterations[0].transcript_ref.is_some());
    assert_eq!(result.iterations[1].transcript_ref, None);
    let transcripts: Vec<_> = fs::read_dir(h.dir.path().join(STATE_DIR).join(RUNS_DIR).join(&run_id).join(ITERATIONS_DIR))
        .unwrap()
        .collect();
    assert_eq!(transcripts.len(), 1);

    let status = get_run_status(h.dir.path(), &run_id).unwrap();
    assert_eq!(status.latest_transcript, result.iterations[0].transcript_ref);
    let transcript = fs::read_to_string(h.dir.path().join(status.latest_transcript.unwrap())).unwrap();
    assert!(transcript.contains("# Iteration 1 Transcript"));
    assert!(transcript.contains("working on it"));
    assert!(transcript.contains("session.idle"));
}

#[test]
fn test_finalize_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let tracker = RunTracker::start(dir.path(), "finalize twice", 3).unwrap();

    assert!(tracker.finalize(RunState::Completed).unwrap());
    assert!(!tracker.finalize(RunState::Failed).unwrap());

    // Writes after finalize are dropped.
    tracker
        .record_event(&EngineEvent::LoopDescription {
            description: "late".into(),
        })
        .unwrap();

    let status = get_run_status(dir.path(), tracker.run_id()).unwrap();
    assert_eq!(status.session.status, RunState::Completed);
    assert_eq!(status.event_count, 0);
}

#[tokio::test]
async fn test_launch_failure_finalizes_failed() {
    struct FailingLauncher;

    #[async_trait::async_trait]
    impl phaseloop::runtime::RuntimeLauncher for FailingLauncher {
        async fn launch(&self) -> phaseloop::Result<phaseloop::runtime::RuntimeHandle> {
            Err(phaseloop::EngineError::Transport("server did not start".into()))
        }
    }

    let dir = TempDir::new().unwrap();
    let config = test_config(FailureStrategy::Skip, 0);
    let coordinator = phaseloop::session::build_coordinator(
        &config.engine,
        std::sync::Arc::new(phaseloop::answers::RecordedAnswers::default()),
        std::sync::Arc::new(phaseloop::output::BufferSink::new()),
    );
    let engine = phaseloop::runner::PhaseLoopEngine::new(
        config,
        dir.path(),
        std::sync::Arc::new(FailingLauncher),
        coordinator,
    );
    let mut source = ListSource::new(&["never"]);

    let err = engine.run(&mut source, &RunFlags::default()).await.unwrap_err();
    assert!(err.to_string().contains("server did not start"));
    assert_eq!(source.next_calls, 0);

    let status = get_run_status(dir.path(), "latest").unwrap();
    assert_eq!(status.session.status, RunState::Failed);
    assert_eq!(status.last_event_type.as_deref(), Some("loop.description"));
}

#[test]
fn test_status_for_unknown_run() {
    let dir = TempDir::new().unwrap();
    assert!(get_run_status(dir.path(), "latest").is_err());

    let tracker = RunTracker::start(dir.path(), "exists", 1).unwrap();
    assert!(get_run_status(dir.path(), "0-ffff").is_err());
    assert_eq!(get_run_status(dir.path(), "latest").unwrap().run_id, tracker.run_id());
}

#[tokio::test]
async fn test_retried_slot_keeps_every_attempt_transcript() {
    let runtime = MockRuntime::with_scripts([
        SessionScript::new().text("FIRST ATTEMPT").idle(),
        SessionScript::completing("complete", None),
    ]);
    let h = harness(test_config(FailureStrategy::Retry, 1), runtime);
    let mut source = ListSource::new(&["flaky"]);

    let result = h.engine.run(&mut source, &RunFlags::default()).await.unwrap();

    assert_eq!(result.iterations.len(), 2);
    let first = result.iterations[0].transcript_ref.clone().unwrap();
    let retry = result.iterations[1].transcript_ref.clone().unwrap();
    assert_ne!(first, retry);
    assert!(first.ends_with("001-flaky.log"));
    assert!(retry.ends_with("001-flaky-retry1.log"));

    let first_text = fs::read_to_string(h.dir.path().join(&first)).unwrap();
    assert!(first_text.contains("FIRST ATTEMPT"));
    let retry_text = fs::read_to_string(h.dir.path().join(&retry)).unwrap();
    assert!(retry_text.contains("working on it"));
    assert!(!retry_text.contains("FIRST ATTEMPT"));

    let status = get_run_status(h.dir.path(), "latest").unwrap();
    assert_eq!(status.latest_transcript, Some(retry));
}
