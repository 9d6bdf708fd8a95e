//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use phaseloop::answers::{AnswerSource, RecordedAnswers};
use phaseloop::config::{Config, FailureStrategy};
use phaseloop::domain::{CompletionResult, ModelRef, WorkItem};
use phaseloop::error::Result;
use phaseloop::output::BufferSink;
use phaseloop::runner::{PhaseLoopEngine, PhaseSetup, WorkSource};
use phaseloop::runtime::{MockLauncher, MockRuntime};
use phaseloop::session::StreamingCoordinator;
use tempfile::TempDir;

/// Hands out a fixed list of labels and counts how often it was asked.
pub struct ListSource {
    pub labels: Vec<String>,
    pub max_iterations: u32,
    pub next_calls: u32,
    pub results: Vec<CompletionResult>,
}

impl ListSource {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            max_iterations: 10,
            next_calls: 0,
            results: Vec::new(),
        }
    }
}

#[async_trait]
impl WorkSource for ListSource {
    async fn setup(&mut self, _config: &Config, _dry_run: bool) -> Result<PhaseSetup> {
        Ok(PhaseSetup::new(self.max_iterations, format!("{} scripted item(s)", self.labels.len())))
    }

    async fn next_iteration(&mut self, _config: &Config, _iteration: u32) -> Result<Option<WorkItem>> {
        let item = self.labels.get(self.next_calls as usize).map(|label| {
            WorkItem::new(format!("Please do {}", label), ModelRef::new("anthropic", "claude-test"), label.clone())
                .with_work_ref(label.clone())
        });
        self.next_calls += 1;
        Ok(item)
    }

    async fn handle_result(&mut self, result: &CompletionResult, _iteration: u32) -> Result<bool> {
        self.results.push(result.clone());
        Ok(true)
    }
}

pub fn test_config(strategy: FailureStrategy, max_retries: u32) -> Config {
    let mut config = Config::default();
    config.engine.iteration_delay_ms = 0;
    config.engine.strategy = strategy;
    config.engine.max_retries = max_retries;
    config
}

pub struct Harness {
    pub dir: TempDir,
    pub runtime: Arc<MockRuntime>,
    pub launcher: Arc<MockLauncher>,
    pub output: Arc<BufferSink>,
    pub engine: PhaseLoopEngine,
}

pub fn harness(config: Config, runtime: MockRuntime) -> Harness {
    harness_with(config, runtime, Arc::new(RecordedAnswers::default()), false)
}

pub fn harness_with(
    config: Config,
    runtime: MockRuntime,
    answers: Arc<dyn AnswerSource>,
    attached: bool,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let runtime = Arc::new(runtime);
    let launcher = Arc::new(if attached {
        MockLauncher::attached(runtime.clone())
    } else {
        MockLauncher::owned(runtime.clone())
    });
    let output = Arc::new(BufferSink::new());
    let coordinator = StreamingCoordinator::new(&config.engine, answers, output.clone());
    let engine = PhaseLoopEngine::new(config, dir.path(), launcher.clone(), Box::new(coordinator));
    Harness {
        dir,
        runtime,
        launcher,
        output,
        engine,
    }
}
