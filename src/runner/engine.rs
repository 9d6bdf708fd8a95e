//! Phase loop engine - the top-level iteration driver.
//!
//! For each iteration the engine asks the work source for an item, drives it
//! through a session coordinator under the wall-clock timeout, records the
//! outcome and applies the configured failure strategy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::time::Instant;

use super::source::WorkSource;
use crate::capture::{SharedCapture, StreamCapture};
use crate::config::{Config, FailureStrategy};
use crate::domain::{
    CompletionResult, CompletionStatus, EngineEvent, FailureAction, IterationOutcome, LoopResult, WorkItem,
};
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::runtime::{AgentRuntime, PromptRequest, RuntimeLauncher};
use crate::session::{PromptResult, SessionCoordinator, abort_quietly, with_capture};
use crate::storage::{FinalizeGuard, RunState, RunTracker, append_progress};
use crate::timeout::with_timeout;

/// Per-invocation switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Enumerate work items without contacting the runtime
    pub dry_run: bool,
    /// Overrides the bound returned by the work source
    pub max_iterations: Option<u32>,
}

/// What the strategy decided for a failed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureDecision {
    Retry { attempt: u32 },
    Skip,
    Abort,
}

/// Counters of the loop in progress.
#[derive(Debug, Default)]
struct LoopState {
    iteration: u32,
    completed: u32,
    failed: u32,
    skipped: u32,
    aborted: bool,
    retries: HashMap<String, u32>,
    outcomes: Vec<IterationOutcome>,
}

pub struct PhaseLoopEngine {
    config: Config,
    project_dir: PathBuf,
    launcher: Arc<dyn RuntimeLauncher>,
    coordinator: Box<dyn SessionCoordinator>,
    bus: EventBus,
}

impl PhaseLoopEngine {
    pub fn new(
        config: Config,
        project_dir: impl Into<PathBuf>,
        launcher: Arc<dyn RuntimeLauncher>,
        coordinator: Box<dyn SessionCoordinator>,
    ) -> Self {
        Self {
            config,
            project_dir: project_dir.into(),
            launcher,
            coordinator,
            bus: EventBus::new(),
        }
    }

    /// Bus every lifecycle event is published on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the phase driven by `source` to completion.
    ///
    /// Setup, launch and work-source errors end the run with `Err`; errors
    /// inside an iteration are recorded and handed to the failure strategy.
    pub async fn run(&self, source: &mut dyn WorkSource, flags: &RunFlags) -> Result<LoopResult> {
        let setup = source.setup(&self.config, flags.dry_run).await?;
        let max_iterations = flags.max_iterations.unwrap_or(setup.max_iterations);
        info!("Phase setup: {} (max {} iterations)", setup.description, max_iterations);

        if flags.dry_run {
            self.bus.emit(&EngineEvent::LoopDescription {
                description: setup.description,
            });
            return self.dry_run(source, max_iterations).await;
        }

        let tracker = Arc::new(RunTracker::start(&self.project_dir, &setup.description, max_iterations)?);
        let _guard = FinalizeGuard::new(Arc::clone(&tracker));
        let subscription = tracker.attach(&self.bus);
        info!("Run {} started in {}", tracker.run_id(), tracker.run_dir().display());

        self.bus.emit(&EngineEvent::LoopDescription {
            description: setup.description,
        });

        let mut handle = match self.launcher.launch().await {
            Ok(handle) => handle,
            Err(e) => {
                subscription.unsubscribe();
                return Err(e);
            }
        };
        if handle.attached {
            self.bus.emit(&EngineEvent::ServerAttached { url: handle.url.clone() });
        } else {
            self.bus.emit(&EngineEvent::ServerStarted { url: handle.url.clone() });
            self.bus.emit(&EngineEvent::ServerAttachHint { url: handle.url.clone() });
        }

        let started = Instant::now();
        let state = self
            .iterate(source, handle.client.as_ref(), &tracker, max_iterations)
            .await;
        handle.close();
        let state = match state {
            Ok(state) => state,
            Err(e) => {
                subscription.unsubscribe();
                return Err(e);
            }
        };

        let total_time_ms = started.elapsed().as_millis() as u64;
        self.bus.emit(&EngineEvent::LoopCompleted {
            completed: state.completed,
            failed: state.failed,
            skipped: state.skipped,
            total_time_ms,
        });

        let final_state = if state.aborted { RunState::Failed } else { RunState::Completed };
        tracker.finalize(final_state)?;
        subscription.unsubscribe();

        Ok(LoopResult {
            completed: state.completed,
            failed: state.failed,
            skipped: state.skipped,
            total_time_ms,
            max_iterations,
            iterations: state.outcomes,
            run_id: Some(tracker.run_id().to_string()),
        })
    }

    async fn dry_run(&self, source: &mut dyn WorkSource, max_iterations: u32) -> Result<LoopResult> {
        let mut iteration = 0;
        while iteration < max_iterations {
            let Some(item) = source.next_iteration(&self.config, iteration + 1).await? else {
                break;
            };
            iteration += 1;
            self.bus.emit(&EngineEvent::DryRunIteration {
                iteration,
                label: item.iteration_label,
                model: item.model.to_string(),
            });
        }
        self.bus.emit(&EngineEvent::DryRunComplete {
            iterations: iteration,
            max_iterations,
        });
        Ok(LoopResult {
            max_iterations,
            ..LoopResult::default()
        })
    }

    async fn iterate(
        &self,
        source: &mut dyn WorkSource,
        runtime: &dyn AgentRuntime,
        tracker: &RunTracker,
        max_iterations: u32,
    ) -> Result<LoopState> {
        let engine = &self.config.engine;
        let mut state = LoopState::default();
        // Item to re-dispatch and the retry number it is on.
        let mut pending_retry: Option<(WorkItem, u32)> = None;

        while state.iteration < max_iterations {
            let (item, retry) = match pending_retry.take() {
                Some(pending) => pending,
                None => match source.next_iteration(&self.config, state.iteration + 1).await? {
                    Some(item) => (item, 0),
                    None => {
                        info!("Work source exhausted after {} iterations", state.iteration);
                        break;
                    }
                },
            };

            state.iteration += 1;
            let iteration = state.iteration;
            let label = item.iteration_label.clone();
            self.bus.emit(&EngineEvent::IterationStarted {
                iteration,
                label: label.clone(),
                model: item.model.to_string(),
            });

            let capture = StreamCapture::shared(engine.capture_max_chars);
            let iteration_start = Instant::now();
            let attempt = self.attempt(runtime, &item, iteration, &capture).await;
            let duration_ms = iteration_start.elapsed().as_millis() as u64;

            let transcript_ref = with_capture(&capture, |c| tracker.write_iteration_transcript(iteration, retry, &label, c))
                .unwrap_or_else(|e| {
                    warn!("Failed to write transcript for iteration {}: {}", iteration, e);
                    None
                });

            let (completion, result) = match attempt {
                Ok(result) => (result.completion.clone(), Some(result)),
                Err(e) => {
                    warn!("Iteration {} ({}) failed: {}", iteration, label, e);
                    self.bus.emit(&EngineEvent::IterationError {
                        iteration,
                        label: label.clone(),
                        error: e.to_string(),
                    });
                    (CompletionResult::from(&e), None)
                }
            };

            let outcome = build_outcome(&item, iteration, &completion, result.as_ref(), duration_ms, transcript_ref);
            self.bus.emit(&EngineEvent::IterationRecorded {
                outcome: outcome.clone(),
            });
            if let Err(e) = append_progress(&self.project_dir, &outcome) {
                warn!("Failed to append progress for iteration {}: {}", iteration, e);
            }
            state.outcomes.push(outcome);

            // Errors caught above never reach the work source.
            let keep_going = match result {
                Some(_) => source.handle_result(&completion, iteration).await?,
                None => true,
            };

            let status = completion.status;
            if status.is_success() {
                state.completed += 1;
                self.bus.emit(&EngineEvent::IterationCompleted {
                    iteration,
                    label: label.clone(),
                    status,
                    reason: completion.reason.clone(),
                });
            } else if status == CompletionStatus::Blocked {
                state.skipped += 1;
                self.bus.emit(&EngineEvent::IterationBlocked {
                    iteration,
                    label: label.clone(),
                    reason: completion.reason.clone(),
                });
            } else {
                match self.decide(&mut state.retries, &label) {
                    FailureDecision::Retry { attempt } => {
                        state.iteration -= 1;
                        self.bus.emit(&EngineEvent::IterationRetrying {
                            iteration,
                            label: label.clone(),
                            status,
                            attempt,
                            max_retries: engine.max_retries,
                        });
                        pending_retry = Some((item, attempt));
                    }
                    FailureDecision::Abort => {
                        state.failed += 1;
                        state.aborted = true;
                        self.bus.emit(&EngineEvent::IterationFailed {
                            iteration,
                            label,
                            status,
                            action: FailureAction::Aborting,
                        });
                        break;
                    }
                    FailureDecision::Skip => {
                        state.failed += 1;
                        self.bus.emit(&EngineEvent::IterationFailed {
                            iteration,
                            label,
                            status,
                            action: FailureAction::Skipping,
                        });
                    }
                }
            }

            if status == CompletionStatus::PhaseDone {
                info!("Phase reported done at iteration {}", iteration);
                break;
            }
            if !keep_going {
                info!("Work source stopped the loop after iteration {}", iteration);
                break;
            }

            let delay = engine.iteration_delay();
            if !delay.is_zero() {
                debug!("Sleeping {}ms before next iteration", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
        }

        Ok(state)
    }

    /// One iteration against the runtime: new session, coordinator under the
    /// wall-clock timeout, remote abort when that timeout fires.
    async fn attempt(
        &self,
        runtime: &dyn AgentRuntime,
        item: &WorkItem,
        iteration: u32,
        capture: &SharedCapture,
    ) -> Result<PromptResult> {
        let session_id = runtime.create_session(&item.session_label).await?;
        self.bus.emit(&EngineEvent::IterationSessionCreated {
            iteration,
            session_id: session_id.clone(),
        });

        let request = PromptRequest {
            session_id: session_id.clone(),
            model: item.model.clone(),
            prompt: item.prompt.clone(),
            system_prompt: item.system_prompt.clone(),
        };
        let engine = &self.config.engine;
        let result = with_timeout(
            self.coordinator.run(runtime, &request, capture),
            engine.timeout(),
            format!("Iteration timed out after {}m", engine.timeout_minutes),
        )
        .await;

        // Inactivity is aborted inside the coordinator.
        if let Err(EngineError::Timeout(_)) = &result {
            abort_quietly(runtime, &session_id).await;
        }
        result
    }

    fn decide(&self, retries: &mut HashMap<String, u32>, label: &str) -> FailureDecision {
        let engine = &self.config.engine;
        match engine.strategy {
            FailureStrategy::Retry => {
                let used = retries.entry(label.to_string()).or_insert(0);
                if *used < engine.max_retries {
                    *used += 1;
                    FailureDecision::Retry { attempt: *used }
                } else {
                    FailureDecision::Skip
                }
            }
            FailureStrategy::Skip => FailureDecision::Skip,
            FailureStrategy::Abort => FailureDecision::Abort,
        }
    }
}

fn build_outcome(
    item: &WorkItem,
    iteration: u32,
    completion: &CompletionResult,
    result: Option<&PromptResult>,
    duration_ms: u64,
    transcript_ref: Option<String>,
) -> IterationOutcome {
    IterationOutcome {
        iteration_number: iteration,
        work_ref: item.work_ref_or(iteration),
        label: item.iteration_label.clone(),
        status: completion.status,
        reason: completion.reason.clone(),
        model: item.model.to_string(),
        duration_ms,
        cost: result.and_then(|r| r.cost),
        tokens: result.and_then(|r| r.tokens),
        files_changed: result.map(|r| r.files_changed.clone()).filter(|f| !f.is_empty()),
        transcript_ref,
    }
}
