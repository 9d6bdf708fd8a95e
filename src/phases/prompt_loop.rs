//! Repeat-prompt work source for refinement passes.
//!
//! The prompt file is re-read every iteration so it can be edited while the
//! loop runs. The loop continues only while the agent reports `complete`.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use log::info;

use super::{system_prompt, with_recent_progress};
use crate::config::Config;
use crate::domain::{CompletionResult, CompletionStatus, ModelRef, WorkItem};
use crate::error::{EngineError, Result};
use crate::runner::{PhaseSetup, WorkSource};

const DEFAULT_MAX_ITERATIONS: u32 = 20;

pub struct PromptLoopSource {
    prompt_path: PathBuf,
    project_dir: PathBuf,
    label: String,
    model_override: Option<String>,
    model: Option<ModelRef>,
}

impl PromptLoopSource {
    pub fn new(prompt_path: impl Into<PathBuf>, project_dir: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            prompt_path: prompt_path.into(),
            project_dir: project_dir.into(),
            label: label.into(),
            model_override: None,
            model: None,
        }
    }

    pub fn with_model_override(mut self, model: Option<String>) -> Self {
        self.model_override = model;
        self
    }

    fn read_prompt(&self) -> Result<String> {
        fs::read_to_string(&self.prompt_path).map_err(|e| {
            EngineError::Config(format!("Failed to read prompt file {}: {}", self.prompt_path.display(), e))
        })
    }
}

#[async_trait]
impl WorkSource for PromptLoopSource {
    async fn setup(&mut self, config: &Config, _dry_run: bool) -> Result<PhaseSetup> {
        self.read_prompt()?;
        self.model = Some(config.models.resolve(self.model_override.as_deref(), &[])?);
        Ok(PhaseSetup::new(
            DEFAULT_MAX_ITERATIONS,
            format!("Refine loop '{}' with {}", self.label, self.prompt_path.display()),
        ))
    }

    async fn next_iteration(&mut self, config: &Config, iteration: u32) -> Result<Option<WorkItem>> {
        let model = match &self.model {
            Some(model) => model.clone(),
            None => config.models.resolve(self.model_override.as_deref(), &[])?,
        };
        let prompt = with_recent_progress(&self.read_prompt()?, &self.project_dir);
        let role = "You are an autonomous agent refining a document. Improve it in place each pass.";

        Ok(Some(
            WorkItem::new(prompt, model, format!("{} iteration {}", self.label, iteration))
                .with_session_label(format!("Refine: {} #{}", self.label, iteration))
                .with_system_prompt(system_prompt(role)),
        ))
    }

    async fn handle_result(&mut self, result: &CompletionResult, iteration: u32) -> Result<bool> {
        if result.status == CompletionStatus::PhaseDone {
            info!("'{}' reported done after {} iteration(s)", self.label, iteration);
        }
        Ok(result.status == CompletionStatus::Complete)
    }
}
