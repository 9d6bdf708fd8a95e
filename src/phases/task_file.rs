//! Task-file work source.
//!
//! ```yaml
//! tasks:
//!   - id: T-1
//!     title: Add login endpoint
//!     prompt: Implement POST /login ...
//!     labels: [area:backend]
//! ```
//!
//! A bare top-level list of tasks is accepted as well.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::info;
use serde::Deserialize;

use super::{system_prompt, with_recent_progress};
use crate::config::Config;
use crate::domain::{CompletionResult, CompletionStatus, WorkItem};
use crate::error::{EngineError, Result};
use crate::runner::{PhaseSetup, WorkSource};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// `provider/model`, overrides label-based resolution
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    Wrapped { tasks: Vec<TaskSpec> },
    List(Vec<TaskSpec>),
}

pub fn load_tasks(path: &Path) -> Result<Vec<TaskSpec>> {
    let content = fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("Failed to read task file {}: {}", path.display(), e)))?;
    let file: TaskFile = serde_yaml::from_str(&content)
        .map_err(|e| EngineError::Config(format!("Failed to parse task file {}: {}", path.display(), e)))?;
    let tasks = match file {
        TaskFile::Wrapped { tasks } | TaskFile::List(tasks) => tasks,
    };
    Ok(tasks)
}

pub struct TaskFileSource {
    path: PathBuf,
    project_dir: PathBuf,
    model_override: Option<String>,
    queue: VecDeque<TaskSpec>,
}

impl TaskFileSource {
    pub fn new(path: impl Into<PathBuf>, project_dir: impl Into<PathBuf>, model_override: Option<String>) -> Self {
        Self {
            path: path.into(),
            project_dir: project_dir.into(),
            model_override,
            queue: VecDeque::new(),
        }
    }

    /// Tasks not yet handed out.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl WorkSource for TaskFileSource {
    async fn setup(&mut self, config: &Config, _dry_run: bool) -> Result<PhaseSetup> {
        let tasks = load_tasks(&self.path)?;
        // Fail on a bad model before any session is started.
        for task in &tasks {
            config
                .models
                .resolve(self.model_override.as_deref().or(task.model.as_deref()), &task.labels)?;
        }
        let count = tasks.len() as u32;
        self.queue = tasks.into();
        Ok(PhaseSetup::new(
            count,
            format!("Task loop for {}: {} task(s)", self.path.display(), count),
        ))
    }

    async fn next_iteration(&mut self, config: &Config, iteration: u32) -> Result<Option<WorkItem>> {
        let Some(task) = self.queue.pop_front() else {
            info!("No tasks left at iteration {}", iteration);
            return Ok(None);
        };
        let model = config
            .models
            .resolve(self.model_override.as_deref().or(task.model.as_deref()), &task.labels)?;
        let role = task.system.clone().unwrap_or_else(|| {
            "You are an autonomous coding agent working through a task list. Implement the assigned task completely."
                .to_string()
        });

        let item = WorkItem::new(
            with_recent_progress(&task.prompt, &self.project_dir),
            model,
            format!("{}: {}", task.id, task.title),
        )
        .with_session_label(format!("Task {} - {}", task.id, task.title))
        .with_system_prompt(system_prompt(&role))
        .with_work_ref(task.id);
        Ok(Some(item))
    }

    async fn handle_result(&mut self, result: &CompletionResult, _iteration: u32) -> Result<bool> {
        Ok(result.status != CompletionStatus::PhaseDone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelRef;
    use tempfile::TempDir;

    const TASKS: &str = r#"
tasks:
  - id: T-1
    title: Add login
    prompt: Implement login.
    labels: [area:backend]
  - id: T-2
    title: Style page
    prompt: Make it pretty.
    model: openai/gpt-5
"#;

    fn source(dir: &TempDir, yaml: &str, model: Option<&str>) -> TaskFileSource {
        let path = dir.path().join("tasks.yml");
        fs::write(&path, yaml).unwrap();
        TaskFileSource::new(path, dir.path(), model.map(str::to_string))
    }

    #[tokio::test]
    async fn test_tasks_are_handed_out_in_order() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.models.areas.insert("backend".into(), "anthropic/claude-opus-4-1".into());
        let mut source = source(&dir, TASKS, None);

        let setup = source.setup(&config, false).await.unwrap();
        assert_eq!(setup.max_iterations, 2);

        let first = source.next_iteration(&config, 1).await.unwrap().unwrap();
        assert_eq!(first.iteration_label, "T-1: Add login");
        assert_eq!(first.session_label, "Task T-1 - Add login");
        assert_eq!(first.work_ref.as_deref(), Some("T-1"));
        assert_eq!(first.model, ModelRef::new("anthropic", "claude-opus-4-1"));
        assert!(first.system_prompt.unwrap().contains("task_complete"));

        let second = source.next_iteration(&config, 2).await.unwrap().unwrap();
        assert_eq!(second.model, ModelRef::new("openai", "gpt-5"));
        assert!(source.next_iteration(&config, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cli_model_wins() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let mut source = source(&dir, TASKS, Some("x/y"));
        source.setup(&config, true).await.unwrap();
        source.next_iteration(&config, 1).await.unwrap();
        let second = source.next_iteration(&config, 2).await.unwrap().unwrap();
        assert_eq!(second.model, ModelRef::new("x", "y"));
    }

    #[tokio::test]
    async fn test_bare_list_and_bad_model() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let mut ok = source(&dir, "- {id: a, title: A, prompt: p}\n", None);
        assert_eq!(ok.setup(&config, false).await.unwrap().max_iterations, 1);

        let mut bad = source(&dir, "- {id: a, title: A, prompt: p, model: nope}\n", None);
        assert!(matches!(bad.setup(&config, false).await, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut source = TaskFileSource::new(dir.path().join("absent.yml"), dir.path(), None);
        assert!(matches!(source.setup(&Config::default(), false).await, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_handle_result_stops_on_phase_done() {
        let dir = TempDir::new().unwrap();
        let mut source = source(&dir, TASKS, None);
        let done = CompletionResult::new(CompletionStatus::PhaseDone, None);
        let failed = CompletionResult::new(CompletionStatus::Failed, None);
        assert!(!source.handle_result(&done, 1).await.unwrap());
        assert!(source.handle_result(&failed, 1).await.unwrap());
    }
}
