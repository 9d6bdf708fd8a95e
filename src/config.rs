//! Configuration for phaseloop
//!
//! YAML, kebab-case keys. Lookup order: explicit path, then
//! `.phaseloop/config.yml` in the project, then
//! `<config_dir>/phaseloop/config.yml`, then built-in defaults.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::capture::DEFAULT_MAX_CAPTURE_CHARS;
use crate::domain::ModelRef;
use crate::error::EngineError;
use crate::storage::{CONFIG_FILE, STATE_DIR};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub runtime: RuntimeConfig,
    pub models: ModelsConfig,
}

/// What to do with an iteration that ends in a failure status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStrategy {
    #[default]
    Retry,
    Skip,
    Abort,
}

/// Which session coordinator drives each agent turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorKind {
    #[default]
    Stream,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock limit per iteration
    #[serde(rename = "timeout-minutes")]
    pub timeout_minutes: u64,

    /// Longest allowed gap between stream events
    #[serde(rename = "inactivity-timeout-seconds")]
    pub inactivity_timeout_seconds: u64,

    #[serde(rename = "iteration-delay-ms")]
    pub iteration_delay_ms: u64,

    pub strategy: FailureStrategy,

    /// Retries per iteration label when `strategy` is `retry`
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Watchdog tick of the coordinators
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    #[serde(rename = "heartbeat-interval-ms")]
    pub heartbeat_interval_ms: u64,

    /// Retained size of each capture buffer, in characters
    #[serde(rename = "capture-max-chars")]
    pub capture_max_chars: usize,

    pub coordinator: CoordinatorKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            inactivity_timeout_seconds: 180,
            iteration_delay_ms: 2000,
            strategy: FailureStrategy::Retry,
            max_retries: 3,
            poll_interval_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            capture_max_chars: DEFAULT_MAX_CAPTURE_CHARS,
            coordinator: CoordinatorKind::Stream,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_seconds)
    }

    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Server checked by `doctor` and used when attaching without a URL
    pub url: String,

    /// Executable started with `serve` when not attaching
    pub command: String,

    #[serde(rename = "startup-timeout-seconds")]
    pub startup_timeout_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:4096".to_string(),
            command: "opencode".to_string(),
            startup_timeout_seconds: 15,
        }
    }
}

impl RuntimeConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// `provider/model` used when nothing more specific applies
    pub default: String,

    /// Area name (from an `area:<name>` label) to `provider/model`
    pub areas: HashMap<String, String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: "anthropic/claude-sonnet-4-6".to_string(),
            areas: HashMap::new(),
        }
    }
}

impl ModelsConfig {
    /// Pick a model: CLI override, then the first `area:` label that has a
    /// mapping, then the default.
    pub fn resolve(&self, cli_override: Option<&str>, labels: &[String]) -> std::result::Result<ModelRef, EngineError> {
        if let Some(model) = cli_override {
            return ModelRef::parse(model);
        }
        let area_model = labels
            .iter()
            .find_map(|label| label.strip_prefix("area:"))
            .and_then(|area| self.areas.get(area));
        ModelRef::parse(area_model.unwrap_or(&self.default))
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>, project_dir: &Path) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = project_dir.join(STATE_DIR).join(CONFIG_FILE);
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => return Ok(config),
                Err(e) => log::warn!("Failed to load {}: {}", project_config.display(), e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(env!("CARGO_PKG_NAME")).join(CONFIG_FILE);
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => log::warn!("Failed to load {}: {}", user_config.display(), e),
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.timeout_minutes == 0 {
            eyre::bail!("engine.timeout-minutes must be > 0");
        }
        if engine.inactivity_timeout_seconds == 0 {
            eyre::bail!("engine.inactivity-timeout-seconds must be > 0");
        }
        if engine.poll_interval_ms == 0 {
            eyre::bail!("engine.poll-interval-ms must be > 0");
        }
        if engine.heartbeat_interval_ms == 0 {
            eyre::bail!("engine.heartbeat-interval-ms must be > 0");
        }
        if self.runtime.startup_timeout_seconds == 0 {
            eyre::bail!("runtime.startup-timeout-seconds must be > 0");
        }
        ModelRef::parse(&self.models.default).context("models.default")?;
        for (area, model) in &self.models.areas {
            ModelRef::parse(model).context(format!("models.areas.{}", area))?;
        }
        Ok(())
    }
}
