//! Work items handed from a work source to a session coordinator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Provider/model selector sent with every prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Parse `provider/model`. Only the first slash separates the two halves,
    /// so model ids may themselves contain slashes.
    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Ok(Self::new(provider, model)),
            _ => Err(EngineError::Config(format!(
                "Invalid model format \"{}\": expected \"provider/model\" (e.g. \"anthropic/claude-sonnet-4-6\")",
                value
            ))),
        }
    }
}

impl FromStr for ModelRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

/// One unit of work, produced fresh each iteration by a work source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub prompt: String,
    pub model: ModelRef,
    /// Title given to the agent-runtime session
    pub session_label: String,
    /// Human label used in events, transcripts and retry bookkeeping
    pub iteration_label: String,
    pub system_prompt: Option<String>,
    /// External reference (task id) when the source has one
    pub work_ref: Option<String>,
}

impl WorkItem {
    pub fn new(prompt: impl Into<String>, model: ModelRef, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            prompt: prompt.into(),
            model,
            session_label: label.clone(),
            iteration_label: label,
            system_prompt: None,
            work_ref: None,
        }
    }

    pub fn with_session_label(mut self, title: impl Into<String>) -> Self {
        self.session_label = title.into();
        self
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_work_ref(mut self, work_ref: impl Into<String>) -> Self {
        self.work_ref = Some(work_ref.into());
        self
    }

    /// Reference recorded in outcomes; falls back to `iter-N`.
    pub fn work_ref_or(&self, iteration: u32) -> String {
        self.work_ref.clone().unwrap_or_else(|| format!("iter-{}", iteration))
    }
}
