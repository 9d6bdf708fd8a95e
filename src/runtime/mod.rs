//! Agent runtime integration
//!
//! - `client`: the `AgentRuntime` trait every coordinator talks to
//! - `http`: OpenCode-compatible HTTP + SSE implementation
//! - `launcher`: spawning or attaching to a runtime server
//! - `mock`: scripted runtime for tests
//! - `types`: wire types (stream events, messages, questions)

pub mod client;
pub mod http;
pub mod launcher;
pub mod mock;
pub mod types;

pub use client::{AgentRuntime, EventStream};
pub use http::HttpRuntime;
pub use launcher::{
    AttachLauncher, RuntimeHandle, RuntimeLauncher, ServerGuard, SpawnLauncher, check_broken_symlinks,
    runtime_config_dir,
};
pub use mock::{MockLauncher, MockRuntime, SessionScript};
pub use types::{
    COMPLETION_TOOL, FileDiff, MessagePart, PromptRequest, QuestionInfo, QuestionOption, RuntimeEnvelope,
    RuntimeEvent, SessionActivity, SessionMessage,
};
