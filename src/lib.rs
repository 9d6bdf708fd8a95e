//! Phaseloop - drives coding-agent sessions through repeated iterations
//!
//! Each iteration hands one work item to a fresh agent session, watches the
//! session's event stream until the agent goes idle, classifies how the turn
//! ended and records the outcome before moving on.

pub mod answers;
pub mod capture;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod id;
pub mod output;
pub mod phases;
pub mod runner;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod timeout;

pub use error::{EngineError, Result};
