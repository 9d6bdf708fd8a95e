//! Domain types for phaseloop
//!
//! This module contains the value types that flow through a run:
//! - WorkItem: one unit of work handed to a session coordinator
//! - CompletionStatus / CompletionResult: how an agent turn ended
//! - IterationOutcome / LoopResult: the per-iteration and per-run records
//! - EngineEvent: lifecycle notifications broadcast on the event bus

pub mod completion;
pub mod event;
pub mod outcome;
pub mod work_item;

pub use completion::{CompletionResult, CompletionStatus};
pub use event::{EngineEvent, FailureAction};
pub use outcome::{IterationOutcome, LoopResult, TokenUsage};
pub use work_item::{ModelRef, WorkItem};
