//! Phase loop runner
//!
//! - `PhaseLoopEngine`: drives iterations, applies the failure strategy
//! - `WorkSource`: the pluggable per-phase supplier of work items

mod engine;
mod source;

pub use engine::{PhaseLoopEngine, RunFlags};
pub use source::{PhaseSetup, WorkSource};
