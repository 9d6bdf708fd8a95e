//! CLI module for phaseloop - command-line interface and subcommands.

pub mod commands;

pub use commands::{Cli, Commands, PhaseArgs};
