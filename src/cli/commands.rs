//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: work through a YAML task file
//! - refine: repeat one prompt until the agent reports the phase done
//! - status: inspect a persisted run
//! - doctor: check config and runtime health

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use phaseloop::storage::LATEST;

/// Phaseloop - drives coding-agent sessions through repeated iterations
#[derive(Parser, Debug)]
#[command(name = "phaseloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Flags shared by every phase
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseArgs {
    /// List the work items without starting any session
    #[arg(long)]
    pub dry_run: bool,

    /// Override the phase's iteration bound
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Model for every iteration (provider/model)
    #[arg(long)]
    pub model: Option<String>,

    /// Attach to a running runtime server instead of starting one
    #[arg(long, value_name = "URL")]
    pub attach: Option<String>,

    /// Answer agent questions from a recorded answers file
    #[arg(long, value_name = "FILE")]
    pub answers: Option<PathBuf>,

    /// Project directory (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    pub project: Option<PathBuf>,
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Work through a YAML task file, one task per iteration
    Run {
        /// Task file
        #[arg(long, value_name = "FILE")]
        tasks: PathBuf,

        #[command(flatten)]
        phase: PhaseArgs,
    },

    /// Repeat a prompt until the agent reports the phase done
    Refine {
        /// Prompt file, re-read every iteration
        #[arg(long, value_name = "FILE")]
        prompt: PathBuf,

        /// Label used in sessions and transcripts
        #[arg(long, default_value = "refine")]
        label: String,

        #[command(flatten)]
        phase: PhaseArgs,
    },

    /// Show the status of a run
    Status {
        /// Run id, or "latest"
        #[arg(default_value = LATEST)]
        run: String,

        /// Project directory (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,
    },

    /// Check configuration and runtime health
    Doctor {
        /// Remove broken runtime config symlinks
        #[arg(long)]
        fix: bool,
    },
}
