use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use phaseloop::answers::{AnswerSource, InteractiveAnswers, RecordedAnswers};
use phaseloop::config::Config;
use phaseloop::events::attach_console_renderer;
use phaseloop::output::{OutputSink, StdoutSink};
use phaseloop::phases::{PromptLoopSource, TaskFileSource};
use phaseloop::runner::{PhaseLoopEngine, RunFlags, WorkSource};
use phaseloop::runtime::{
    AgentRuntime, AttachLauncher, HttpRuntime, RuntimeLauncher, SpawnLauncher, check_broken_symlinks,
    runtime_config_dir,
};
use phaseloop::session::build_coordinator;
use phaseloop::storage::{RunState, format_duration, get_run_status};

mod cli;

use cli::{Cli, Commands, PhaseArgs};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("phaseloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("phaseloop.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn project_dir(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("Failed to determine current directory"),
    }
}

/// Returns the process exit code.
async fn run_application(cli: &Cli) -> Result<i32> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run { tasks, phase } => {
            let project = project_dir(phase.project.as_ref())?;
            let mut source = TaskFileSource::new(tasks, &project, phase.model.clone());
            handle_phase_command(cli, phase, &project, &mut source).await
        }
        Commands::Refine { prompt, label, phase } => {
            let project = project_dir(phase.project.as_ref())?;
            let mut source =
                PromptLoopSource::new(prompt, &project, label.as_str()).with_model_override(phase.model.clone());
            handle_phase_command(cli, phase, &project, &mut source).await
        }
        Commands::Status { run, project } => {
            let project = project_dir(project.as_ref())?;
            handle_status_command(&project, run)
        }
        Commands::Doctor { fix } => handle_doctor_command(cli, *fix).await,
    }
}

async fn handle_phase_command(
    cli: &Cli,
    phase: &PhaseArgs,
    project: &Path,
    source: &mut dyn WorkSource,
) -> Result<i32> {
    let config = Config::load(cli.config.as_ref(), project).context("Failed to load configuration")?;

    let output: Arc<dyn OutputSink> = Arc::new(StdoutSink);
    let answers: Arc<dyn AnswerSource> = match &phase.answers {
        Some(path) => Arc::new(RecordedAnswers::load(path).context("Failed to load answers")?),
        None => Arc::new(InteractiveAnswers::stdio()),
    };
    let launcher: Arc<dyn RuntimeLauncher> = match &phase.attach {
        Some(url) => Arc::new(AttachLauncher::new(url)),
        None => Arc::new(SpawnLauncher::new(&config.runtime.command, config.runtime.startup_timeout())),
    };
    let coordinator = build_coordinator(&config.engine, answers, Arc::clone(&output));

    let flags = RunFlags {
        dry_run: phase.dry_run,
        max_iterations: phase.max_iterations,
    };
    let engine = PhaseLoopEngine::new(config, project, launcher, coordinator);
    let _console = attach_console_renderer(engine.bus(), output);

    let result = engine.run(source, &flags).await.context("Phase loop failed")?;
    if let Some(run_id) = &result.run_id {
        println!("Run: {}", run_id.cyan());
    }
    Ok(if result.has_failures() { 1 } else { 0 })
}

fn handle_status_command(project: &Path, run: &str) -> Result<i32> {
    let status = get_run_status(project, run).context("Failed to read run status")?;
    let session = &status.session;

    let state = match session.status {
        RunState::Running => session.status.to_string().yellow(),
        RunState::Completed => session.status.to_string().green(),
        RunState::Failed => session.status.to_string().red(),
    };
    println!("{} {}", "Run:".bold(), status.run_id);
    println!("Status: {}", state);
    println!("Description: {}", session.description);
    println!("Iteration: {}/{}", session.current_iteration, session.max_iterations);
    println!(
        "Completed: {}, Failed: {}, Skipped: {}",
        session.completed, session.failed, session.skipped
    );
    println!("Started: {}", session.started_at);
    println!("Updated: {}", session.updated_at);
    match (&status.last_event_type, &status.last_event_timestamp) {
        (Some(kind), Some(ts)) => println!("Events: {} (last: {} at {})", status.event_count, kind, ts),
        _ => println!("Events: {}", status.event_count),
    }
    if let Some(transcript) = &status.latest_transcript {
        println!("Latest transcript: {}", transcript);
    }
    Ok(0)
}

async fn handle_doctor_command(cli: &Cli, fix: bool) -> Result<i32> {
    let project = project_dir(None)?;
    let mut problems = 0;

    let config = match Config::load(cli.config.as_ref(), &project) {
        Ok(config) => {
            println!("{} configuration loaded", "✓".green());
            config
        }
        Err(e) => {
            println!("{} configuration: {:#}", "✗".red(), e);
            problems += 1;
            Config::default()
        }
    };
    if cli.is_verbose() {
        println!(
            "  engine: timeout {}m, strategy {:?}, max retries {}",
            config.engine.timeout_minutes, config.engine.strategy, config.engine.max_retries
        );
        println!("  iteration delay: {}", format_duration(config.engine.iteration_delay_ms));
    }

    match runtime_config_dir() {
        Some(root) => {
            let broken = check_broken_symlinks(&root, fix);
            if broken.is_empty() {
                println!("{} no broken symlinks under {}", "✓".green(), root.display());
            }
            for path in &broken {
                if fix {
                    println!("{} removed broken symlink {}", "⚠".yellow(), path.display());
                } else {
                    println!("{} broken symlink {}", "✗".red(), path.display());
                    problems += 1;
                }
            }
        }
        None => println!("{} no home directory, skipping symlink check", "⚠".yellow()),
    }

    let url = &config.runtime.url;
    match HttpRuntime::new(url.clone()) {
        Ok(runtime) => match runtime.health().await {
            Ok(()) => println!("{} runtime reachable at {}", "✓".green(), url),
            Err(e) => println!("{} runtime not reachable at {}: {}", "⚠".yellow(), url, e),
        },
        Err(e) => {
            println!("{} invalid runtime url {}: {}", "✗".red(), url, e);
            problems += 1;
        }
    }

    Ok(if problems > 0 { 1 } else { 0 })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    info!("Starting with config from: {:?}", cli.config);

    let code = run_application(&cli).await.context("Application failed")?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
