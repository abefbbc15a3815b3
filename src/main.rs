mod agent;
mod config;
mod logging;
mod tools;
mod types;
mod ui;

use std::{
    io,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossterm::style::Stylize;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use agent::{
    orchestrator::Orchestrator,
    provider::{OpenAiProvider, ResponseGenerator},
};
use config::Settings;
use tools::{
    environment,
    runner::{CommandExecutor, ExecutionPolicy, SystemRunner},
};
use types::RunStatus;

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: i32 = 130;

/// Turn a plain-language request into an ffmpeg command and run it.
#[derive(Debug, Parser)]
#[command(name = "toast", version, about)]
struct Cli {
    /// What to do, e.g. "convert clip.mov to gif, 12.5fps, max 5mb"
    #[arg(required = true, num_args = 1.., value_name = "QUERY")]
    query: Vec<String>,

    /// Show the generated command without running it
    #[arg(long)]
    dry_run: bool,

    /// Input file to use instead of guessing from the request
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Ask before each command is executed
    #[arg(long)]
    confirm: bool,

    /// Model identifier, overriding config and environment
    #[arg(long, value_name = "ID")]
    model: Option<String>,

    /// Debug-level logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match Settings::load(cli.model.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    logging::init(&settings, cli.verbose);
    info!(model = %settings.model, "configuration loaded");

    let pipeline = tokio::task::spawn_blocking(move || run(&cli, &settings));

    let Some(joined) = until_interrupted(pipeline, tokio::signal::ctrl_c()).await else {
        eprintln!("\n{}", RunStatus::Cancelled.to_string().dark_yellow());
        // The blocking task may be waiting on ffmpeg; leave without joining it.
        std::process::exit(EXIT_INTERRUPTED);
    };

    match joined {
        Ok(Ok(status)) => {
            ui::format::print_status(&status);
            ExitCode::from(status.exit_code())
        }
        Ok(Err(err)) => {
            error!("run aborted: {err:#}");
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(EXIT_FAILURE)
        }
        Err(join_err) => {
            error!("pipeline task panicked: {join_err}");
            eprintln!("{} unexpected internal failure: {join_err}", "error:".red().bold());
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Waits for the pipeline unless `interrupt` fires first, in which case `None`.
/// A signal listener that fails to install is logged and then ignored.
async fn until_interrupted<T>(
    mut pipeline: JoinHandle<T>,
    interrupt: impl Future<Output = io::Result<()>>,
) -> Option<Result<T, JoinError>> {
    tokio::select! {
        joined = &mut pipeline => Some(joined),
        signal = interrupt => match signal {
            Ok(()) => None,
            Err(err) => {
                warn!("cannot listen for Ctrl-C: {err}");
                Some(pipeline.await)
            }
        },
    }
}

fn run(cli: &Cli, settings: &Settings) -> Result<RunStatus> {
    let query = cli.query.join(" ");
    if query.trim().is_empty() {
        bail!("the query is empty");
    }

    let working_dir = std::env::current_dir().context("cannot determine working directory")?;
    let facts = environment::probe(&settings.ffmpeg_path, &working_dir)?;
    info!(tool = %facts.tool_version, "media tool ready");

    let backend = OpenAiProvider::from_settings(settings)?;
    let policy = ExecutionPolicy {
        dry_run: cli.dry_run,
        confirm: cli.confirm,
    };
    let executor = CommandExecutor::new(SystemRunner::new(&working_dir), policy);
    let orchestrator = Orchestrator::new(
        ResponseGenerator::new(backend),
        executor,
        facts,
        tool_name(&settings.ffmpeg_path),
    );

    let report = orchestrator.run(query.trim(), cli.file.as_deref());
    debug!(
        attempts = report.attempts,
        history_entries = report.history.len(),
        detected_files = report.files.detected_files.len(),
        last_command = ?report.last_command,
        "run report"
    );
    Ok(report.status)
}

/// Bare program name used to recognise the tool inside generated commands.
fn tool_name(configured: &str) -> String {
    Path::new(configured)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(config::DEFAULT_TOOL)
        .to_string()
}
