// crates/shape-load/src/main.rs
// ============================================================================
// Module: Shape Load CLI Entry Point
// Description: Command dispatcher for the shape load harness.
// Purpose: Run standalone, worker or coordinator roles and check configuration.
// Dependencies: clap, rand, serde_json, shape-load, shape-load-config, tokio
// ============================================================================

//! ## Overview
//! `shape-load run` starts simulated clients and the stats server in one
//! process and prints the merged histogram when the run ends.
//! `shape-load worker` posts reports to `report.coordinator_url`, and
//! `shape-load coordinator` only serves stats and ingests reports. Runs end on
//! Ctrl-C or after `load.run_time_secs`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use shape_load::CoordinatorState;
use shape_load::HarnessError;
use shape_load::HttpReportSink;
use shape_load::LatencyResponse;
use shape_load::LoadEventSink;
use shape_load::LocalReportSink;
use shape_load::WorkerRuntime;
use shape_load::WorkerSummary;
use shape_load::server;
use shape_load::sink_from_config;
use shape_load_config::ShapeLoadConfig;
use shape_load_config::config_toml_example;
use shape_load_core::DistributedAggregator;
use shape_load_core::SystemClock;
use shape_load_core::WorkerId;
use thiserror::Error;
use tokio::sync::watch;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Shape load command-line interface.
#[derive(Parser, Debug)]
#[command(name = "shape-load", version, disable_help_subcommand = true)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Selected command.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run clients and the stats server in one process.
    Run,
    /// Run clients and post reports to a remote coordinator.
    Worker,
    /// Serve stats and merge reports from workers.
    Coordinator,
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the configuration.
    Check,
    /// Print an example configuration.
    Example,
}

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

impl From<HarnessError> for CliError {
    fn from(err: HarnessError) -> Self {
        Self::new(err.to_string())
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run => command_run(cli.config).await,
        Commands::Worker => command_worker(cli.config).await,
        Commands::Coordinator => command_coordinator(cli.config).await,
        Commands::Config {
            command,
        } => match command {
            ConfigCommand::Check => command_config_check(cli.config),
            ConfigCommand::Example => command_config_example(),
        },
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Runs a worker and the coordinator in one process.
async fn command_run(config_path: Option<PathBuf>) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let events = build_events(&config)?;
    let aggregator = Arc::new(DistributedAggregator::new());
    aggregator.on_test_start();
    let shutdown = shutdown_signal(config.load.run_time());

    let server = spawn_server(&config, Arc::clone(&aggregator), Arc::clone(&events), &shutdown)
        .await?;
    let worker = WorkerRuntime::new(&config, worker_id(&config), Arc::new(SystemClock), events);
    let summary = worker.run(&LocalReportSink::new(Arc::clone(&aggregator)), shutdown).await;
    join_server(server).await?;

    let histogram = LatencyResponse {
        histogram: aggregator.histogram(config.load.histogram_mode),
    };
    let rendered = serde_json::to_string(&histogram)
        .map_err(|err| CliError::new(format!("failed to render histogram: {err}")))?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    write_summary(&summary)?;
    Ok(ExitCode::SUCCESS)
}

/// Runs a worker reporting to a remote coordinator.
async fn command_worker(config_path: Option<PathBuf>) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let coordinator = config
        .report
        .coordinator()
        .map_err(HarnessError::from)?
        .ok_or_else(|| CliError::new("report.coordinator_url is required in worker mode".to_string()))?;
    let sink = HttpReportSink::new(&coordinator).map_err(HarnessError::from)?;
    let events = build_events(&config)?;
    let shutdown = shutdown_signal(config.load.run_time());

    let worker = WorkerRuntime::new(&config, worker_id(&config), Arc::new(SystemClock), events);
    let summary = worker.run(&sink, shutdown).await;
    write_summary(&summary)?;
    Ok(ExitCode::SUCCESS)
}

/// Serves stats and merges worker reports until interrupted.
async fn command_coordinator(config_path: Option<PathBuf>) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let events = build_events(&config)?;
    let aggregator = Arc::new(DistributedAggregator::new());
    aggregator.on_test_start();
    let shutdown = shutdown_signal(None);
    let server = spawn_server(&config, aggregator, events, &shutdown).await?;
    join_server(server).await?;
    Ok(ExitCode::SUCCESS)
}

/// Loads and validates configuration.
fn command_config_check(config_path: Option<PathBuf>) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    write_stdout_line(&format!(
        "config ok: {} clients against {}{}",
        config.load.clients, config.target.base_url, config.target.root_table
    ))
    .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Prints the example configuration.
fn command_config_example() -> CliResult<ExitCode> {
    write_stdout_line(config_toml_example().trim_end())
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads configuration from `path`, the environment or the default location.
fn load_config(path: Option<PathBuf>) -> CliResult<ShapeLoadConfig> {
    Ok(ShapeLoadConfig::load(path.as_deref()).map_err(HarnessError::from)?)
}

/// Builds the configured event sink.
fn build_events(config: &ShapeLoadConfig) -> CliResult<Arc<dyn LoadEventSink>> {
    sink_from_config(&config.logging)
        .map_err(|err| HarnessError::Io(format!("failed to open event log: {err}")).into())
}

/// Returns the configured worker id or a generated one.
fn worker_id(config: &ShapeLoadConfig) -> WorkerId {
    config.report.worker_id.as_ref().map_or_else(
        || WorkerId::new(format!("worker-{:08x}", rand::random::<u32>())),
        WorkerId::new,
    )
}

/// Returns a receiver that flips to `true` on Ctrl-C or after `run_time`.
fn shutdown_signal(run_time: Option<Duration>) -> watch::Receiver<bool> {
    let (sender, receiver) = watch::channel(false);
    tokio::spawn(async move {
        match run_time {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    () = tokio::time::sleep(limit) => {}
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
        let _ = sender.send(true);
    });
    receiver
}

/// Binds the stats listener and serves it in the background.
async fn spawn_server(
    config: &ShapeLoadConfig,
    aggregator: Arc<DistributedAggregator>,
    events: Arc<dyn LoadEventSink>,
    shutdown: &watch::Receiver<bool>,
) -> CliResult<tokio::task::JoinHandle<Result<(), HarnessError>>> {
    let addr = config.server.bind_addr().map_err(HarnessError::from)?;
    let listener = server::bind(addr).await?;
    let state = Arc::new(CoordinatorState::new(aggregator, config.load.histogram_mode, events));
    Ok(tokio::spawn(server::serve(listener, state, shutdown.clone())))
}

/// Waits for the background server to stop.
async fn join_server(
    server: tokio::task::JoinHandle<Result<(), HarnessError>>,
) -> CliResult<()> {
    server
        .await
        .map_err(|err| CliError::new(format!("stats server task failed: {err}")))?
        .map_err(CliError::from)
}

/// Writes the worker totals to stderr.
fn write_summary(summary: &WorkerSummary) -> CliResult<()> {
    write_stderr_line(&format!(
        "clients: {} started, {} stopped, {} failed; reports: {} sent, {} failed",
        summary.clients_started,
        summary.clients_stopped,
        summary.clients_failed,
        summary.reports_sent,
        summary.reports_failed
    ))
    .map_err(|err| CliError::new(output_error("stderr", &err)))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
