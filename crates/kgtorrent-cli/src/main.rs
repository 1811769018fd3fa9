//! kgtorrent CLI - build the KGTorrent database from a Meta Kaggle snapshot.

use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use kgtorrent::download::folder_is_empty;
use kgtorrent::{
    Config, DownloadStrategy, DownloadSummary, LoadError, LoadMode, LoadResult, Orchestrator,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "kgtorrent")]
#[command(about = "Load a Meta Kaggle snapshot into PostgreSQL and download its notebooks")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (environment variables only when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Write logs to a timestamped file in this directory instead of stderr
    #[arg(long, env = "LOG_DEST_PATH")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LoadArgs {
    /// Notebook download strategy: http or api [default: from config]
    #[arg(long)]
    strategy: Option<DownloadStrategy>,

    /// Build the database only, without downloading notebooks
    #[arg(long)]
    skip_download: bool,

    /// Resolve and simulate the load in memory; no database needed
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the database from the snapshot, then download notebooks
    Init {
        #[command(flatten)]
        load: LoadArgs,
    },

    /// Drop and rebuild the database, then update the notebook folder
    Refresh {
        #[command(flatten)]
        load: LoadArgs,

        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// Download the notebooks selected from an already loaded database
    Download {
        /// Notebook download strategy: http or api [default: from config]
        #[arg(long)]
        strategy: Option<DownloadStrategy>,
    },

    /// Test the snapshot location and database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), LoadError> {
    let cli = Cli::parse();

    if let Some(path) = setup_logging(&cli.verbosity, &cli.log_format, cli.log_dir.as_deref())? {
        eprintln!("Logging to {}", path.display());
    }

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => {
            let config = Config::from_env()?;
            info!("Loaded configuration from environment");
            config
        }
    }
    .with_auto_tuning();

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler();

    match cli.command {
        Commands::Init { load } => {
            if !load.skip_download && !load.dry_run && !folder_is_empty(&config.download.dest_path)? {
                return Err(LoadError::Config(format!(
                    "notebook folder {:?} is not empty; use refresh to update it",
                    config.download.dest_path
                )));
            }
            build(config, LoadMode::Init, load, cli.output_json, cancel_token).await?;
        }

        Commands::Refresh { load, yes } => {
            if !yes && !load.dry_run && !confirm_refresh(&config)? {
                println!("Refresh aborted");
                return Ok(());
            }
            build(config, LoadMode::Refresh, load, cli.output_json, cancel_token).await?;
        }

        Commands::Download { strategy } => {
            let strategy = strategy.unwrap_or(config.download.strategy);
            let orchestrator = Orchestrator::new(config).await?;
            let summary = orchestrator.download(strategy, cancel_token).await?;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_download(&summary);
            }
        }

        Commands::HealthCheck => {
            let result = Orchestrator::health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Snapshot: {} ({} tables, {} constraints)",
                    if result.source_readable { "OK" } else { "FAILED" },
                    result.source_tables,
                    result.declared_constraints
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref version) = result.target_version {
                    println!("    Version: {}", version);
                }
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(LoadError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

/// Load the snapshot, then download notebooks unless skipped.
async fn build(
    config: Config,
    mode: LoadMode,
    args: LoadArgs,
    output_json: bool,
    cancel: CancellationToken,
) -> Result<(), LoadError> {
    let strategy = args.strategy.unwrap_or(config.download.strategy);
    let orchestrator = if args.dry_run {
        Orchestrator::dry_run(config)
    } else {
        Orchestrator::new(config).await?
    };

    let mut result = orchestrator.run(mode, cancel.clone()).await?;

    let mut selected = None;
    if args.dry_run {
        selected = orchestrator.notebook_identifiers().await.ok().map(|ids| ids.len());
    } else if !args.skip_download {
        result.download = Some(orchestrator.download(strategy, cancel).await?);
    }
    orchestrator.close().await;

    if output_json {
        println!("{}", result.to_json()?);
    } else {
        print_result(&result, args.dry_run);
        if let Some(count) = selected {
            println!("  Notebooks selected: {}", count);
        }
        if let Some(ref summary) = result.download {
            print_download(summary);
        }
    }
    Ok(())
}

fn confirm_refresh(config: &Config) -> Result<bool, LoadError> {
    Confirm::new()
        .with_prompt(format!(
            "Drop and rebuild the tables in {}/{} and prune {:?}?",
            config.target.database, config.target.schema, config.download.dest_path
        ))
        .default(false)
        .interact()
        .map_err(|e| LoadError::Config(format!("refresh needs confirmation (or --yes): {}", e)))
}

fn print_result(result: &LoadResult, dry_run: bool) {
    let status_msg = if dry_run { "Dry run completed!" } else { "Load completed!" };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Tables: {}", result.tables_total);
    println!("  Rows: {} ({} removed)", result.rows_written, result.rows_removed);
    println!("  Resolution passes: {}", result.resolution_passes);
    println!("\n  {:<32} {:>12} {:>12} {:>8}", "Table", "Initial", "Final", "Kept %");
    for stats in &result.tables {
        println!(
            "  {:<32} {:>12} {:>12} {:>8.2}",
            stats.table, stats.initial_rows, stats.final_rows, stats.ratio
        );
    }
    println!(
        "\n  Constraints: {} applied, {} failed",
        result.constraints_applied, result.constraints_failed
    );
    for failure in &result.hardening_failures {
        if let kgtorrent::engine::HardeningStatus::Failed { ref reason } = failure.status {
            println!("    {} on {}: {}", failure.name, failure.table, reason);
        }
    }
}

fn print_download(summary: &DownloadSummary) {
    println!("\nNotebook download{}:", if summary.cancelled { " (cancelled)" } else { "" });
    println!("  Requested: {}", summary.requested);
    println!("  Already present: {}", summary.skipped);
    println!("  Removed: {}", summary.removed);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed: {}", summary.failed);
}

/// Install the global subscriber. With a log directory, logs go to a new
/// `kgtorrent-<timestamp>.log` there and its path is returned.
fn setup_logging(
    verbosity: &str,
    format: &str,
    log_dir: Option<&Path>,
) -> Result<Option<PathBuf>, LoadError> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    let Some(dir) = log_dir else {
        let subscriber = builder.with_writer(std::io::stderr);
        if format == "json" {
            subscriber.json().init();
        } else {
            subscriber.init();
        }
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "kgtorrent-{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    let file = std::fs::File::create(&path)?;
    let subscriber = builder.with_ansi(false).with_writer(Mutex::new(file));
    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(Some(path))
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping at the next table or notebook...", name);
                    token.cancel();
                });
            }
            Err(e) => eprintln!("Failed to setup {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping at the next table or notebook...");
            token.cancel();
        }
    });

    cancel_token
}
