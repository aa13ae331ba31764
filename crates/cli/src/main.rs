//! Fieldcheck CLI - Main Entry Point

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fieldcheck_cli::commands::{migrate, plan, snapshot, version};
use fieldcheck_cli::context::Context;
use fieldcheck_cli::output;

/// Fieldcheck - dispatch test-data snapshots and migrations
#[derive(Parser)]
#[command(name = "fieldcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "FIELDCHECK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Snapshot storage root (overrides the configuration)
    #[arg(long, env = "FIELDCHECK_ROOT", global = true)]
    root: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage dataset snapshots
    #[command(subcommand)]
    Snapshot(snapshot::SnapshotCommands),

    /// Inspect dataset versions
    #[command(subcommand)]
    Version(version::VersionCommands),

    /// Show the migration plan between two versions
    Plan(plan::PlanArgs),

    /// Migrate a dataset file
    Migrate(migrate::MigrateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(fieldcheck_engine::default_config_path);
    let ctx = Context::load(&config_path, cli.root, cli.format)?;

    match cli.command {
        Commands::Snapshot(cmd) => snapshot::execute(cmd, &ctx).await?,
        Commands::Version(cmd) => version::execute(cmd, &ctx).await?,
        Commands::Plan(args) => plan::execute(args, &ctx).await?,
        Commands::Migrate(args) => migrate::execute(args, &ctx).await?,
    }

    Ok(())
}
