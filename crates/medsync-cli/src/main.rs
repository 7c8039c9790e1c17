//! MedSync CLI - Command-line front end of the offline sync engine
//!
//! Provides commands for:
//! - Creating, updating, deleting and listing clinic records
//! - Running a sync cycle and settling conflicts
//! - Inspecting the queue and connectivity
//! - Running the engine in the foreground
//! - Viewing and editing configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod context;
mod output;

use commands::{
    config::ConfigCommand,
    records::{CreateCommand, DeleteCommand, ListCommand, ShowCommand, UpdateCommand},
    run::RunCommand,
    status::StatusCommand,
    sweep::SweepCommand,
    sync::SyncCommand,
};
use context::CliContext;
use medsync_core::config::LoggingConfig;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "medsync", version, about = "Offline-first sync client for the clinic backend")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Never contact the server; mutations go to the queue
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show connectivity, queue and last pull
    Status(StatusCommand),
    /// Push queued mutations, then pull server changes
    Sync(SyncCommand),
    /// Create a record
    Create(CreateCommand),
    /// Update fields of a record
    Update(UpdateCommand),
    /// Delete a record
    Delete(DeleteCommand),
    /// List local records of one kind
    List(ListCommand),
    /// Show one local record
    Show(ShowCommand),
    /// Drop queue items that can no longer succeed
    Sweep(SweepCommand),
    /// Run the engine until interrupted
    Run(RunCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Filter directive: `-v` and `-vv` override the configured level
fn log_directive(verbose: u8, logging: &LoggingConfig) -> String {
    match verbose {
        0 => logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn init_tracing(verbose: u8, logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(verbose, logging)));

    // Logs go to stderr so `--json` output on stdout stays parseable
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from_flag(cli.json);

    let ctx = CliContext::load(cli.config.clone(), cli.offline)?;
    init_tracing(cli.verbose, &ctx.config.logging);

    match cli.command {
        Commands::Status(cmd) => cmd.execute(&ctx, format).await,
        Commands::Sync(cmd) => cmd.execute(&ctx, format).await,
        Commands::Create(cmd) => cmd.execute(&ctx, format).await,
        Commands::Update(cmd) => cmd.execute(&ctx, format).await,
        Commands::Delete(cmd) => cmd.execute(&ctx, format).await,
        Commands::List(cmd) => cmd.execute(&ctx, format).await,
        Commands::Show(cmd) => cmd.execute(&ctx, format).await,
        Commands::Sweep(cmd) => cmd.execute(&ctx, format).await,
        Commands::Run(cmd) => cmd.execute(&ctx, format).await,
        Commands::Config(cmd) => cmd.execute(&ctx, format).await,
    }
}
