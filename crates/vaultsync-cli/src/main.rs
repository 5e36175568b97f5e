//! vaultsync CLI - inspection and maintenance commands for a synced vault
//!
//! Provides commands for:
//! - Checking whether a path takes part in sync
//! - Analyzing and resolving conflict markers in a file
//! - Reading the activity ledger and the record snapshot
//! - Listing files skipped by selective sync
//! - Managing the configuration file

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    activity::ActivityCommand, check::CheckCommand, config::ConfigCommand,
    ignored::IgnoredCommand, markers::MarkersCommand, records::RecordsCommand,
};
use output::OutputFormat;
use vaultsync_core::config::Config;

#[derive(Debug, Parser)]
#[command(name = "vaultsync", version, about = "Keep a note vault in sync with cloud storage")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only print warnings and errors from the log
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Explain whether a vault path is synced or excluded
    Check(CheckCommand),
    /// Inspect or resolve conflict markers in a file
    #[command(subcommand)]
    Markers(MarkersCommand),
    /// Show recent activity ledger entries
    Activity(ActivityCommand),
    /// List the per-file sync records
    Records(RecordsCommand),
    /// List local files skipped by selective sync
    Ignored(IgnoredCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    fn log_filter(&self, config_level: &str) -> String {
        if self.quiet {
            return "warn".into();
        }
        match self.verbose {
            0 => config_level.to_string(),
            1 => "debug".into(),
            _ => "trace".into(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let logging = Config::load_or_default(&config_path).logging;

    // Setup tracing
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter(&logging.level)));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Check(cmd) => cmd.execute(format, &config_path).await,
        Commands::Markers(cmd) => cmd.execute(format).await,
        Commands::Activity(cmd) => cmd.execute(format, &config_path).await,
        Commands::Records(cmd) => cmd.execute(format, &config_path).await,
        Commands::Ignored(cmd) => cmd.execute(format, &config_path).await,
        Commands::Config(cmd) => cmd.execute(format, &config_path).await,
    }
}
