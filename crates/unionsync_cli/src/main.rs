//! unionsync CLI
//!
//! Runs the overlay cache sync engine for one compute server.
//!
//! # Commands
//!
//! - `run` - Sync periodically until interrupted
//! - `once` - Run a single sync cycle
//! - `layout` - Print every path derived from the configuration

mod commands;
mod local;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use unionsync_engine::{EngineConfig, DEFAULT_EXEC_TIMEOUT, DEFAULT_SYNC_INTERVAL};

/// Keeps a union-filesystem cache and its project in sync.
#[derive(Parser)]
#[command(name = "unionsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Overlay paths and sync tuning shared by every command.
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Project home as mounted on this compute server (lower layer)
    #[arg(long)]
    lower: PathBuf,

    /// Local fast storage receiving writes (upper layer)
    #[arg(long)]
    upper: PathBuf,

    /// Mount point of the union filesystem
    #[arg(long)]
    mount: PathBuf,

    /// Id of this compute server
    #[arg(long)]
    compute_server_id: u32,

    /// Seconds between sync cycles
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL.as_secs())]
    interval: u64,

    /// Path (relative to the project root) excluded from sync; repeatable
    #[arg(long = "exclude", value_name = "PATH")]
    exclude: Vec<String>,

    /// Timeout in seconds for commands run in the project
    #[arg(long, default_value_t = DEFAULT_EXEC_TIMEOUT.as_secs())]
    exec_timeout: u64,
}

impl SyncArgs {
    /// Builds the engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(&self.lower, &self.upper, &self.mount, self.compute_server_id)
            .with_sync_interval(Duration::from_secs(self.interval))
            .with_exclude(self.exclude.iter().cloned())
            .with_exec_timeout(Duration::from_secs(self.exec_timeout))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sync periodically until interrupted
    Run {
        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Run a single sync cycle and print its result
    Once {
        #[command(flatten)]
        sync: SyncArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print every path derived from the configuration
    Layout {
        #[command(flatten)]
        sync: SyncArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { sync } => commands::run::run(&sync)?,
        Commands::Once { sync, format } => commands::once::run(&sync, &format)?,
        Commands::Layout { sync, format } => commands::layout::run(&sync, &format)?,
        Commands::Version => {
            println!("unionsync v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
