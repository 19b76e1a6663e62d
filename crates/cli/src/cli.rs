//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Change Notifier - turns path changes into register/unregister jobs
#[derive(Parser, Debug)]
#[command(
    name = "change-notifier",
    author,
    version,
    about = "Path change notifier for a Gearman job server",
    long_about = "Reads intercepted requests (PUT / DELETE / COPY / MOVE) and submits\n\
                  register/unregister background jobs to a Gearman job server,\n\
                  preserving per-path order, with bounded retry and graceful shutdown."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CHANGE_NOTIFIER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CHANGE_NOTIFIER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read requests from stdin and dispatch change jobs
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults are used when omitted
    #[arg(short, long, env = "CHANGE_NOTIFIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override job server host from configuration
    #[arg(long, env = "CHANGE_NOTIFIER_HOST")]
    pub host: Option<String>,

    /// Override job server port from configuration
    #[arg(long, env = "CHANGE_NOTIFIER_PORT")]
    pub port: Option<u16>,

    /// Enable notifications even if the configuration leaves them off
    #[arg(long, env = "CHANGE_NOTIFIER_ENABLE")]
    pub enable: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "CHANGE_NOTIFIER_METRICS_PORT")]
    pub metrics_port: u16,

    /// Use an in-memory broker instead of the job server
    #[arg(long)]
    pub dry_broker: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "change-notifier.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
