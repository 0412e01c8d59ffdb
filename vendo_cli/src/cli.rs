//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "vendo", version, about = "Water vending kiosk CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/vendo.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one fill cycle for the given size
    Fill {
        /// Size name, e.g. "350 ml" (see `vendo volumes`)
        #[arg(long)]
        size: String,
        /// Override safety: max fill time in ms (takes precedence over config)
        #[arg(long, value_name = "MS")]
        max_fill_ms: Option<u64>,
    },
    /// List the purchasable sizes
    Volumes,
    /// Poll water quality and print the readings
    Telemetry {
        /// Number of samples to print before exiting
        #[arg(long, default_value_t = 5)]
        count: u32,
    },
    /// Quick health check (hardware presence / sim ok)
    SelfCheck,
}
