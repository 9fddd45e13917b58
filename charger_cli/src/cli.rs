//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "charger", version, about = "Solar/DC battery charge controller")]
pub struct Cli {
    /// Path to the deployment config TOML (defaults apply if absent)
    #[arg(long, value_name = "FILE", default_value = "etc/charger.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the charge-control loop
    Run {
        /// Disable the HTTP endpoint regardless of config
        #[arg(long, action = ArgAction::SetTrue)]
        no_web: bool,
        /// Stop cleanly after this many seconds (0 = run until killed)
        #[arg(long, value_name = "SECONDS", default_value_t = 0)]
        run_for: u64,
    },
    /// Quick health check (sensor presence / sim ok)
    SelfCheck,
    /// Print one JSON state snapshot and exit
    Snapshot,
}
