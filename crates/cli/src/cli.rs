//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// EchoSense - camera and WiFi fusion tracking engine
#[derive(Parser, Debug)]
#[command(
    name = "echosense",
    author,
    version,
    about = "Camera + WiFi sensing fusion and tracking engine",
    long_about = "Receives camera detections and WiFi RSSI/CSI/monitor streams over UDP,\n\
                  keeps persistent tracks that hand off between camera and WiFi,\n\
                  and pushes fused snapshots to the configured sinks."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "ECHOSENSE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "ECHOSENSE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run sources, fusion engine and sinks until stopped
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "echosense.toml", env = "ECHOSENSE_CONFIG")]
    pub config: PathBuf,

    /// Replace every configured source with a simulated producer
    #[arg(long, env = "ECHOSENSE_SIMULATE")]
    pub simulate: bool,

    /// Stop after this many ticks (0 = unlimited)
    #[arg(long, default_value = "0", env = "ECHOSENSE_MAX_TICKS")]
    pub max_ticks: u64,

    /// Stop after this many seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "ECHOSENSE_TIMEOUT")]
    pub timeout: u64,

    /// Prometheus port (0 = disabled)
    #[arg(long, default_value = "9000", env = "ECHOSENSE_METRICS_PORT")]
    pub metrics_port: u16,

    /// Override engine.tick_interval_ms
    #[arg(long, env = "ECHOSENSE_TICK_MS")]
    pub tick_ms: Option<u64>,

    /// Override engine.handoff_delay_ms
    #[arg(long, env = "ECHOSENSE_HANDOFF_MS")]
    pub handoff_ms: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    #[arg(short, long, default_value = "echosense.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct InfoArgs {
    #[arg(short, long, default_value = "echosense.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Include conditioner tuning
    #[arg(long)]
    pub conditioners: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
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
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}
