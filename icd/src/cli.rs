//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// incidentd - incident fan-out and response correlation coordinator
#[derive(Parser)]
#[command(
    name = "icd",
    about = "Fan alerts out to analyzers, correlate their answers, forward one aggregate per alert",
    version,
    after_help = "Logs are written to: ~/.local/share/incidentd/logs/incidentd.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the coordinator until SIGINT/SIGTERM
    Run,

    /// Run the unix socket message broker
    Broker,

    /// Publish a raw alert document to the alerts channel
    Submit {
        /// JSON file, or - for stdin
        #[arg(value_name = "FILE", default_value = "-")]
        input: String,
    },

    /// Look an alert up by id through the running coordinator
    Lookup {
        /// Alert id to look up
        alert_id: String,

        /// Seconds to wait for an answer (defaults to the configured lookup timeout)
        #[arg(short, long)]
        timeout_secs: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

/// Output format for lookup results
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
