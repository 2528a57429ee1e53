//! Command-line interface definition
//!
//! Runs the gateway as a stdio tool server by default, or performs a
//! single scan / info call and prints the response text. Every flag here
//! overrides the matching configuration value.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::{config::AppConfig, core::OutputFormat};

#[derive(Parser, Debug)]
#[command(
    name = "nmap-gateway",
    version,
    about = "Safe, bounded gateway to the nmap network scanner",
    long_about = "Validates scan requests, runs nmap as a bounded child process and returns normalized reports"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(short = 'c', long = "config", help = "Configuration file path", value_name = "FILE", default_value = "nmap-gateway.toml", global = true)]
    pub config_path: PathBuf,

    #[arg(long, help = "Path to the nmap executable (skips discovery)", value_name = "PATH", global = true)]
    pub nmap_path: Option<PathBuf>,

    #[arg(long, help = "Data directory passed to nmap", value_name = "DIR", global = true)]
    pub datadir: Option<String>,

    #[arg(long, help = "Per-scan timeout in seconds", value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    #[arg(long, help = "Combined stdout/stderr cap per scan in bytes", value_name = "BYTES", global = true)]
    pub max_output: Option<usize>,

    #[arg(long, help = "Log level (trace, debug, info, warn, error)", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[arg(long, help = "Console log format", value_enum, value_name = "FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    #[arg(long, help = "Session id used to correlate log lines", value_name = "ID", global = true)]
    pub session: Option<String>,

    #[arg(long, help = "Print the effective configuration and exit")]
    pub print_config: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Serve tool calls as JSON-RPC over stdin/stdout (default)
    Serve,
    /// Run one scan and print the response text
    Scan {
        /// Host name, IPv4 address or CIDR range
        target: String,

        #[arg(long, help = "Options passed to nmap", allow_hyphen_values = true, value_name = "FLAGS")]
        flags: Option<String>,

        #[arg(long, help = "Report format", value_enum, default_value_t = FormatArg::Xml)]
        format: FormatArg,
    },
    /// Print service information
    Info,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    /// XML report, summarized
    Xml,
    /// Normal human-readable report
    Normal,
    /// Grepable report
    Grepable,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Xml => OutputFormat::Structured,
            FormatArg::Normal => OutputFormat::Plain,
            FormatArg::Grepable => OutputFormat::Grepable,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl Cli {
    /// Selected subcommand, defaulting to the stdio server
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout == Some(0) {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.max_output == Some(0) {
            return Err("Output cap must be greater than 0".to_string());
        }

        if let Some(level) = &self.log_level {
            match level.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => {}
                _ => return Err(format!("Invalid log level: {}", level)),
            }
        }

        Ok(())
    }

    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(path) = &self.nmap_path {
            config.engine.path = Some(path.clone());
        }
        if let Some(datadir) = &self.datadir {
            config.engine.datadir = datadir.clone();
        }
        if let Some(timeout) = self.timeout {
            config.limits.timeout_secs = timeout;
        }
        if let Some(max_output) = self.max_output {
            config.limits.max_output_bytes = max_output;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.to_lowercase();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format.to_string();
        }
    }
}
