//! Configuration management
//!
//! Settings are layered, later sources overriding earlier ones:
//! - built-in defaults
//! - an optional TOML file
//! - environment variables prefixed with `NMAP_GATEWAY_`, nested keys
//!   separated by `__` (e.g. `NMAP_GATEWAY_LIMITS__TIMEOUT_SECS=60`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::{core::DEFAULT_FLAGS, validation::validate_flags};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine invocation settings
    pub engine: EngineConfig,
    /// Per-scan resource limits
    pub limits: LimitsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Identity reported by the info operation
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Explicit engine path; skips discovery when set
    pub path: Option<PathBuf>,
    /// Data directory passed to the engine
    pub datadir: String,
    /// Flags used when a request carries none
    pub default_flags: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Wall-clock budget per scan, in seconds
    pub timeout_secs: u64,
    /// Combined stdout/stderr cap per scan, in bytes
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Console format (pretty, compact, json)
    pub format: String,
    /// Optional log file, rotated daily
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                path: None,
                datadir: "/usr/share/nmap".to_string(),
                default_flags: DEFAULT_FLAGS.to_string(),
            },
            limits: LimitsConfig {
                timeout_secs: 300,
                max_output_bytes: 10 * 1024 * 1024,
            },
            logging: LoggingConfig::default(),
            server: ServerConfig {
                name: "NmapService".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let mut settings =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if config_path.exists() {
            debug!("Loading configuration from: {}", config_path.display());
            settings = settings.add_source(config::File::from(config_path));
        } else {
            debug!("No configuration file at {}, using defaults", config_path.display());
        }

        settings = settings.add_source(
            config::Environment::with_prefix("NMAP_GATEWAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.limits.timeout_secs == 0 {
            return Err(anyhow::anyhow!("limits.timeout_secs must be greater than 0"));
        }

        if self.limits.max_output_bytes == 0 {
            return Err(anyhow::anyhow!("limits.max_output_bytes must be greater than 0"));
        }

        if self.engine.datadir.trim().is_empty() {
            return Err(anyhow::anyhow!("engine.datadir must not be empty"));
        }

        if !validate_flags(&self.engine.default_flags) {
            return Err(anyhow::anyhow!(
                "engine.default_flags is not a valid option string: {:?}",
                self.engine.default_flags
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(anyhow::anyhow!("Invalid logging level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "pretty" | "compact" | "json" => {}
            _ => return Err(anyhow::anyhow!("Invalid logging format: {}", self.logging.format)),
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Wall-clock budget for one scan
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.timeout_secs)
    }
}
