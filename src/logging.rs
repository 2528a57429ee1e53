//! Logging and observability
//!
//! Provides structured logging with:
//! - Multiple console formats (pretty, compact, JSON), always on stderr so
//!   stdout stays free for the tool protocol
//! - Optional daily-rotated JSON log file
//! - Per-scan phase logging correlated by session and scan id

use anyhow::{Context, Result};
use std::{
    io,
    path::Path,
    time::{Duration, Instant},
};
use tracing::info;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::{config::LoggingConfig, error::GatewayError};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging with specific configuration
///
/// The returned guard flushes the log file on drop and must be held for
/// the lifetime of the process.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = create_env_filter(&config.level)?;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(&config.format)];

    let guard = match &config.file_path {
        Some(path) => {
            let (layer, guard) = file_layer(path)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    Registry::default()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!("Logging system initialized with level: {}", config.level);
    Ok(guard)
}

fn console_layer(format: &str) -> BoxedLayer {
    match format.to_lowercase().as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
        _ => fmt::layer()
            .pretty()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
    }
}

fn file_layer(path: &Path) -> Result<(BoxedLayer, WorkerGuard)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let (writer, guard) = non_blocking(rolling::daily(directory, file_name));
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(writer)
        .boxed();

    Ok((layer, guard))
}

/// Create environment filter from log level string
fn create_env_filter(level: &str) -> Result<EnvFilter> {
    let base_level = match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => return Err(GatewayError::config(format!("Invalid log level: {}", level)).into()),
    };

    let filter = EnvFilter::builder()
        .with_default_directive(base_level.into())
        .from_env()
        .context("Failed to create environment filter")?
        .add_directive("tokio=info".parse()?)
        .add_directive("runtime=info".parse()?);

    Ok(filter)
}

#[macro_export]
macro_rules! log_scan_start {
    ($target:expr, $flags:expr, $format:expr) => {
        tracing::info!(
            target_host = %$target,
            flags = %$flags,
            output_format = %$format,
            event = "scan_start",
            "Starting Nmap scan for target: {}",
            $target
        );
    };
}

#[macro_export]
macro_rules! log_scan_complete {
    ($target:expr, $outcome:expr, $duration:expr) => {
        tracing::info!(
            target_host = %$target,
            outcome = $outcome,
            duration_ms = $duration.as_millis() as u64,
            event = "scan_complete",
            "Nmap scan finished for {} ({}) in {}ms",
            $target,
            $outcome,
            $duration.as_millis()
        );
    };
}

#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            kind = $error.kind(),
            context = $context,
            severity = %$error.severity(),
            recoverable = $error.is_recoverable(),
            event = "error",
            "Error in {}: {}",
            $context,
            $error
        );
    };
}

/// Phase logging for a single scan
pub struct ScanLogger {
    session_id: String,
    scan_id: String,
    target: String,
}

impl ScanLogger {
    pub fn new<S: Into<String>, I: Into<String>, T: Into<String>>(
        session_id: S,
        scan_id: I,
        target: T,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            scan_id: scan_id.into(),
            target: target.into(),
        }
    }

    pub fn log_phase_start(&self, phase: &str) {
        tracing::debug!(
            session_id = %self.session_id,
            scan_id = %self.scan_id,
            target_host = %self.target,
            phase = phase,
            event = "phase_start",
            "[{}] Starting {} phase for {}",
            self.session_id,
            phase,
            self.target
        );
    }

    pub fn log_phase_complete(&self, phase: &str, duration: Duration) {
        tracing::debug!(
            session_id = %self.session_id,
            scan_id = %self.scan_id,
            target_host = %self.target,
            phase = phase,
            duration_ms = duration.as_millis() as u64,
            event = "phase_complete",
            "[{}] Completed {} phase in {}ms",
            self.session_id,
            phase,
            duration.as_millis()
        );
    }
}

/// Logs how long an operation took when dropped
pub struct TimingLogger {
    name: String,
    start_time: Instant,
}

impl TimingLogger {
    pub fn start<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        tracing::trace!(operation = %name, event = "timing_start", "Starting timing for: {}", name);

        Self {
            name,
            start_time: Instant::now(),
        }
    }
}

impl Drop for TimingLogger {
    fn drop(&mut self) {
        let elapsed = self.start_time.elapsed();
        tracing::debug!(
            operation = %self.name,
            duration_ms = elapsed.as_millis() as u64,
            event = "timing_complete",
            "Completed '{}' in {}ms",
            self.name,
            elapsed.as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_creation() {
        assert!(create_env_filter("info").is_ok());
        assert!(create_env_filter("DEBUG").is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        assert!(create_env_filter("invalid").is_err());
    }

    #[test]
    fn test_file_layer_requires_file_name() {
        assert!(file_layer(Path::new("/")).is_err());
    }

    #[test]
    fn test_scan_logger() {
        let logger = ScanLogger::new("session-1", "scan-1", "192.168.1.1");
        logger.log_phase_start("execute");
        logger.log_phase_complete("execute", Duration::from_millis(500));
    }

    #[test]
    fn test_timing_logger_logs_on_drop() {
        let timing = TimingLogger::start("scan 10.0.0.1");
        assert_eq!(timing.name, "scan 10.0.0.1");
        drop(timing);
    }
}
