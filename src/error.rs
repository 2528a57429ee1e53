//! Error handling for the scan gateway
//!
//! Provides structured error types with contextual information for:
//! - Request validation (malformed targets or flag strings)
//! - Engine execution (spawn failures, non-zero exits, timeouts)
//! - Resource limits (oversized engine output)
//! - Report parsing (malformed structured output, always recoverable)
//! - Configuration and protocol errors in the surrounding service

use std::{fmt, io, time::Duration};
use thiserror::Error;

/// Main result type used throughout the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Every failure the gateway can observe
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum GatewayError {
    /// Malformed request input, detected before anything is spawned
    #[error("{message}")]
    Validation { field: String, message: String },

    /// Engine exceeded its wall-clock budget
    #[error("Timeout: {operation} exceeded {duration_secs}s")]
    Timeout {
        operation: String,
        duration_secs: u64,
    },

    /// Engine output exceeded the configured cap
    #[error("Resource limit exceeded: {resource} - {message}")]
    ResourceLimit { resource: String, message: String },

    /// Engine failed to start or exited unsuccessfully
    #[error("Execution error: {message}")]
    Execution { message: String },

    /// Structured report could not be parsed
    #[error("Parse error: {format} - {message}")]
    Parse { format: String, message: String },

    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// File and pipe I/O errors
    #[error("IO error: {operation} - {message}")]
    Io { operation: String, message: String },

    /// Malformed calls at the tool-protocol layer
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Anything that should not have happened
    #[error("Internal error: {context} - {message}")]
    Internal { context: String, message: String },
}

impl GatewayError {
    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error from the budget that was exceeded
    pub fn timeout<O: Into<String>>(operation: O, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_secs: limit.as_secs(),
        }
    }

    /// Create a resource limit error
    pub fn resource_limit<R: Into<String>, M: Into<String>>(resource: R, message: M) -> Self {
        Self::ResourceLimit {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution<M: Into<String>>(message: M) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse<F: Into<String>, M: Into<String>>(format: F, message: M) -> Self {
        Self::Parse {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an IO error
    pub fn io<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Io {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol<M: Into<String>>(message: M) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<C: Into<String>, M: Into<String>>(context: C, message: M) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Parse errors degrade to raw output; timeouts may succeed on retry
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Timeout { .. })
    }

    /// Whether the error was raised before any process was spawned
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Short machine-readable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Timeout { .. } => "timeout",
            Self::ResourceLimit { .. } => "resource_limit",
            Self::Execution { .. } => "execution",
            Self::Parse { .. } => "parse",
            Self::Configuration { .. } => "configuration",
            Self::Io { .. } => "io",
            Self::Protocol { .. } => "protocol",
            Self::Internal { .. } => "internal",
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Internal { .. } => ErrorSeverity::Critical,
            Self::Configuration { .. } => ErrorSeverity::High,
            Self::Execution { .. } | Self::ResourceLimit { .. } | Self::Io { .. } => {
                ErrorSeverity::Medium
            }
            Self::Timeout { .. } => ErrorSeverity::Medium,
            Self::Validation { .. } | Self::Protocol { .. } | Self::Parse { .. } => {
                ErrorSeverity::Low
            }
        }
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<io::Error> for GatewayError {
    fn from(error: io::Error) -> Self {
        Self::io("IO operation", error.to_string())
    }
}

impl From<fmt::Error> for GatewayError {
    fn from(error: fmt::Error) -> Self {
        Self::internal("formatting", error.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(error: serde_json::Error) -> Self {
        Self::protocol(error.to_string())
    }
}

impl From<roxmltree::Error> for GatewayError {
    fn from(error: roxmltree::Error) -> Self {
        Self::parse("xml", error.to_string())
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(error: config::ConfigError) -> Self {
        Self::config(error.to_string())
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal("anyhow", error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = GatewayError::timeout("nmap scan", Duration::from_secs(300));
        assert!(matches!(error, GatewayError::Timeout { duration_secs: 300, .. }));
        assert!(error.is_recoverable());
        assert_eq!(error.kind(), "timeout");
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let error = GatewayError::validation("target", "Invalid target format: x");
        assert_eq!(error.to_string(), "Invalid target format: x");
        assert!(error.is_validation_error());
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(GatewayError::config("bad").severity(), ErrorSeverity::High);
        assert_eq!(GatewayError::execution("exit 1").severity(), ErrorSeverity::Medium);
        assert_eq!(GatewayError::parse("xml", "eof").severity(), ErrorSeverity::Low);
        assert!(ErrorSeverity::Critical > ErrorSeverity::Low);
    }

    #[test]
    fn test_io_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let error: GatewayError = io_error.into();
        assert!(matches!(error, GatewayError::Io { .. }));
        assert!(!error.is_recoverable());
    }
}
