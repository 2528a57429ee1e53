//! Core data model and traits
//!
//! Everything here is request-scoped: a [`ScanRequest`] is built per call,
//! turned into an [`EngineInvocation`](crate::command::EngineInvocation),
//! executed into an [`ExecutionOutcome`] and finally shaped into a
//! [`ScanResponse`]. Nothing survives past the call that created it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

use crate::{command::EngineInvocation, error::GatewayError};

/// Flags used when a request does not carry any
pub const DEFAULT_FLAGS: &str = "-T4 -p 1-1000";

/// Session label logged when the caller did not supply one
pub const NO_SESSION: &str = "N/A";

/// Name of the scan operation exposed to callers
pub const TOOL_SCAN: &str = "nmapScan";

/// Name of the introspection operation exposed to callers
pub const TOOL_INFO: &str = "getInfo";

/// Report format requested from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum OutputFormat {
    /// XML report, parsed into a summary plus the full document
    #[default]
    #[serde(rename = "xml")]
    Structured,
    /// Human-readable report, passed through
    #[serde(rename = "normal")]
    Plain,
    /// Line-oriented report, passed through
    #[serde(rename = "grepable")]
    Grepable,
}

impl OutputFormat {
    /// Name used on the wire and in response headers
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Structured => "xml",
            Self::Plain => "normal",
            Self::Grepable => "grepable",
        }
    }
}

impl From<&str> for OutputFormat {
    /// Unknown names fall back to the structured format
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "normal" | "plain" => Self::Plain,
            "grepable" => Self::Grepable,
            _ => Self::Structured,
        }
    }
}

impl From<String> for OutputFormat {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A single scan call as received from the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub target: String,
    /// Engine options; `None` means the configured default
    #[serde(default)]
    pub flags: Option<String>,
    #[serde(default, rename = "outputFormat")]
    pub output_format: OutputFormat,
}

impl ScanRequest {
    pub fn new<S: Into<String>>(target: S) -> Self {
        Self {
            target: target.into(),
            flags: None,
            output_format: OutputFormat::default(),
        }
    }

    pub fn with_flags<S: Into<String>>(mut self, flags: S) -> Self {
        self.flags = Some(flags.into());
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Flags to use for this request
    pub fn effective_flags<'a>(&'a self, default: &'a str) -> &'a str {
        self.flags.as_deref().unwrap_or(default)
    }
}

/// Opaque caller session, used only to correlate log lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionId(Option<String>);

impl SessionId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(Some(id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_deref().unwrap_or(NO_SESSION)
    }
}

impl From<Option<String>> for SessionId {
    fn from(id: Option<String>) -> Self {
        Self(id.filter(|id| !id.trim().is_empty()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static service metadata reported by the info operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: "NmapService".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// What happened when the engine ran
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success { stdout: String, stderr: String },
    TimedOut { limit: Duration },
    Failed { message: String },
}

impl ExecutionOutcome {
    /// Label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::TimedOut { .. } => "timeout",
            Self::Failed { .. } => "failed",
        }
    }
}

impl From<crate::error::Result<CapturedOutput>> for ExecutionOutcome {
    fn from(result: crate::error::Result<CapturedOutput>) -> Self {
        match result {
            Ok(output) => Self::Success {
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Err(GatewayError::Timeout { duration_secs, .. }) => Self::TimedOut {
                limit: Duration::from_secs(duration_secs),
            },
            Err(error) => Self::Failed {
                message: error.to_string(),
            },
        }
    }
}

/// Both output streams of a process that exited successfully
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Kind of a response content block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
}

/// One block of response content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub text: String,
}

/// The only shape ever returned to callers, success or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub content: Vec<ContentBlock>,
}

impl ScanResponse {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            content: vec![ContentBlock {
                kind: ContentKind::Text,
                text: text.into(),
            }],
        }
    }

    /// Text of the single content block
    pub fn as_text(&self) -> &str {
        self.content
            .first()
            .map(|block| block.text.as_str())
            .unwrap_or_default()
    }
}

/// Runs a fully built engine invocation
///
/// Implementations must never fail outright: every problem is reported
/// through [`ExecutionOutcome`].
#[async_trait]
pub trait CommandRunner {
    async fn execute(&self, invocation: &EngineInvocation) -> ExecutionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_names() {
        assert_eq!(OutputFormat::from("xml"), OutputFormat::Structured);
        assert_eq!(OutputFormat::from("structured"), OutputFormat::Structured);
        assert_eq!(OutputFormat::from("normal"), OutputFormat::Plain);
        assert_eq!(OutputFormat::from("plain"), OutputFormat::Plain);
        assert_eq!(OutputFormat::from("GREPABLE"), OutputFormat::Grepable);
        assert_eq!(OutputFormat::from("yaml"), OutputFormat::Structured);
    }

    #[test]
    fn test_scan_request_defaults() {
        let request: ScanRequest =
            serde_json::from_value(serde_json::json!({ "target": "example.com" })).unwrap();
        assert_eq!(request.flags, None);
        assert_eq!(request.output_format, OutputFormat::Structured);
        assert_eq!(request.effective_flags(DEFAULT_FLAGS), "-T4 -p 1-1000");
    }

    #[test]
    fn test_scan_request_wire_names() {
        let request: ScanRequest = serde_json::from_value(serde_json::json!({
            "target": "10.0.0.1",
            "flags": "-sV",
            "outputFormat": "grepable"
        }))
        .unwrap();
        assert_eq!(request.effective_flags(DEFAULT_FLAGS), "-sV");
        assert_eq!(request.output_format, OutputFormat::Grepable);
    }

    #[test]
    fn test_session_label() {
        assert_eq!(SessionId::anonymous().to_string(), "N/A");
        assert_eq!(SessionId::from(Some("  ".to_string())).as_str(), "N/A");
        assert_eq!(SessionId::new("abc").as_str(), "abc");
    }

    #[test]
    fn test_response_shape() {
        let response = ScanResponse::text("hello");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "content": [ { "type": "text", "text": "hello" } ] })
        );
        assert_eq!(response.as_text(), "hello");
    }

    #[test]
    fn test_outcome_from_timeout_error() {
        let result = Err(GatewayError::timeout("nmap scan", Duration::from_secs(5)));
        let outcome = ExecutionOutcome::from(result);
        assert_eq!(outcome, ExecutionOutcome::TimedOut { limit: Duration::from_secs(5) });
    }
}
