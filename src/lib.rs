//! # nmap-gateway - Safe, Bounded Access to the Nmap Scanner
//!
//! Accepts scan requests from untrusted callers, validates them, runs nmap
//! as a bounded child process and returns a normalized text report.
//!
//! ## Pipeline
//!
//! - **Validation**: targets must be a host name, IPv4 address or CIDR range;
//!   flag strings must start with an option
//! - **Command construction**: an argument vector, never a shell string
//! - **Bounded execution**: wall-clock timeout and a combined output cap,
//!   both enforced by killing the child
//! - **Normalization**: XML reports become a summary plus the full document
//!   as JSON, falling back to the raw text; other formats pass through
//!
//! Every request ends in a [`ScanResponse`], whether it succeeded or not.

pub mod cli;
pub mod command;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod mcp;
pub mod metrics;
pub mod normalize;
pub mod service;
pub mod validation;

// Re-exports for convenience
pub use crate::{
    config::AppConfig,
    core::{OutputFormat, ScanRequest, ScanResponse, SessionId},
    error::{GatewayError, Result},
    service::ScanService,
};
