//! Syntactic request validation
//!
//! Targets must be a hostname, an IPv4 address or an IPv4 CIDR block. Flags
//! are deliberately not allow-listed: any option string whose first token
//! starts with `-` is accepted. Shell injection is prevented by passing the
//! engine an argument vector, not by this module.

use std::{net::Ipv4Addr, str::FromStr};

use crate::error::{GatewayError, Result};

const MAX_LABEL_LEN: usize = 63;
const MAX_PREFIX_LEN: u8 = 32;
const OPTION_MARKER: char = '-';

/// Grammar a valid target matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Ipv4,
    Cidr,
    Hostname,
}

impl TargetKind {
    /// Label for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Cidr => "cidr",
            Self::Hostname => "hostname",
        }
    }
}

/// Classify a target, or `None` when it matches no accepted grammar
pub fn classify_target(target: &str) -> Option<TargetKind> {
    if Ipv4Addr::from_str(target).is_ok() {
        Some(TargetKind::Ipv4)
    } else if is_ipv4_cidr(target) {
        Some(TargetKind::Cidr)
    } else if is_hostname(target) {
        Some(TargetKind::Hostname)
    } else {
        None
    }
}

pub fn validate_target(target: &str) -> bool {
    classify_target(target).is_some()
}

/// Validate a target, producing the caller-facing message on rejection
pub fn ensure_valid_target(target: &str) -> Result<TargetKind> {
    classify_target(target).ok_or_else(|| {
        GatewayError::validation(
            "target",
            format!(
                "Invalid target format: {}. Use domain names, IP addresses, or CIDR notation.",
                target
            ),
        )
    })
}

fn is_ipv4_cidr(target: &str) -> bool {
    let Some((address, prefix)) = target.split_once('/') else {
        return false;
    };

    let prefix_ok = (1..=2).contains(&prefix.len())
        && prefix.bytes().all(|b| b.is_ascii_digit())
        && prefix.parse::<u8>().map_or(false, |p| p <= MAX_PREFIX_LEN);

    prefix_ok && Ipv4Addr::from_str(address).is_ok()
}

fn is_hostname(target: &str) -> bool {
    !target.is_empty() && target.split('.').all(is_label)
}

fn is_label(label: &str) -> bool {
    (1..=MAX_LABEL_LEN).contains(&label.len())
        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        && !label.starts_with('-')
        && !label.ends_with('-')
}

/// Check that a flag string looks like engine options
///
/// Empty tokens produced by repeated whitespace are ignored.
pub fn validate_flags(flags: &str) -> bool {
    flags
        .split_whitespace()
        .next()
        .map_or(false, |first| first.starts_with(OPTION_MARKER))
}

/// Validate flags, producing the caller-facing message on rejection
pub fn ensure_valid_flags(flags: &str) -> Result<()> {
    if validate_flags(flags) {
        Ok(())
    } else {
        Err(GatewayError::validation(
            "flags",
            format!("Invalid or potentially unsafe flags detected: {}", flags),
        ))
    }
}
