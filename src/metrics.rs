//! Scan metrics
//!
//! Counters are kept in-process for the stats snapshot and mirrored to the
//! `metrics` facade, which is a no-op until an exporter installs a recorder.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use crate::{error::GatewayError, normalize::ReportKind};

/// Per-process scan counters
#[derive(Debug)]
pub struct ScanMetrics {
    since: DateTime<Utc>,
    started_at: Instant,
    scans_started: AtomicU64,
    scans_rejected: AtomicU64,
    scans_succeeded: AtomicU64,
    scans_failed: AtomicU64,
    scans_timed_out: AtomicU64,
    parse_fallbacks: AtomicU64,
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self {
            since: Utc::now(),
            started_at: Instant::now(),
            scans_started: AtomicU64::new(0),
            scans_rejected: AtomicU64::new(0),
            scans_succeeded: AtomicU64::new(0),
            scans_failed: AtomicU64::new(0),
            scans_timed_out: AtomicU64::new(0),
            parse_fallbacks: AtomicU64::new(0),
        }
    }

    pub fn record_started(&self) {
        self.scans_started.fetch_add(1, Ordering::Relaxed);
        counter!("nmap_scans_started_total").increment(1);
    }

    /// A request that never reached the engine
    pub fn record_rejected(&self, error: &GatewayError) {
        self.scans_rejected.fetch_add(1, Ordering::Relaxed);
        counter!("nmap_scans_rejected_total", "kind" => error.kind()).increment(1);
    }

    /// A request that ran the engine, however it ended
    pub fn record_completed(&self, kind: ReportKind, outcome: &'static str, duration: Duration) {
        match kind {
            ReportKind::Failure => {
                self.scans_failed.fetch_add(1, Ordering::Relaxed);
                if outcome == "timeout" {
                    self.scans_timed_out.fetch_add(1, Ordering::Relaxed);
                }
                counter!("nmap_scans_failed_total", "outcome" => outcome).increment(1);
            }
            ReportKind::RawFallback => {
                self.scans_succeeded.fetch_add(1, Ordering::Relaxed);
                self.parse_fallbacks.fetch_add(1, Ordering::Relaxed);
                counter!("nmap_scans_succeeded_total", "report" => kind.as_str()).increment(1);
            }
            ReportKind::Structured | ReportKind::Text => {
                self.scans_succeeded.fetch_add(1, Ordering::Relaxed);
                counter!("nmap_scans_succeeded_total", "report" => kind.as_str()).increment(1);
            }
        }
        histogram!("nmap_scan_duration_seconds").record(duration.as_secs_f64());
    }

    /// A request that failed outside the normal pipeline
    pub fn record_internal_failure(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
        counter!("nmap_scans_failed_total", "outcome" => "internal").increment(1);
    }

    pub fn snapshot(&self) -> ScanStats {
        ScanStats {
            scans_started: self.scans_started.load(Ordering::Relaxed),
            scans_rejected: self.scans_rejected.load(Ordering::Relaxed),
            scans_succeeded: self.scans_succeeded.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            scans_timed_out: self.scans_timed_out.load(Ordering::Relaxed),
            parse_fallbacks: self.parse_fallbacks.load(Ordering::Relaxed),
            since: self.since,
            uptime: self.started_at.elapsed(),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanStats {
    pub scans_started: u64,
    pub scans_rejected: u64,
    pub scans_succeeded: u64,
    pub scans_failed: u64,
    /// Subset of `scans_failed`
    pub scans_timed_out: u64,
    pub parse_fallbacks: u64,
    /// When counting began
    pub since: DateTime<Utc>,
    pub uptime: Duration,
}
