//! Engine location and per-process engine settings
//!
//! The engine path is resolved once before any request is served and is
//! read-only afterwards. Resolution never fails: when every lookup misses,
//! a hard-coded default is used and any problem surfaces later as an
//! execution failure.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::config::AppConfig;

/// Binary the gateway drives
pub const ENGINE_PROGRAM: &str = "nmap";

/// Used when no discovery strategy finds the engine
pub const DEFAULT_ENGINE_PATH: &str = "/usr/bin/nmap";

/// Ways of finding the engine, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    /// POSIX `which`
    Which,
    /// Windows-style `where`
    Where,
}

impl DiscoveryStrategy {
    pub const ORDER: [DiscoveryStrategy; 2] = [Self::Which, Self::Where];

    fn lookup_tool(&self) -> &'static str {
        match self {
            Self::Which => "which",
            Self::Where => "where",
        }
    }

    /// Ask the lookup tool for `program`, taking the first line it prints
    pub fn locate(&self, program: &str) -> Option<PathBuf> {
        let output = Command::new(self.lookup_tool())
            .arg(program)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
    }
}

/// Finds the engine executable
#[derive(Debug, Clone)]
pub struct EngineLocator {
    program: String,
    fallback: PathBuf,
}

impl Default for EngineLocator {
    fn default() -> Self {
        Self::new(ENGINE_PROGRAM, DEFAULT_ENGINE_PATH)
    }
}

impl EngineLocator {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(program: S, fallback: P) -> Self {
        Self {
            program: program.into(),
            fallback: fallback.into(),
        }
    }

    /// Resolve the engine path; an explicit path short-circuits discovery
    pub fn resolve(&self, explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
            info!("Using configured {} path: {}", self.program, path.display());
            return path.to_path_buf();
        }

        for strategy in DiscoveryStrategy::ORDER {
            match strategy.locate(&self.program) {
                Some(path) => {
                    info!("Found {} at: {}", self.program, path.display());
                    return path;
                }
                None => warn!(
                    "'{} {}' failed, trying next strategy",
                    strategy.lookup_tool(),
                    self.program
                ),
            }
        }

        info!(
            "{} not found via which/where, using default path: {}",
            self.program,
            self.fallback.display()
        );
        self.fallback.clone()
    }
}

/// Everything needed to invoke the engine, shared read-only by all requests
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub executable: PathBuf,
    pub datadir: String,
    pub default_flags: String,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl EngineSettings {
    /// Build settings from configuration, running path discovery once
    pub fn resolve(config: &AppConfig) -> Self {
        let executable = EngineLocator::default().resolve(config.engine.path.as_deref());
        let settings = Self::with_executable(config, executable);
        debug!(?settings, "Engine settings resolved");
        settings
    }

    /// Build settings around an already known executable
    pub fn with_executable<P: Into<PathBuf>>(config: &AppConfig, executable: P) -> Self {
        Self {
            executable: executable.into(),
            datadir: config.engine.datadir.clone(),
            default_flags: config.engine.default_flags.clone(),
            timeout: config.scan_timeout(),
            max_output_bytes: config.limits.max_output_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let locator = EngineLocator::default();
        let path = locator.resolve(Some(Path::new("/opt/nmap/bin/nmap")));
        assert_eq!(path, PathBuf::from("/opt/nmap/bin/nmap"));
    }

    #[test]
    fn test_missing_program_falls_back() {
        let locator = EngineLocator::new("nmap-gateway-no-such-program", "/fallback/nmap");
        assert_eq!(locator.resolve(None), PathBuf::from("/fallback/nmap"));
    }

    #[test]
    fn test_empty_explicit_path_is_ignored() {
        let locator = EngineLocator::new("nmap-gateway-no-such-program", "/fallback/nmap");
        assert_eq!(locator.resolve(Some(Path::new(""))), PathBuf::from("/fallback/nmap"));
    }

    #[test]
    fn test_settings_follow_config() {
        let config = AppConfig::default();
        let settings = EngineSettings::with_executable(&config, "/usr/local/bin/nmap");
        assert_eq!(settings.executable, PathBuf::from("/usr/local/bin/nmap"));
        assert_eq!(settings.datadir, "/usr/share/nmap");
        assert_eq!(settings.default_flags, "-T4 -p 1-1000");
        assert_eq!(settings.timeout, Duration::from_secs(300));
        assert_eq!(settings.max_output_bytes, 10 * 1024 * 1024);
    }
}
