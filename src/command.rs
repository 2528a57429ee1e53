//! Engine command construction
//!
//! Pure mapping from a validated request to the engine's argument vector:
//! `--datadir <dir> <output-mode> - <flags…> <target>`.

use std::path::PathBuf;

use crate::{core::OutputFormat, engine::EngineSettings};

const DATADIR_ARG: &str = "--datadir";
const STDOUT_DESTINATION: &str = "-";

/// Output-mode argument the engine expects for a format
pub fn output_mode_arg(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Structured => "-oX",
        OutputFormat::Plain => "-oN",
        OutputFormat::Grepable => "-oG",
    }
}

/// A fully resolved engine call, built fresh for every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    pub executable: PathBuf,
    pub datadir: String,
    pub output_mode_arg: &'static str,
    pub flags: Vec<String>,
    pub target: String,
}

impl EngineInvocation {
    /// Arguments in the order the engine receives them
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.flags.len() + 5);
        args.push(DATADIR_ARG.to_string());
        args.push(self.datadir.clone());
        args.push(self.output_mode_arg.to_string());
        args.push(STDOUT_DESTINATION.to_string());
        args.extend(self.flags.iter().cloned());
        args.push(self.target.clone());
        args
    }

    /// Human-readable command line, for logs only
    pub fn command_line(&self) -> String {
        let mut line = self.executable.display().to_string();
        for arg in self.args() {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }
}

/// Build the invocation; inputs are assumed to be validated already
pub fn build(
    engine: &EngineSettings,
    target: &str,
    flags: &str,
    format: OutputFormat,
) -> EngineInvocation {
    EngineInvocation {
        executable: engine.executable.clone(),
        datadir: engine.datadir.clone(),
        output_mode_arg: output_mode_arg(format),
        flags: flags.split_whitespace().map(str::to_string).collect(),
        target: target.to_string(),
    }
}
