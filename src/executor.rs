//! Bounded engine execution
//!
//! The engine runs as a child process fed an argument vector, never a shell
//! string. Each run owns one wall-clock timer and one output budget shared
//! by stdout and stderr; exceeding either kills the child.

use async_trait::async_trait;
use std::{
    ffi::OsStr,
    path::Path,
    process::{ExitStatus, Stdio},
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    time::timeout,
};
use tracing::{debug, warn};

use crate::{
    command::EngineInvocation,
    core::{CapturedOutput, CommandRunner, ExecutionOutcome},
    engine::EngineSettings,
    error::{GatewayError, Result},
};

const READ_CHUNK: usize = 8 * 1024;

/// Runs engine invocations as real child processes
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Duration,
    max_output_bytes: usize,
}

impl ProcessExecutor {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.timeout, settings.max_output_bytes)
    }

    /// Run `program` with `args` under the configured limits
    ///
    /// Succeeds only on exit status 0. Anything written to stderr is kept
    /// but does not make the run fail.
    pub async fn run<S: AsRef<OsStr>>(&self, program: &Path, args: &[S]) -> Result<CapturedOutput> {
        let started = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GatewayError::execution(format!("Failed to start {}: {}", program.display(), e))
            })?;

        debug!(pid = ?child.id(), program = %program.display(), "Engine process started");

        let budget = OutputBudget::new(self.max_output_bytes);
        let captured = timeout(self.timeout, capture(&mut child, &budget)).await;

        match captured {
            Err(_) => {
                terminate(&mut child).await;
                warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Engine exceeded {}s budget and was terminated",
                    self.timeout.as_secs()
                );
                Err(GatewayError::timeout("nmap scan", self.timeout))
            }
            Ok(Err(error)) => {
                terminate(&mut child).await;
                Err(error)
            }
            Ok(Ok((stdout, stderr, status))) => {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    stdout_bytes = stdout.len(),
                    stderr_bytes = stderr.len(),
                    "Engine process exited with {}",
                    status
                );

                let stdout = String::from_utf8_lossy(&stdout).into_owned();
                let stderr = String::from_utf8_lossy(&stderr).into_owned();

                if status.success() {
                    Ok(CapturedOutput { stdout, stderr })
                } else {
                    Err(GatewayError::execution(exit_failure_message(status, &stderr)))
                }
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn execute(&self, invocation: &EngineInvocation) -> ExecutionOutcome {
        let args = invocation.args();
        self.run(&invocation.executable, args.as_slice()).await.into()
    }
}

/// Read both streams to the end, then reap the child
async fn capture(
    child: &mut Child,
    budget: &OutputBudget,
) -> Result<(Vec<u8>, Vec<u8>, ExitStatus)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| GatewayError::internal("executor", "stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| GatewayError::internal("executor", "stderr was not captured"))?;

    let (stdout, stderr) = tokio::try_join!(
        read_bounded(stdout, budget, "stdout"),
        read_bounded(stderr, budget, "stderr"),
    )?;

    let status = child
        .wait()
        .await
        .map_err(|e| GatewayError::io("waiting for engine", e.to_string()))?;

    Ok((stdout, stderr, status))
}

async fn read_bounded<R: AsyncRead + Unpin>(
    mut stream: R,
    budget: &OutputBudget,
    name: &str,
) -> Result<Vec<u8>> {
    let mut collected = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|e| GatewayError::io(format!("reading engine {}", name), e.to_string()))?;
        if read == 0 {
            return Ok(collected);
        }
        budget.consume(read)?;
        collected.extend_from_slice(&chunk[..read]);
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Engine process already gone: {}", e);
    }
}

fn exit_failure_message(status: ExitStatus, stderr: &str) -> String {
    let cause = match status.code() {
        Some(code) => format!("Command failed with exit code {}", code),
        None => "Command was terminated by a signal".to_string(),
    };

    let stderr = stderr.trim();
    if stderr.is_empty() {
        cause
    } else {
        format!("{}: {}", cause, stderr)
    }
}

/// Byte allowance shared by every stream of one run
#[derive(Debug)]
struct OutputBudget {
    limit: usize,
    used: AtomicUsize,
}

impl OutputBudget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    fn consume(&self, bytes: usize) -> Result<()> {
        let total = self.used.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if total > self.limit {
            Err(GatewayError::resource_limit(
                "engine output",
                format!("output exceeded the {} byte limit", self.limit),
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_success_captures_both_streams() {
        let executor = ProcessExecutor::new(Duration::from_secs(10), 1024);
        let output = executor
            .run(Path::new("sh"), &sh("echo report; echo 'Warning: slow host' >&2"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "report\n");
        assert_eq!(output.stderr, "Warning: slow host\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_the_child() {
        let executor = ProcessExecutor::new(Duration::from_millis(200), 1024);
        let started = Instant::now();
        let error = executor
            .run(Path::new("sh"), &sh("exec sleep 10"))
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_cap_is_a_failure() {
        let executor = ProcessExecutor::new(Duration::from_secs(10), 1000);
        let error = executor
            .run(Path::new("sh"), &sh("head -c 5000 /dev/zero"))
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::ResourceLimit { .. }));
    }

    #[tokio::test]
    async fn test_cap_counts_both_streams() {
        let executor = ProcessExecutor::new(Duration::from_secs(10), 1000);
        let error = executor
            .run(Path::new("sh"), &sh("head -c 600 /dev/zero; head -c 600 /dev/zero >&2"))
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::ResourceLimit { .. }));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_a_failure() {
        let executor = ProcessExecutor::new(Duration::from_secs(10), 1024);
        let error = executor
            .run(Path::new("sh"), &sh("echo 'Failed to resolve host' >&2; exit 2"))
            .await
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Execution error: Command failed with exit code 2: Failed to resolve host"
        );
    }

    #[tokio::test]
    async fn test_spawn_error_is_a_failure() {
        let executor = ProcessExecutor::new(Duration::from_secs(10), 1024);
        let invocation = EngineInvocation {
            executable: "/nonexistent/nmap".into(),
            datadir: "/usr/share/nmap".to_string(),
            output_mode_arg: "-oX",
            flags: vec!["-sn".to_string()],
            target: "127.0.0.1".to_string(),
        };
        match executor.execute(&invocation).await {
            ExecutionOutcome::Failed { message } => {
                assert!(message.contains("Failed to start /nonexistent/nmap"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        let executor = ProcessExecutor::new(Duration::from_secs(10), 1024);
        let output = executor
            .run(Path::new("echo"), &["$(whoami)", ";", "`id`"])
            .await
            .unwrap();
        assert_eq!(output.stdout, "$(whoami) ; `id`\n");
    }
}
