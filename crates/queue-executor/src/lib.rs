//! The `JobExecutor`: the opaque "run a command string, return an outcome"
//! primitive Workers hand jobs to (spec §4.2, out of the core's scope but
//! implemented here since a worker needs *something* to call).
//!
//! Commands are run through `sh -c`, so `&&`, redirection, and quoting all
//! work the way a user typing the command at a shell prompt would expect
//! (spec §9's open question on shell semantics).

mod process_group;

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

/// Conventional shell exit code for "command timed out".
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Bound on how much of a command's stderr we keep around (spec §4.2's
/// "bounded-length stderr tail").
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to wait on child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// The result of running one job's command.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stderr_tail: String,
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// A short, human-readable summary suitable for `Job::last_error`
    /// (spec §4.2 step (e): "exit code and a bounded-length stderr tail").
    pub fn summary(&self) -> String {
        if self.stderr_tail.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            format!("exit code {}: {}", self.exit_code, self.stderr_tail.trim())
        }
    }
}

/// Opaque collaborator: runs a command string, returns its outcome.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> Result<ExecutionOutcome, ExecutorError>;
}

/// Runs commands via `sh -c`, optionally enforcing a global per-command timeout.
pub struct ShellExecutor {
    timeout: Option<Duration>,
}

impl ShellExecutor {
    /// `timeout: None` means commands may run indefinitely (spec §4.2 default).
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl JobExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> Result<ExecutionOutcome, ExecutorError> {
        let started = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        process_group::set_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(ExecutorError::Spawn)?;
        let pid = child.id();
        let mut stderr = child.stderr.take();

        let wait = async {
            let status = child.wait().await.map_err(ExecutorError::Wait)?;
            let mut buf = Vec::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            Ok::<_, ExecutorError>((status, buf))
        };

        let (status, stderr_bytes) = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(command, timeout_secs = timeout.as_secs(), "command timed out");
                    if let Some(pid) = pid {
                        process_group::kill_process_group(pid);
                    }
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return Ok(ExecutionOutcome {
                        exit_code: TIMEOUT_EXIT_CODE,
                        stderr_tail: "command timed out".to_string(),
                        duration: started.elapsed(),
                    });
                }
            },
            None => wait.await?,
        };

        let stderr_tail = tail(&stderr_bytes, STDERR_TAIL_BYTES);

        Ok(ExecutionOutcome {
            exit_code: status.code().unwrap_or(TIMEOUT_EXIT_CODE),
            stderr_tail,
            duration: started.elapsed(),
        })
    }
}

/// Keeps only the trailing `max_bytes` of `data`, lossily decoded as UTF-8.
fn tail(data: &[u8], max_bytes: usize) -> String {
    let start = data.len().saturating_sub(max_bytes);
    String::from_utf8_lossy(&data[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_on_zero_exit() {
        let exec = ShellExecutor::new(None);
        let outcome = exec.execute("exit 0").await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn captures_exit_code_and_stderr() {
        let exec = ShellExecutor::new(None);
        let outcome = exec.execute("echo boom 1>&2; exit 7").await.unwrap();
        assert_eq!(outcome.exit_code, 7);
        assert!(outcome.stderr_tail.contains("boom"));
    }

    #[tokio::test]
    async fn supports_shell_conjunctions() {
        let exec = ShellExecutor::new(None);
        let outcome = exec.execute("true && exit 0").await.unwrap();
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn times_out_long_running_commands() {
        let exec = ShellExecutor::new(Some(Duration::from_millis(100)));
        let outcome = exec.execute("sleep 5").await.unwrap();
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn truncates_long_stderr_to_tail() {
        let exec = ShellExecutor::new(None);
        let outcome = exec
            .execute("yes e 2>&1 1>/dev/null | head -c 100000 1>&2; exit 1")
            .await
            .unwrap();
        assert!(outcome.stderr_tail.len() <= STDERR_TAIL_BYTES);
    }
}
