//! Synchronous (from the caller's view) execution under a deadline.
//!
//! stdout and stderr are both attached to the write end of one pipe, so the
//! captured text keeps the exact order in which the command wrote to either
//! stream.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use substrate_exec_types::ExecError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capture::{OutputCapture, DRAIN_TIMEOUT};
use crate::process::ProcessGroupGuard;
use crate::shell::shell_command;

#[derive(Debug, Clone)]
pub struct ForegroundExecutor {
    shell: PathBuf,
}

impl ForegroundExecutor {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Run `command` to completion or until `deadline` elapses.
    pub async fn run(&self, command: &str, deadline: Duration) -> Result<String, ExecError> {
        self.run_with_cancel(command, deadline, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but `cancel` also terminates the command.
    pub async fn run_with_cancel(
        &self,
        command: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        let exec_id = crate::new_exec_id();
        let started = Instant::now();

        let (reader, writer) = std::io::pipe()
            .map_err(|e| ExecError::Launch(format!("failed to create output pipe: {e}")))?;
        let stderr_writer = writer
            .try_clone()
            .map_err(|e| ExecError::Launch(format!("failed to duplicate output pipe: {e}")))?;

        let spawned = {
            let mut cmd = shell_command(&self.shell, command);
            cmd.stdout(Stdio::from(writer));
            cmd.stderr(Stdio::from(stderr_writer));
            // The command (and its copies of the write end) is dropped at the
            // end of this block so the reader sees EOF when the child exits.
            cmd.spawn()
        };
        let mut child = spawned.map_err(|e| {
            ExecError::Launch(format!("failed to spawn {}: {e}", self.shell.display()))
        })?;

        let mut guard = ProcessGroupGuard::new(child.id());
        debug!(
            %exec_id,
            mode = "foreground",
            pid = child.id(),
            timeout_ms = deadline.as_millis() as u64,
            "spawned command"
        );

        let capture = OutputCapture::start(reader, "combined")?;

        let status: ExitStatus = tokio::select! {
            status = child.wait() => status?,
            _ = tokio::time::sleep(deadline) => {
                guard.kill();
                let _ = child.start_kill();
                let _ = child.wait().await;
                warn!(%exec_id, timeout_ms = deadline.as_millis() as u64, "command timed out; process group killed");
                return Err(ExecError::Timeout { deadline });
            }
            _ = cancel.cancelled() => {
                guard.kill();
                let _ = child.start_kill();
                let _ = child.wait().await;
                debug!(%exec_id, "command cancelled; process group killed");
                return Err(ExecError::Cancelled);
            }
        };
        // Anything the command left running in its group would hold the pipe
        // open and outlive the call.
        guard.kill();

        let output = String::from_utf8_lossy(&capture.finish(DRAIN_TIMEOUT).await).into_owned();
        debug!(
            %exec_id,
            exit_code = status.code(),
            duration_ms = started.elapsed().as_millis() as u64,
            bytes = output.len(),
            "command finished"
        );

        if status.success() {
            Ok(output)
        } else {
            Err(ExecError::Execution {
                exit_code: status.code(),
                output,
            })
        }
    }
}
