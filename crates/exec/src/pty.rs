//! Pseudo-terminal execution.
//!
//! The command's stdin, stdout, and stderr are all the slave end of a PTY,
//! so `isatty` checks inside the command succeed. Output is read from the
//! master exactly as the line discipline produced it (`\r\n` line endings).

use portable_pty::{native_pty_system, PtyPair, PtySize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use substrate_exec_types::ExecError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capture::{OutputCapture, DRAIN_TIMEOUT};
use crate::process::ProcessGroupGuard;
use crate::shell::pty_command;

/// Capability query plus allocation for pseudo-terminals.
pub trait PtyBackend: Send + Sync {
    /// Whether PTY allocation works in this process. Decided at runtime and
    /// stable for the life of the process.
    fn is_supported(&self) -> bool;

    fn allocate(&self, size: PtySize) -> anyhow::Result<PtyPair>;
}

/// The operating system's PTY implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePty;

impl PtyBackend for NativePty {
    /// Decided once per process by a trial allocation.
    fn is_supported(&self) -> bool {
        static SUPPORTED: OnceLock<bool> = OnceLock::new();
        *SUPPORTED.get_or_init(|| match native_pty_system().openpty(default_pty_size()) {
            Ok(_pair) => true,
            Err(e) => {
                debug!(error = %e, "PTY allocation unavailable");
                false
            }
        })
    }

    fn allocate(&self, size: PtySize) -> anyhow::Result<PtyPair> {
        native_pty_system()
            .openpty(size)
            .map_err(|e| anyhow::anyhow!("failed to create PTY: {e}"))
    }
}

pub fn default_pty_size() -> PtySize {
    PtySize {
        rows: 24,
        cols: 80,
        pixel_width: 0,
        pixel_height: 0,
    }
}

pub(crate) fn unsupported_error() -> ExecError {
    ExecError::PlatformUnsupported(format!(
        "PTY execution is not supported on {}",
        std::env::consts::OS
    ))
}

/// A spawned PTY command: the master (which must outlive the child's use of
/// the terminal), its reader, and the child itself.
pub(crate) struct PtyProcess {
    pub(crate) master: Box<dyn portable_pty::MasterPty + Send>,
    pub(crate) reader: Box<dyn std::io::Read + Send>,
    pub(crate) child: Box<dyn portable_pty::Child + Send + Sync>,
}

/// Allocate a PTY and start `command` on its slave end.
pub(crate) fn spawn_on_pty(
    backend: &dyn PtyBackend,
    shell: &Path,
    command: &str,
) -> Result<PtyProcess, ExecError> {
    if !backend.is_supported() {
        return Err(unsupported_error());
    }

    let pair = backend
        .allocate(default_pty_size())
        .map_err(|e| ExecError::Launch(format!("{e:#}")))?;

    let cmd = pty_command(shell, command)
        .map_err(|e| ExecError::Launch(format!("failed to resolve working directory: {e}")))?;

    let child = pair.slave.spawn_command(cmd).map_err(|e| {
        ExecError::Launch(format!("failed to spawn {} on PTY: {e}", shell.display()))
    })?;
    // Only the child may hold the slave; otherwise the master never sees EOF.
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| ExecError::Launch(format!("failed to clone PTY reader: {e}")))?;

    Ok(PtyProcess {
        master: pair.master,
        reader,
        child,
    })
}

#[derive(Clone)]
pub struct PtyExecutor {
    shell: PathBuf,
    backend: Arc<dyn PtyBackend>,
}

impl std::fmt::Debug for PtyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyExecutor")
            .field("shell", &self.shell)
            .field("supported", &self.backend.is_supported())
            .finish()
    }
}

impl PtyExecutor {
    pub fn new(shell: impl Into<PathBuf>, backend: Arc<dyn PtyBackend>) -> Self {
        Self {
            shell: shell.into(),
            backend,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.backend.is_supported()
    }

    pub async fn run(&self, command: &str, deadline: Duration) -> Result<String, ExecError> {
        self.run_with_cancel(command, deadline, &CancellationToken::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        command: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        let exec_id = crate::new_exec_id();
        let started = Instant::now();

        let PtyProcess {
            master,
            reader,
            mut child,
        } = spawn_on_pty(self.backend.as_ref(), &self.shell, command)?;

        let pid = child.process_id();
        let mut guard = ProcessGroupGuard::new(pid);
        let mut killer = child.clone_killer();
        debug!(
            %exec_id,
            mode = "pty",
            pid,
            timeout_ms = deadline.as_millis() as u64,
            "spawned command"
        );

        let capture = OutputCapture::start(reader, "pty")?;
        let wait = tokio::task::spawn_blocking(move || child.wait());

        let status = tokio::select! {
            joined = wait => joined.map_err(std::io::Error::other)??,
            _ = tokio::time::sleep(deadline) => {
                guard.kill();
                let _ = killer.kill();
                drop(master);
                warn!(%exec_id, timeout_ms = deadline.as_millis() as u64, "PTY command timed out; process group killed");
                return Err(ExecError::Timeout { deadline });
            }
            _ = cancel.cancelled() => {
                guard.kill();
                let _ = killer.kill();
                drop(master);
                debug!(%exec_id, "PTY command cancelled; process group killed");
                return Err(ExecError::Cancelled);
            }
        };
        guard.kill();

        let raw = capture.finish(DRAIN_TIMEOUT).await;
        drop(master);
        let output = String::from_utf8_lossy(&raw).into_owned();
        debug!(
            %exec_id,
            exit_code = status.exit_code(),
            duration_ms = started.elapsed().as_millis() as u64,
            bytes = output.len(),
            "PTY command finished"
        );

        if status.success() {
            Ok(output)
        } else {
            Err(ExecError::Execution {
                exit_code: i32::try_from(status.exit_code()).ok(),
                output,
            })
        }
    }
}
