//! Detached background launches.
//!
//! `launch` returns as soon as the command is running. Output goes to files
//! in a fresh per-launch directory. A separate supervisor process (see
//! [`crate::supervisor`]) owns the command from then on and enforces the
//! background deadline, so neither the caller's runtime nor the caller's
//! process needs to stay alive.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use substrate_common::paths::{background_root, BACKGROUND_DIR_PREFIX};
use substrate_exec_types::{BackgroundHandle, ExecError};
use tracing::{debug, info, warn};

use crate::pty::PtyBackend;
use crate::supervisor::{SuperviseArgs, ERROR_PREFIX, READY_PREFIX};
use crate::timeout::TimeoutPolicy;

pub const STDOUT_FILE_NAME: &str = "stdout.log";
pub const STDERR_FILE_NAME: &str = "stderr.log";
/// The supervisor's own log, next to the command's output.
pub const SUPERVISOR_LOG_FILE_NAME: &str = "supervisor.log";

#[derive(Clone)]
pub struct BackgroundLauncher {
    shell: PathBuf,
    backend: Arc<dyn PtyBackend>,
    supervisor: Option<PathBuf>,
}

impl std::fmt::Debug for BackgroundLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundLauncher")
            .field("shell", &self.shell)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl BackgroundLauncher {
    /// The supervisor defaults to the current executable, which must call
    /// [`crate::supervisor::run`] when [`crate::supervisor::is_requested`].
    pub fn new(shell: impl Into<PathBuf>, backend: Arc<dyn PtyBackend>) -> Self {
        Self {
            shell: shell.into(),
            backend,
            supervisor: None,
        }
    }

    /// Use `program` (e.g. `substrate-exec-supervisor`) as the supervisor.
    pub fn with_supervisor(mut self, program: impl Into<PathBuf>) -> Self {
        self.supervisor = Some(program.into());
        self
    }

    /// Start `command` detached and return its pid and output files.
    ///
    /// The command is killed if it is still running once the policy's
    /// background tier has elapsed, whether or not the caller still exists.
    /// With `pty`, stdout and stderr are merged by the terminal and land in
    /// the stdout file.
    pub fn launch(
        &self,
        command: &str,
        pty: bool,
        policy: &TimeoutPolicy,
    ) -> Result<BackgroundHandle, ExecError> {
        if pty && !self.backend.is_supported() {
            return Err(crate::pty::unsupported_error());
        }
        let program = self.supervisor_program()?;
        let exec_id = crate::new_exec_id();
        let deadline = policy.background();

        let dir = create_output_dir()?;
        let stdout_file = dir.join(STDOUT_FILE_NAME);
        let stderr_file = dir.join(STDERR_FILE_NAME);

        let args = SuperviseArgs {
            shell: self.shell.clone(),
            stdout_file: stdout_file.clone(),
            stderr_file: stderr_file.clone(),
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            pty,
            exec_id: exec_id.clone(),
            command: command.to_string(),
        };

        let pid = match start_supervisor(&program, &dir, &args) {
            Ok(pid) => pid,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&dir);
                return Err(e);
            }
        };

        info!(
            %exec_id,
            pid,
            pty,
            timeout_ms = args.timeout_ms,
            dir = %dir.display(),
            "launched background command"
        );

        Ok(BackgroundHandle {
            pid,
            stdout_file,
            stderr_file,
        })
    }

    fn supervisor_program(&self) -> Result<PathBuf, ExecError> {
        match &self.supervisor {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(|e| {
                ExecError::Launch(format!("failed to locate supervisor executable: {e}"))
            }),
        }
    }
}

/// Create the output files, start the supervisor, and wait for it to report
/// the command's pid.
fn start_supervisor(program: &Path, dir: &Path, args: &SuperviseArgs) -> Result<u32, ExecError> {
    create_log(&args.stdout_file)?;
    create_log(&args.stderr_file)?;
    let log = create_log(&dir.join(SUPERVISOR_LOG_FILE_NAME))?;

    let mut supervisor = Command::new(program)
        .args(args.to_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::from(log))
        .spawn()
        .map_err(|e| {
            ExecError::Launch(format!(
                "failed to start supervisor {}: {e}",
                program.display()
            ))
        })?;

    match read_report(&mut supervisor) {
        Ok(pid) => {
            reap_when_done(supervisor, &args.exec_id);
            Ok(pid)
        }
        Err(e) => {
            let _ = supervisor.kill();
            let _ = supervisor.wait();
            Err(e)
        }
    }
}

fn read_report(supervisor: &mut Child) -> Result<u32, ExecError> {
    let stdout = supervisor
        .stdout
        .take()
        .ok_or_else(|| ExecError::Launch("supervisor stdout was not captured".to_string()))?;

    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .map_err(|e| ExecError::Launch(format!("failed to read supervisor report: {e}")))?;
    let line = line.trim_end();

    if let Some(pid) = line.strip_prefix(READY_PREFIX) {
        return pid
            .parse()
            .map_err(|e| ExecError::Launch(format!("supervisor reported invalid pid {pid:?}: {e}")));
    }
    match line.strip_prefix(ERROR_PREFIX) {
        Some(message) => Err(ExecError::Launch(message.to_string())),
        None => Err(ExecError::Launch(
            "supervisor exited before starting the command".to_string(),
        )),
    }
}

/// The supervisor is our child until it exits; wait on it off-thread so it
/// never lingers as a zombie.
fn reap_when_done(mut supervisor: Child, exec_id: &str) {
    let exec_id = exec_id.to_string();
    let spawned = std::thread::Builder::new()
        .name("substrate-bg-reaper".to_string())
        .spawn(move || match supervisor.wait() {
            Ok(status) => debug!(%exec_id, code = status.code(), "supervisor exited"),
            Err(e) => warn!(%exec_id, error = %e, "failed to wait for supervisor"),
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to start supervisor reaper thread");
    }
}

fn create_output_dir() -> Result<PathBuf, ExecError> {
    let dir = tempfile::Builder::new()
        .prefix(BACKGROUND_DIR_PREFIX)
        .tempdir_in(background_root())
        .map_err(|e| ExecError::Launch(format!("failed to create output directory: {e}")))?;
    // Ownership of the directory passes to the caller.
    #[allow(deprecated)]
    let path = dir.into_path();
    Ok(path)
}

fn create_log(path: &Path) -> Result<File, ExecError> {
    File::create(path)
        .map_err(|e| ExecError::Launch(format!("failed to create {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_pty::{PtyPair, PtySize};

    struct NoPty;

    impl PtyBackend for NoPty {
        fn is_supported(&self) -> bool {
            false
        }

        fn allocate(&self, _size: PtySize) -> anyhow::Result<PtyPair> {
            anyhow::bail!("unsupported")
        }
    }

    #[test]
    fn test_missing_supervisor_is_launch_error() {
        let err = BackgroundLauncher::new("sh", Arc::new(NoPty))
            .with_supervisor("/nonexistent/substrate-exec-supervisor")
            .launch("true", false, &TimeoutPolicy::default())
            .unwrap_err();
        assert_eq!(err.kind(), "launch");
        assert!(err.to_string().contains("failed to start supervisor"));
    }

    #[test]
    fn test_pty_unsupported_fails_before_any_setup() {
        let err = BackgroundLauncher::new("sh", Arc::new(NoPty))
            .with_supervisor("/nonexistent/substrate-exec-supervisor")
            .launch("true", true, &TimeoutPolicy::default())
            .unwrap_err();
        assert_eq!(err.kind(), "platform_unsupported");
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_supervisor_is_launch_error() {
        // `true` ignores its arguments and exits without reporting.
        let err = BackgroundLauncher::new("sh", Arc::new(NoPty))
            .with_supervisor("true")
            .launch("echo hi", false, &TimeoutPolicy::default())
            .unwrap_err();
        assert_eq!(err.kind(), "launch");
        assert!(err.to_string().contains("before starting the command"));
    }
}
