//! Out-of-process owner of a background command.
//!
//! [`BackgroundLauncher`](crate::BackgroundLauncher) starts a supervisor
//! program with [`SUPERVISE_ARG`] as its first argument. The supervisor
//! leaves the caller's session, starts the command, reports the command's
//! pid on stdout, and then holds the command (and its PTY master, if any)
//! until it exits or the background tier elapses. It does not depend on the
//! launching process staying alive.
//!
//! Any binary that launches background commands with the default supervisor
//! (its own executable) must hand control over early in `main`:
//!
//! ```no_run
//! fn main() -> anyhow::Result<()> {
//!     if substrate_exec_core::supervisor::is_requested() {
//!         return substrate_exec_core::supervisor::run();
//!     }
//!     // ...
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::DRAIN_TIMEOUT;
use crate::process::kill_process_group;
use crate::pty::{spawn_on_pty, NativePty, PtyProcess};
use crate::shell::shell_command;

/// First argument that switches a binary into supervisor mode.
pub const SUPERVISE_ARG: &str = "__substrate-exec-supervise";

/// Line written on stdout once the command is running: `pid <n>`.
pub(crate) const READY_PREFIX: &str = "pid ";
/// Line written on stdout when the command could not be started.
pub(crate) const ERROR_PREFIX: &str = "error ";

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = SUPERVISE_ARG)]
pub(crate) struct SuperviseArgs {
    #[arg(long = "shell", value_name = "PATH")]
    pub(crate) shell: PathBuf,

    #[arg(long = "stdout", value_name = "FILE")]
    pub(crate) stdout_file: PathBuf,

    #[arg(long = "stderr", value_name = "FILE")]
    pub(crate) stderr_file: PathBuf,

    #[arg(long = "timeout-ms", value_name = "MS")]
    pub(crate) timeout_ms: u64,

    #[arg(long = "pty")]
    pub(crate) pty: bool,

    #[arg(long = "exec-id", value_name = "ID")]
    pub(crate) exec_id: String,

    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub(crate) command: String,
}

impl SuperviseArgs {
    /// Argument vector (after the program name) that parses back into `self`.
    pub(crate) fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            SUPERVISE_ARG.into(),
            "--shell".into(),
            self.shell.clone().into(),
            "--stdout".into(),
            self.stdout_file.clone().into(),
            "--stderr".into(),
            self.stderr_file.clone().into(),
            "--timeout-ms".into(),
            self.timeout_ms.to_string().into(),
            "--exec-id".into(),
            self.exec_id.clone().into(),
        ];
        if self.pty {
            args.push("--pty".into());
        }
        args.push("--".into());
        args.push(self.command.clone().into());
        args
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Whether this process was started as a supervisor.
pub fn is_requested() -> bool {
    std::env::args_os()
        .nth(1)
        .is_some_and(|arg| arg == SUPERVISE_ARG)
}

/// Supervisor entry point. Returns once the command has exited or been
/// killed.
pub fn run() -> Result<()> {
    let args = SuperviseArgs::try_parse_from(std::env::args_os().skip(1))
        .context("invalid supervisor arguments")?;
    // stderr is the per-launch supervisor log; a second init is harmless.
    let _ = crate::logging::init();

    #[cfg(unix)]
    if let Err(e) = nix::unistd::setsid() {
        debug!(error = %e, "setsid failed; staying in the launcher's session");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build supervisor runtime")?;
    let _entered = runtime.enter();

    let running = match start(&args) {
        Ok(running) => running,
        Err(e) => {
            report(&format!("{ERROR_PREFIX}{e:#}"));
            return Err(e);
        }
    };
    report(&format!("{READY_PREFIX}{}", running.pid()));
    info!(
        exec_id = %args.exec_id,
        pid = running.pid(),
        pty = args.pty,
        timeout_ms = args.timeout_ms,
        "supervising background command"
    );

    runtime.block_on(running.supervise(args.deadline(), &args.exec_id));
    Ok(())
}

fn report(line: &str) {
    let mut stdout = io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
        warn!(error = %e, "failed to report to launcher");
    }
}

fn open_log(path: &Path) -> Result<File> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

enum Running {
    Plain {
        child: tokio::process::Child,
        pid: u32,
    },
    Pty {
        process: Box<dyn portable_pty::Child + Send + Sync>,
        master: Box<dyn portable_pty::MasterPty + Send>,
        pid: u32,
        pump_done: mpsc::Receiver<()>,
    },
}

fn start(args: &SuperviseArgs) -> Result<Running> {
    if args.pty {
        start_pty(args)
    } else {
        start_plain(args)
    }
}

fn start_plain(args: &SuperviseArgs) -> Result<Running> {
    let stdout = open_log(&args.stdout_file)?;
    let stderr = open_log(&args.stderr_file)?;

    let spawned = {
        let mut cmd = shell_command(&args.shell, &args.command);
        cmd.stdout(Stdio::from(stdout));
        cmd.stderr(Stdio::from(stderr));
        cmd.spawn()
    };
    let child = spawned.with_context(|| format!("failed to spawn {}", args.shell.display()))?;
    let pid = child
        .id()
        .context("command exited before its pid could be read")?;
    Ok(Running::Plain { child, pid })
}

fn start_pty(args: &SuperviseArgs) -> Result<Running> {
    let mut stdout = open_log(&args.stdout_file)?;
    let PtyProcess {
        master,
        mut reader,
        child,
    } = spawn_on_pty(&NativePty, &args.shell, &args.command)?;
    let pid = child.process_id().context("PTY child has no pid")?;

    let (done_tx, pump_done) = mpsc::channel();
    let exec_id = args.exec_id.clone();
    std::thread::Builder::new()
        .name("substrate-bg-pty-pump".to_string())
        .spawn(move || {
            // Ends with EIO once the terminal closes.
            if let Err(e) = io::copy(&mut reader, &mut stdout) {
                debug!(%exec_id, error = %e, "PTY output pump stopped");
            }
            let _ = done_tx.send(());
        })
        .context("failed to start PTY output pump")?;

    Ok(Running::Pty {
        process: child,
        master,
        pid,
        pump_done,
    })
}

impl Running {
    fn pid(&self) -> u32 {
        match self {
            Running::Plain { pid, .. } | Running::Pty { pid, .. } => *pid,
        }
    }

    async fn supervise(self, deadline: Duration, exec_id: &str) {
        let started = Instant::now();
        match self {
            Running::Plain { mut child, pid } => {
                tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) => info!(
                            exec_id,
                            pid,
                            exit_code = status.code(),
                            duration_ms = started.elapsed().as_millis() as u64,
                            "background command exited"
                        ),
                        Err(e) => warn!(exec_id, pid, error = %e, "failed to wait for background command"),
                    },
                    _ = tokio::time::sleep(deadline) => {
                        kill_group(pid, exec_id);
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        warn!(
                            exec_id,
                            pid,
                            timeout_ms = deadline.as_millis() as u64,
                            "background command timed out; process group killed"
                        );
                    }
                }
            }
            Running::Pty {
                mut process,
                master,
                pid,
                pump_done,
            } => {
                let mut killer = process.clone_killer();
                let mut wait = tokio::task::spawn_blocking(move || process.wait());

                tokio::select! {
                    joined = &mut wait => match joined {
                        Ok(Ok(status)) => info!(
                            exec_id,
                            pid,
                            exit_code = status.exit_code(),
                            duration_ms = started.elapsed().as_millis() as u64,
                            "background PTY command exited"
                        ),
                        Ok(Err(e)) => warn!(exec_id, pid, error = %e, "failed to wait for background PTY command"),
                        Err(e) => warn!(exec_id, pid, error = %e, "background PTY wait task failed"),
                    },
                    _ = tokio::time::sleep(deadline) => {
                        kill_group(pid, exec_id);
                        let _ = killer.kill();
                        let _ = wait.await;
                        warn!(
                            exec_id,
                            pid,
                            timeout_ms = deadline.as_millis() as u64,
                            "background PTY command timed out; process group killed"
                        );
                    }
                }

                // The terminal may still hold output the pump has not copied.
                let drained =
                    tokio::task::spawn_blocking(move || pump_done.recv_timeout(DRAIN_TIMEOUT))
                        .await;
                if !matches!(drained, Ok(Ok(()))) {
                    debug!(exec_id, "PTY output pump still running at exit");
                }
                drop(master);
            }
        }
    }
}

fn kill_group(pid: u32, exec_id: &str) {
    match kill_process_group(pid) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::Unsupported => {}
        Err(e) => warn!(exec_id, pid, error = %e, "failed to kill background process group"),
    }
}
