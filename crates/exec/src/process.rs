//! Process-group control shared by the executors.
//!
//! Every spawned command leads its own process group (pgid == pid), so a
//! single `killpg` reaches the shell and anything it forked.

use std::io;
use tracing::{debug, warn};

/// Put the child in a fresh process group.
pub(crate) fn isolate_process_group(cmd: &mut tokio::process::Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// SIGKILL the whole process group led by `pid`. A group that no longer
/// exists is not an error.
#[cfg(unix)]
pub fn kill_process_group(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pid {pid} out of range"),
        ));
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Process groups do not exist here; callers must kill the child directly.
#[cfg(not(unix))]
pub fn kill_process_group(pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot kill process group {pid}: process groups are unix-only"),
    ))
}

/// Kills the process group when dropped, unless already killed. Dropping an
/// in-flight execution future therefore never orphans its processes.
pub(crate) struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    pub(crate) fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    /// Kill now; later calls and the drop are no-ops.
    pub(crate) fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            match kill_process_group(pid) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                    debug!(pid, "no process group to kill; relying on direct child kill");
                }
                Err(e) => warn!(pid, error = %e, "failed to kill process group"),
            }
        }
    }

}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid {
            debug!(pid, "execution dropped before completion; killing process group");
            self.kill();
        }
    }
}
