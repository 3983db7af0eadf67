//! Command construction shared by every execution mode.

use portable_pty::CommandBuilder;
use std::path::Path;
use std::process::Stdio;
use substrate_common::{AGENT_MARKER_ENV, AGENT_MARKER_VALUE};

use crate::process::isolate_process_group;

const DEFAULT_TERM: &str = "xterm-256color";

/// `<shell> -c <command>` with the caller's environment plus the agent
/// marker, stdin closed, in its own process group. The direct child is
/// killed if its handle is dropped. Stdout/stderr are left for the caller to
/// wire up.
pub(crate) fn shell_command(shell: &Path, command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(shell);
    cmd.arg("-c");
    cmd.arg(command);
    cmd.env(AGENT_MARKER_ENV, AGENT_MARKER_VALUE);
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);
    isolate_process_group(&mut cmd);
    cmd
}

/// The PTY flavour of [`shell_command`]. The slave end becomes the child's
/// controlling terminal, so it leads its own session and process group.
pub(crate) fn pty_command(shell: &Path, command: &str) -> std::io::Result<CommandBuilder> {
    let mut cmd = CommandBuilder::new(shell);
    cmd.arg("-c");
    cmd.arg(command);
    // portable-pty otherwise starts in $HOME.
    cmd.cwd(std::env::current_dir()?);
    cmd.env(AGENT_MARKER_ENV, AGENT_MARKER_VALUE);

    match std::env::var("TERM") {
        Ok(term) if !term.is_empty() => cmd.env("TERM", term),
        _ => cmd.env("TERM", DEFAULT_TERM),
    };

    Ok(cmd)
}
