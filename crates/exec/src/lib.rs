//! Timeout-tiered command execution for agents.
//!
//! A request runs in one of three modes: foreground (combined output pipe),
//! PTY (the command sees an interactive terminal), or background (detached,
//! output to files). [`Executor`] validates a request, resolves its deadline
//! from the [`TimeoutPolicy`], and routes it. Background commands are owned
//! by a [`supervisor`] process that outlives the caller.

pub mod background;
mod capture;
pub mod config;
pub mod dispatcher;
pub mod foreground;
pub mod logging;
pub mod process;
pub mod pty;
mod shell;
pub mod supervisor;
pub mod timeout;

pub use background::BackgroundLauncher;
pub use config::ExecConfig;
pub use dispatcher::{ExecOutcome, Executor};
pub use foreground::ForegroundExecutor;
pub use pty::{NativePty, PtyBackend, PtyExecutor};
pub use substrate_exec_types::{
    BackgroundHandle, ErrorResponse, ExecError, ExecutionRequest, TIMEOUT_MARKER,
};
pub use timeout::{resolve, TimeoutPolicy, TimeoutTier};

/// Correlation id attached to every log event of one execution.
pub fn new_exec_id() -> String {
    format!("exe_{}", uuid::Uuid::now_v7())
}
