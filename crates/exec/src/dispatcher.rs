//! Request routing: validate, pick the timeout tier, run in the requested
//! mode.

use std::path::PathBuf;
use std::sync::Arc;
use substrate_exec_types::{BackgroundHandle, ExecError, ExecutionRequest};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::background::BackgroundLauncher;
use crate::config::ExecConfig;
use crate::foreground::ForegroundExecutor;
use crate::pty::{NativePty, PtyBackend, PtyExecutor};
use crate::timeout::{self, TimeoutTier};

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Captured output of a foreground or PTY run.
    Output(String),
    Background(BackgroundHandle),
}

impl ExecOutcome {
    /// Text returned to the tool caller: the output itself, or the handle as
    /// JSON.
    pub fn into_text(self) -> String {
        match self {
            ExecOutcome::Output(output) => output,
            ExecOutcome::Background(handle) => handle.to_json(),
        }
    }
}

/// Stateless dispatcher over the three execution modes.
#[derive(Debug, Clone)]
pub struct Executor {
    config: ExecConfig,
    foreground: ForegroundExecutor,
    pty: PtyExecutor,
    background: BackgroundLauncher,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecConfig::default())
    }
}

impl Executor {
    pub fn new(config: ExecConfig) -> Self {
        Self::with_pty_backend(config, Arc::new(NativePty))
    }

    pub fn with_pty_backend(config: ExecConfig, backend: Arc<dyn PtyBackend>) -> Self {
        Self {
            foreground: ForegroundExecutor::new(config.shell.clone()),
            pty: PtyExecutor::new(config.shell.clone(), Arc::clone(&backend)),
            background: BackgroundLauncher::new(config.shell.clone(), backend),
            config,
        }
    }

    /// Supervisor program for background launches; see
    /// [`BackgroundLauncher::with_supervisor`].
    pub fn with_supervisor(mut self, program: impl Into<PathBuf>) -> Self {
        self.background = self.background.with_supervisor(program);
        self
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecOutcome, ExecError> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Cancelling `cancel` kills foreground and PTY runs. An already launched
    /// background process is unaffected.
    pub async fn execute_with_cancel(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, ExecError> {
        request.validate()?;

        let deadline = timeout::resolve(
            request.background,
            request.slow_ok,
            Some(&self.config.timeouts),
        );
        debug!(
            tier = TimeoutTier::select(request.background, request.slow_ok).as_str(),
            deadline_ms = deadline.as_millis() as u64,
            background = request.background,
            pty = request.pty,
            "dispatching command"
        );

        if request.background {
            self.background
                .launch(&request.command, request.pty, &self.config.timeouts)
                .map(ExecOutcome::Background)
        } else if request.pty {
            self.pty
                .run_with_cancel(&request.command, deadline, cancel)
                .await
                .map(ExecOutcome::Output)
        } else {
            self.foreground
                .run_with_cancel(&request.command, deadline, cancel)
                .await
                .map(ExecOutcome::Output)
        }
    }

    /// Parse a raw JSON request and execute it.
    pub async fn execute_json(&self, raw: &str) -> Result<ExecOutcome, ExecError> {
        let request = ExecutionRequest::from_json(raw)?;
        self.execute(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_text_is_verbatim() {
        let outcome = ExecOutcome::Output("a\nb\n".to_string());
        assert_eq!(outcome.into_text(), "a\nb\n");
    }

    #[test]
    fn test_background_text_is_json() {
        let outcome = ExecOutcome::Background(BackgroundHandle {
            pid: 42,
            stdout_file: PathBuf::from("/tmp/x/stdout.log"),
            stderr_file: PathBuf::from("/tmp/x/stderr.log"),
        });
        let value: serde_json::Value = serde_json::from_str(&outcome.into_text()).unwrap();
        assert_eq!(value["pid"], 42);
        assert_eq!(value["stdout_file"], "/tmp/x/stdout.log");
    }

    #[tokio::test]
    async fn test_blank_command_is_rejected_before_spawn() {
        let exec = Executor::default();
        let err = exec
            .execute(&ExecutionRequest::new("   "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_json_missing_command() {
        let err = Executor::default()
            .execute_json(r#"{"slow_ok":true}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
