//! Shared request/response models and error types for command execution.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A single command execution request.
///
/// `command` is required; the mode flags default to `false` when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub command: String,
    #[serde(default)]
    pub slow_ok: bool,
    #[serde(default)]
    pub background: bool,
    #[serde(default)]
    pub pty: bool,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            slow_ok: false,
            background: false,
            pty: false,
        }
    }

    pub fn slow_ok(mut self, slow_ok: bool) -> Self {
        self.slow_ok = slow_ok;
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    /// Parse and validate a raw JSON request.
    pub fn from_json(raw: &str) -> Result<Self, ExecError> {
        let req: Self = serde_json::from_str(raw)
            .map_err(|e| ExecError::Validation(format!("invalid request: {e}")))?;
        req.validate()?;
        Ok(req)
    }

    /// Parse and validate an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ExecError> {
        let req: Self = serde_json::from_value(value)
            .map_err(|e| ExecError::Validation(format!("invalid request: {e}")))?;
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        if self.command.trim().is_empty() {
            return Err(ExecError::Validation(
                "command must be a non-empty string".to_string(),
            ));
        }
        Ok(())
    }
}

/// Handle to a detached background process.
///
/// The pid is only meaningful while the process exists; the files live in a
/// per-launch temporary directory that the caller owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundHandle {
    pub pid: u32,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
}

impl BackgroundHandle {
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "pid": self.pid,
            "stdout_file": self.stdout_file.display().to_string(),
            "stderr_file": self.stderr_file.display().to_string(),
        })
        .to_string()
    }

    /// Directory holding both output files.
    pub fn output_dir(&self) -> Option<&std::path::Path> {
        self.stdout_file.parent()
    }
}

/// Marker contained in every timeout error message.
pub const TIMEOUT_MARKER: &str = "timed out";

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("command timed out after {deadline:?}")]
    Timeout { deadline: Duration },
    #[error("command failed with {}:\n{output}", describe_exit(.exit_code))]
    Execution {
        exit_code: Option<i32>,
        output: String,
    },
    #[error("platform_unsupported: {0}")]
    PlatformUnsupported(String),
    #[error("launch: {0}")]
    Launch(String),
    #[error("command cancelled")]
    Cancelled,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "termination by signal".to_string(),
    }
}

impl ExecError {
    /// Stable tag for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::Validation(_) => "validation",
            ExecError::Timeout { .. } => "timeout",
            ExecError::Execution { .. } => "execution",
            ExecError::PlatformUnsupported(_) => "platform_unsupported",
            ExecError::Launch(_) => "launch",
            ExecError::Cancelled => "cancelled",
            ExecError::Io(_) => "io",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }

    /// Captured output attached to an execution failure.
    pub fn output(&self) -> Option<&str> {
        match self {
            ExecError::Execution { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&ExecError> for ErrorResponse {
    fn from(err: &ExecError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
