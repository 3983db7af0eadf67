//! Executor configuration: shell selection and timeout overrides.
//!
//! Resolution order, lowest to highest precedence: built-in defaults,
//! `$SUBSTRATE_HOME/exec.toml`, then `SUBSTRATE_EXEC_*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use substrate_common::paths;
use tracing::warn;

use crate::timeout::TimeoutPolicy;

pub const DEFAULT_SHELL: &str = "bash";

pub const SHELL_ENV: &str = "SUBSTRATE_EXEC_SHELL";
pub const FAST_TIMEOUT_ENV: &str = "SUBSTRATE_EXEC_FAST_TIMEOUT_MS";
pub const SLOW_TIMEOUT_ENV: &str = "SUBSTRATE_EXEC_SLOW_TIMEOUT_MS";
pub const BACKGROUND_TIMEOUT_ENV: &str = "SUBSTRATE_EXEC_BACKGROUND_TIMEOUT_MS";

/// Resolved configuration handed to an executor. Not mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Interpreter invoked as `<shell> -c <command>`.
    pub shell: PathBuf,
    pub timeouts: TimeoutPolicy,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
            timeouts: TimeoutPolicy::default(),
        }
    }
}

/// On-disk shape of `exec.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecConfigFile {
    pub shell: Option<PathBuf>,
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSettings {
    pub fast_ms: Option<u64>,
    pub slow_ms: Option<u64>,
    pub background_ms: Option<u64>,
}

impl From<&TimeoutSettings> for TimeoutPolicy {
    fn from(settings: &TimeoutSettings) -> Self {
        TimeoutPolicy {
            fast: settings.fast_ms.map(Duration::from_millis),
            slow: settings.slow_ms.map(Duration::from_millis),
            background: settings.background_ms.map(Duration::from_millis),
        }
    }
}

impl ExecConfig {
    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Load from the default config file (if present) and the environment.
    pub fn load() -> Result<Self> {
        let path = paths::exec_config_file()?;
        Self::load_from(&path)
    }

    /// Load from `path` (a missing file is not an error) and the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = ExecConfig::default();
        if let Some(file) = read_config_file(path)? {
            config.apply_file(&file);
        }
        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, file: &ExecConfigFile) {
        if let Some(shell) = &file.shell {
            self.shell = shell.clone();
        }
        self.timeouts = self
            .timeouts
            .merged_with(TimeoutPolicy::from(&file.timeouts));
    }

    fn apply_env(&mut self) {
        if let Ok(shell) = std::env::var(SHELL_ENV) {
            let trimmed = shell.trim();
            if !trimmed.is_empty() {
                self.shell = PathBuf::from(trimmed);
            }
        }

        let overrides = TimeoutPolicy {
            fast: env_millis(FAST_TIMEOUT_ENV),
            slow: env_millis(SLOW_TIMEOUT_ENV),
            background: env_millis(BACKGROUND_TIMEOUT_ENV),
        };
        self.timeouts = self.timeouts.merged_with(overrides);
    }
}

fn read_config_file(path: &Path) -> Result<Option<ExecConfigFile>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let parsed = toml::from_str::<ExecConfigFile>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(parsed))
}

fn env_millis(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring unparsable timeout override");
            None
        }
    }
}
