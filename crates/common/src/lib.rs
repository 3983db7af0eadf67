//! Shared utilities for substrate components

pub mod paths;

/// Environment variable set to `"1"` for every command spawned on behalf of
/// the agent, so scripts can detect that context.
pub const AGENT_MARKER_ENV: &str = "SUBSTRATE_AGENT";
pub const AGENT_MARKER_VALUE: &str = "1";
