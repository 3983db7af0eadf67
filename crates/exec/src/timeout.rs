//! Timeout tiers for command execution.

use std::time::Duration;

pub const DEFAULT_FAST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SLOW_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_BACKGROUND_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-executor timeout overrides. Absent fields fall back to the built-in
/// defaults at resolution time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub fast: Option<Duration>,
    pub slow: Option<Duration>,
    pub background: Option<Duration>,
}

/// The tier a request falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutTier {
    Fast,
    Slow,
    Background,
}

impl TimeoutTier {
    pub fn select(background: bool, slow_ok: bool) -> Self {
        if background {
            TimeoutTier::Background
        } else if slow_ok {
            TimeoutTier::Slow
        } else {
            TimeoutTier::Fast
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutTier::Fast => "fast",
            TimeoutTier::Slow => "slow",
            TimeoutTier::Background => "background",
        }
    }
}

impl TimeoutPolicy {
    pub fn fast(&self) -> Duration {
        self.fast.unwrap_or(DEFAULT_FAST_TIMEOUT)
    }

    pub fn slow(&self) -> Duration {
        self.slow.unwrap_or(DEFAULT_SLOW_TIMEOUT)
    }

    pub fn background(&self) -> Duration {
        self.background.unwrap_or(DEFAULT_BACKGROUND_TIMEOUT)
    }

    pub fn for_tier(&self, tier: TimeoutTier) -> Duration {
        match tier {
            TimeoutTier::Fast => self.fast(),
            TimeoutTier::Slow => self.slow(),
            TimeoutTier::Background => self.background(),
        }
    }

    /// Fields set on `other` win; unset fields keep the current value.
    pub fn merged_with(self, other: TimeoutPolicy) -> TimeoutPolicy {
        TimeoutPolicy {
            fast: other.fast.or(self.fast),
            slow: other.slow.or(self.slow),
            background: other.background.or(self.background),
        }
    }
}

/// Effective deadline for a request. `background` takes precedence over
/// `slow_ok`; a missing policy means pure defaults.
pub fn resolve(background: bool, slow_ok: bool, policy: Option<&TimeoutPolicy>) -> Duration {
    let tier = TimeoutTier::select(background, slow_ok);
    match policy {
        Some(policy) => policy.for_tier(tier),
        None => TimeoutPolicy::default().for_tier(tier),
    }
}
