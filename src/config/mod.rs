//! Speed-mode presets and timing tables.
//!
//! A [`SpeedMode`] bundles every knob the admission layer needs: concurrency
//! ceiling, pacing delay range, token refill rate, and burst size. Delay
//! categories carry the base ranges the identity layer scales by escalation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Hard ceiling for effective concurrency regardless of proxy count.
pub const MAX_CONCURRENCY: u32 = 200;

/// How long a misbehaving profile or (proxy, identity) combo stays benched.
pub const BLACKLIST_TTL: Duration = Duration::from_secs(300);

/// Failures with zero successes before an entity is blacklisted.
pub const BLACKLIST_FAIL_THRESHOLD: u32 = 3;

/// Per-level delay multiplier step for the identity escalation dial (0..=3).
pub const IDENTITY_ESCALATION_STEP: f64 = 0.5;

/// Per-level delay multiplier step for the admission escalation dial (0..=5).
pub const ADMISSION_ESCALATION_STEP: f64 = 0.3;

/// Named configuration bundle consumed by [`AdmissionController`].
///
/// [`AdmissionController`]: crate::modules::admission::AdmissionController
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedMode {
    pub name: String,
    /// Base number of in-flight requests before proxy scaling.
    pub base_concurrency: u32,
    /// Min/max pacing delay in seconds, before escalation scaling.
    pub delay_range: (f64, f64),
    /// Token bucket refill rate, per minute, per proxy.
    pub refill_per_minute: f64,
    /// Token bucket capacity.
    pub burst_size: u32,
    /// Extra concurrency granted per active proxy.
    pub per_proxy_multiplier: f64,
}

impl SpeedMode {
    /// Conservative defaults for accounts worth keeping.
    pub fn safe() -> Self {
        Self {
            name: "safe".into(),
            base_concurrency: 3,
            delay_range: (1.0, 3.0),
            refill_per_minute: 30.0,
            burst_size: 5,
            per_proxy_multiplier: 0.5,
        }
    }

    pub fn fast() -> Self {
        Self {
            name: "fast".into(),
            base_concurrency: 8,
            delay_range: (0.3, 1.2),
            refill_per_minute: 90.0,
            burst_size: 10,
            per_proxy_multiplier: 1.0,
        }
    }

    /// Throughput over stealth. Expect pushback from the target.
    pub fn turbo() -> Self {
        Self {
            name: "turbo".into(),
            base_concurrency: 16,
            delay_range: (0.05, 0.4),
            refill_per_minute: 240.0,
            burst_size: 20,
            per_proxy_multiplier: 2.0,
        }
    }
}

impl Default for SpeedMode {
    fn default() -> Self {
        Self::safe()
    }
}

/// Error returned when parsing an unrecognised speed-mode name.
#[derive(Debug, Error)]
#[error("unknown speed mode: {0}")]
pub struct UnknownSpeedMode(pub String);

impl FromStr for SpeedMode {
    type Err = UnknownSpeedMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::safe()),
            "fast" => Ok(Self::fast()),
            "turbo" => Ok(Self::turbo()),
            other => Err(UnknownSpeedMode(other.to_string())),
        }
    }
}

/// Request class used to pick a base delay range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayCategory {
    /// Plain read traffic.
    Default,
    /// After a mutating action (follow, message, upload).
    AfterAction,
    /// After any classified error.
    AfterError,
    /// After the target answered with a rate limit.
    AfterRateLimit,
}

impl DelayCategory {
    /// Base min/max delay in seconds, before escalation scaling.
    pub fn base_range(self) -> (f64, f64) {
        match self {
            DelayCategory::Default => (0.5, 2.0),
            DelayCategory::AfterAction => (1.0, 3.0),
            DelayCategory::AfterError => (3.0, 8.0),
            DelayCategory::AfterRateLimit => (30.0, 60.0),
        }
    }
}

impl fmt::Display for DelayCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DelayCategory::Default => "default",
            DelayCategory::AfterAction => "after_action",
            DelayCategory::AfterError => "after_error",
            DelayCategory::AfterRateLimit => "after_rate_limit",
        };
        f.write_str(label)
    }
}
