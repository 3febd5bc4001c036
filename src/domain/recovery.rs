//! Recovery state machine and backoff policy.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::id::ConnectionId;

/// Recovery state of a server-initiated connection.
///
/// `Connected -> Disconnected -> Reconnecting -> {Connected | Failed}`.
/// `Draining` is terminal and reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Connected,
    Disconnected,
    Reconnecting,
    Failed,
    Draining,
}

impl RecoveryState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Draining => "draining",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use RecoveryState::*;
        match (self, next) {
            (Draining, _) => false,
            (_, Draining) => true,
            (Connected, Disconnected) => true,
            // a failed connection may be handed back for another round
            (Failed, Disconnected) => true,
            (Disconnected, Reconnecting) => true,
            (Reconnecting, Connected) | (Reconnecting, Failed) => true,
            // cancelled attempt leaves the connection disconnected
            (Reconnecting, Disconnected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a recovery request. Higher priorities are dequeued first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl RecoveryPriority {
    /// All levels, highest first.
    pub const DESCENDING: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Result of one recovery request, passed to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Re-established and re-registered.
    Recovered { attempts: u32, elapsed: Duration },
    /// Every attempt failed; the connection is now `Failed`.
    Exhausted { attempts: u32 },
    /// The overall recovery timeout elapsed before success.
    TimedOut { attempts: u32 },
    /// The recovery scope was cancelled; neither success nor failure.
    Cancelled,
    /// The connection was gone or draining when the worker picked it up.
    Skipped,
    /// The queue was full; the request never ran.
    Dropped,
}

impl RecoveryOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }

    /// Whether the outcome counts toward the failed-recovery metric.
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::TimedOut { .. })
    }
}

/// Exponential backoff with an upper bound and optional ±10% jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

/// Symmetric jitter fraction applied to computed delays.
pub const JITTER_FRACTION: f64 = 0.1;

impl BackoffPolicy {
    /// Pre-jitter delay for attempt `k`: `min(initial * multiplier^k, max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max
        }
    }

    /// Delay to wait before attempt `k`, with jitter applied when enabled.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter {
            apply_jitter(base, &mut rand::thread_rng())
        } else {
            base
        }
    }
}

/// Perturb `base` uniformly within `±JITTER_FRACTION`.
pub fn apply_jitter<R: Rng + ?Sized>(base: Duration, rng: &mut R) -> Duration {
    let factor = rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let secs = base.as_secs_f64() * (1.0 + factor);
    Duration::from_secs_f64(secs.max(0.0))
}

/// Point-in-time copy of a recoverable connection's recovery record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStatus {
    pub id: ConnectionId,
    pub state: RecoveryState,
    pub retry_count: u32,
    pub backoff: Duration,
    pub health_score: f64,
    pub recovery_enabled: bool,
    pub priority: RecoveryPriority,
    pub last_seen: DateTime<Utc>,
    pub last_error: Option<String>,
}
