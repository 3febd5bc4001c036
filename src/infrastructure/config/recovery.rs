//! Automatic recovery configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::invalid;
use crate::domain::BackoffPolicy;
use crate::error::Result;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecoveryConfig {
    /// Master switch. When false no recovery tasks are spawned.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether newly registered connections start with recovery enabled.
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    /// Reconnect attempts per recovery before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the second attempt (milliseconds).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the pre-jitter delay (milliseconds).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Perturb each delay by up to ±10%.
    #[serde(default = "default_true")]
    pub jitter_enabled: bool,
    /// Upper bound on one whole recovery, all attempts included (seconds).
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Upper bound on a single reconnect handshake (milliseconds).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Interval of the recovery-side health check (seconds).
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Timeout of a recovery-side health check ping (milliseconds).
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Number of concurrent recovery workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Capacity of the recovery request queue, across all priorities.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

const fn default_true() -> bool {
    true
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_recovery_timeout_secs() -> u64 {
    300
}

const fn default_handshake_timeout_ms() -> u64 {
    10_000
}

const fn default_health_check_interval_secs() -> u64 {
    30
}

const fn default_probe_timeout_ms() -> u64 {
    5000
}

const fn default_worker_count() -> usize {
    10
}

const fn default_queue_capacity() -> usize {
    1000
}

impl RecoveryConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.initial_backoff_ms),
            max: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.backoff_multiplier,
            jitter: self.jitter_enabled,
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(invalid("recovery.max_retries", "must be > 0"));
        }
        if self.initial_backoff_ms == 0 {
            return Err(invalid("recovery.initial_backoff_ms", "must be > 0"));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(invalid(
                "recovery.max_backoff_ms",
                "must be >= initial_backoff_ms",
            ));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(invalid("recovery.backoff_multiplier", "must be >= 1.0"));
        }
        if self.recovery_timeout_secs == 0 {
            return Err(invalid("recovery.recovery_timeout_secs", "must be > 0"));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(invalid("recovery.handshake_timeout_ms", "must be > 0"));
        }
        if self.health_check_interval_secs == 0 {
            return Err(invalid("recovery.health_check_interval_secs", "must be > 0"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(invalid("recovery.probe_timeout_ms", "must be > 0"));
        }
        if self.worker_count == 0 {
            return Err(invalid("recovery.worker_count", "must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("recovery.queue_capacity", "must be > 0"));
        }
        Ok(())
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enabled_by_default: true,
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_enabled: true,
            recovery_timeout_secs: default_recovery_timeout_secs(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            health_check_interval_secs: default_health_check_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}
