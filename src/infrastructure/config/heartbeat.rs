//! Heartbeat probe configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::invalid;
use crate::error::Result;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    /// Interval between probe rounds (milliseconds).
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Maximum time to wait for an acknowledgment, and the hard eviction
    /// threshold for connections with no acknowledgment (milliseconds).
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// Interval of the hard-timeout sweep (milliseconds).
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Consecutive failures before a connection is marked unhealthy and
    /// handed to recovery.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

const fn default_ping_interval_ms() -> u64 {
    30_000
}

const fn default_pong_timeout_ms() -> u64 {
    60_000
}

const fn default_cleanup_interval_ms() -> u64 {
    30_000
}

const fn default_failure_threshold() -> u32 {
    3
}

impl HeartbeatConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ping_interval_ms == 0 {
            return Err(invalid("heartbeat.ping_interval_ms", "must be > 0"));
        }
        if self.pong_timeout_ms == 0 {
            return Err(invalid("heartbeat.pong_timeout_ms", "must be > 0"));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(invalid("heartbeat.cleanup_interval_ms", "must be > 0"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("heartbeat.failure_threshold", "must be > 0"));
        }
        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}
