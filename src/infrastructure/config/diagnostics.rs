//! Diagnostics overlay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::invalid;
use crate::domain::DetailLevel;
use crate::error::Result;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagnosticsConfig {
    /// Master switch. When false every diagnostics call is a no-op and the
    /// cleanup task is not spawned.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Record debug log entries for every connection, not just those under
    /// a debug session.
    #[serde(default)]
    pub enable_debug_logging: bool,
    /// Record network traces for every connection.
    #[serde(default)]
    pub enable_network_tracing: bool,
    /// Record latency samples for every connection.
    #[serde(default)]
    pub enable_performance_profiling: bool,
    #[serde(default)]
    pub detail_level: DetailLevel,
    #[serde(default = "default_max_debug_sessions")]
    pub max_debug_sessions: usize,
    /// Entries older than this are pruned (seconds).
    #[serde(default = "default_retention_period_secs")]
    pub retention_period_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Per-connection cap on debug log entries.
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
    #[serde(default = "default_max_timeline_events")]
    pub max_timeline_events: usize,
    #[serde(default = "default_max_traces")]
    pub max_traces: usize,
    #[serde(default = "default_max_health_checks")]
    pub max_health_checks: usize,
    /// Timeout for on-demand ping checks (milliseconds).
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
}

const fn default_enabled() -> bool {
    true
}

const fn default_max_debug_sessions() -> usize {
    10
}

const fn default_retention_period_secs() -> u64 {
    86_400 // 24 hours
}

const fn default_cleanup_interval_secs() -> u64 {
    30
}

const fn default_max_log_entries() -> usize {
    10_000
}

const fn default_max_timeline_events() -> usize {
    500
}

const fn default_max_traces() -> usize {
    1000
}

const fn default_max_health_checks() -> usize {
    100
}

const fn default_check_timeout_ms() -> u64 {
    5000
}

impl DiagnosticsConfig {
    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_period_secs == 0 {
            return Err(invalid("diagnostics.retention_period_secs", "must be > 0"));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(invalid("diagnostics.cleanup_interval_secs", "must be > 0"));
        }
        if self.max_log_entries == 0
            || self.max_timeline_events == 0
            || self.max_traces == 0
            || self.max_health_checks == 0
        {
            return Err(invalid(
                "diagnostics.max_*",
                "buffer capacities must be > 0",
            ));
        }
        if self.check_timeout_ms == 0 {
            return Err(invalid("diagnostics.check_timeout_ms", "must be > 0"));
        }
        Ok(())
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            enable_debug_logging: false,
            enable_network_tracing: false,
            enable_performance_profiling: false,
            detail_level: DetailLevel::default(),
            max_debug_sessions: default_max_debug_sessions(),
            retention_period_secs: default_retention_period_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_log_entries: default_max_log_entries(),
            max_timeline_events: default_max_timeline_events(),
            max_traces: default_max_traces(),
            max_health_checks: default_max_health_checks(),
            check_timeout_ms: default_check_timeout_ms(),
        }
    }
}
