//! Connection registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::invalid;
use crate::error::Result;

/// Admission control and stale-connection eviction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Maximum number of concurrently registered connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Interval of the stale-connection sweep (seconds).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Connections idle longer than this are evicted by the sweep (seconds).
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

const fn default_max_connections() -> usize {
    1000
}

const fn default_cleanup_interval_secs() -> u64 {
    60
}

const fn default_max_idle_secs() -> u64 {
    300
}

impl RegistryConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(invalid("registry.max_connections", "must be > 0"));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(invalid("registry.cleanup_interval_secs", "must be > 0"));
        }
        if self.max_idle_secs == 0 {
            return Err(invalid("registry.max_idle_secs", "must be > 0"));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_idle_secs: default_max_idle_secs(),
        }
    }
}
