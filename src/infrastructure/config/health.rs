//! Health scoring and alerting configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::invalid;
use crate::domain::HealthThresholds;
use crate::error::Result;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Minimum score for the Healthy state.
    #[serde(default = "default_health_threshold")]
    pub health_threshold: f64,
    /// Minimum score for the Warning state.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: f64,
    /// Latency samples retained per connection.
    #[serde(default = "default_max_sample_size")]
    pub max_sample_size: usize,
    /// Interval of the fleet-wide aggregation pass (seconds).
    #[serde(default = "default_aggregate_interval_secs")]
    pub aggregate_interval_secs: u64,
    /// Minimum spacing between repeated alerts of one kind for one
    /// connection (seconds).
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,
    /// Alert channel capacity; alerts beyond it are dropped.
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,
    /// Probe latency above which a high-latency alert fires (milliseconds).
    #[serde(default = "default_high_latency_ms")]
    pub high_latency_ms: u64,
}

fn default_health_threshold() -> f64 {
    0.8
}

fn default_unhealthy_threshold() -> f64 {
    0.5
}

const fn default_max_sample_size() -> usize {
    100
}

const fn default_aggregate_interval_secs() -> u64 {
    30
}

const fn default_alert_cooldown_secs() -> u64 {
    300
}

const fn default_alert_capacity() -> usize {
    1000
}

const fn default_high_latency_ms() -> u64 {
    500
}

impl HealthConfig {
    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            healthy: self.health_threshold,
            unhealthy: self.unhealthy_threshold,
        }
    }

    pub fn aggregate_interval(&self) -> Duration {
        Duration::from_secs(self.aggregate_interval_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn high_latency(&self) -> Duration {
        Duration::from_millis(self.high_latency_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.health_threshold) {
            return Err(invalid("health.health_threshold", "must be between 0 and 1"));
        }
        if !(0.0..=1.0).contains(&self.unhealthy_threshold) {
            return Err(invalid(
                "health.unhealthy_threshold",
                "must be between 0 and 1",
            ));
        }
        if self.unhealthy_threshold >= self.health_threshold {
            return Err(invalid(
                "health.unhealthy_threshold",
                "must be < health_threshold",
            ));
        }
        if self.max_sample_size == 0 {
            return Err(invalid("health.max_sample_size", "must be > 0"));
        }
        if self.aggregate_interval_secs == 0 {
            return Err(invalid("health.aggregate_interval_secs", "must be > 0"));
        }
        if self.alert_capacity == 0 {
            return Err(invalid("health.alert_capacity", "must be > 0"));
        }
        Ok(())
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            health_threshold: default_health_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
            max_sample_size: default_max_sample_size(),
            aggregate_interval_secs: default_aggregate_interval_secs(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
            alert_capacity: default_alert_capacity(),
            high_latency_ms: default_high_latency_ms(),
        }
    }
}
