//! Metrics time-series configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::invalid;
use crate::error::Result;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Interval between time-series samples (seconds).
    #[serde(default = "default_resolution_secs")]
    pub time_series_resolution_secs: u64,
    /// Samples retained; the oldest is dropped once full. 1440 one-minute
    /// samples cover a day.
    #[serde(default = "default_max_data_points")]
    pub max_data_points: usize,
}

const fn default_resolution_secs() -> u64 {
    60
}

const fn default_max_data_points() -> usize {
    1440
}

impl MetricsConfig {
    pub fn time_series_resolution(&self) -> Duration {
        Duration::from_secs(self.time_series_resolution_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_series_resolution_secs == 0 {
            return Err(invalid(
                "metrics.time_series_resolution_secs",
                "must be > 0",
            ));
        }
        if self.max_data_points == 0 {
            return Err(invalid("metrics.max_data_points", "must be > 0"));
        }
        Ok(())
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            time_series_resolution_secs: default_resolution_secs(),
            max_data_points: default_max_data_points(),
        }
    }
}
