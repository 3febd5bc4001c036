//! Health scoring model.
//!
//! The score is a pure function of a connection's probe history, so it lives
//! here rather than in the scorer. Thresholds are supplied by configuration.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::ConnectionId;

/// Discrete per-connection health state derived from the score.
///
/// Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Warning,
    Unhealthy,
    Critical,
}

impl HealthState {
    /// Classify a score against the configured thresholds.
    ///
    /// `score >= healthy` is Healthy, `score >= unhealthy` is Warning, any
    /// other positive score is Unhealthy, and zero is Critical.
    pub fn classify(score: f64, thresholds: HealthThresholds) -> Self {
        if score >= thresholds.healthy {
            Self::Healthy
        } else if score >= thresholds.unhealthy {
            Self::Warning
        } else if score > 0.0 {
            Self::Unhealthy
        } else {
            Self::Critical
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Unhealthy => "unhealthy",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score boundaries between health states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub healthy: f64,
    pub unhealthy: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            healthy: 0.8,
            unhealthy: 0.5,
        }
    }
}

/// Penalty applied for a smoothed latency estimate.
pub fn latency_penalty(avg_latency: Duration) -> f64 {
    if avg_latency > Duration::from_secs(1) {
        0.3
    } else if avg_latency > Duration::from_millis(500) {
        0.2
    } else if avg_latency > Duration::from_millis(200) {
        0.1
    } else {
        0.0
    }
}

/// Compute a health score in `[0, 1]`.
///
/// Success rate over all probes, minus a capped penalty for consecutive
/// failures, minus a latency penalty.
pub fn health_score(
    successful_pings: u64,
    total_pings: u64,
    consecutive_failures: u32,
    avg_latency: Duration,
) -> f64 {
    let success_rate = successful_pings as f64 / total_pings.max(1) as f64;
    let failure_penalty = (f64::from(consecutive_failures) * 0.1).min(0.5);
    (success_rate - failure_penalty - latency_penalty(avg_latency)).clamp(0.0, 1.0)
}

/// Fleet-wide status derived from the ratio of healthy connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Unhealthy,
    Critical,
}

impl OverallStatus {
    /// Ratio thresholds: 0.9 healthy, 0.7 warning, 0.5 unhealthy.
    pub fn from_ratio(healthy_ratio: f64) -> Self {
        if healthy_ratio >= 0.9 {
            Self::Healthy
        } else if healthy_ratio >= 0.7 {
            Self::Warning
        } else if healthy_ratio >= 0.5 {
            Self::Unhealthy
        } else {
            Self::Critical
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Unhealthy => "unhealthy",
            Self::Critical => "critical",
        }
    }

    /// Whether the status warrants a system-level alert.
    pub const fn is_alarming(self) -> bool {
        matches!(self, Self::Unhealthy | Self::Critical)
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of fleet-wide health. Never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateHealth {
    pub total_connections: usize,
    pub healthy_connections: usize,
    pub warning_connections: usize,
    pub unhealthy_connections: usize,
    pub critical_connections: usize,
    pub average_score: f64,
    pub average_latency: Duration,
    pub status: OverallStatus,
    pub computed_at: DateTime<Utc>,
}

impl AggregateHealth {
    /// Aggregate over an empty fleet.
    pub fn empty() -> Self {
        Self {
            total_connections: 0,
            healthy_connections: 0,
            warning_connections: 0,
            unhealthy_connections: 0,
            critical_connections: 0,
            average_score: 1.0,
            average_latency: Duration::ZERO,
            status: OverallStatus::Healthy,
            computed_at: Utc::now(),
        }
    }

    /// Build an aggregate from per-connection `(state, score, latency)` triples.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (HealthState, f64, Duration)>,
    {
        let mut agg = Self::empty();
        let mut score_sum = 0.0;
        let mut latency_sum = Duration::ZERO;

        for (state, score, latency) in records {
            agg.total_connections += 1;
            score_sum += score;
            latency_sum += latency;
            match state {
                HealthState::Healthy => agg.healthy_connections += 1,
                HealthState::Warning => agg.warning_connections += 1,
                HealthState::Unhealthy => agg.unhealthy_connections += 1,
                HealthState::Critical => agg.critical_connections += 1,
            }
        }

        if agg.total_connections > 0 {
            let n = agg.total_connections;
            agg.average_score = score_sum / n as f64;
            agg.average_latency = latency_sum / n as u32;
            agg.status = OverallStatus::from_ratio(agg.healthy_ratio());
        }
        agg
    }

    /// Fraction of connections in the Healthy state. An empty fleet is fully healthy.
    pub fn healthy_ratio(&self) -> f64 {
        if self.total_connections == 0 {
            return 1.0;
        }
        self.healthy_connections as f64 / self.total_connections as f64
    }
}

/// Point-in-time copy of one connection's health record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionHealthSnapshot {
    pub id: ConnectionId,
    pub score: f64,
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub total_pings: u64,
    pub successful_pings: u64,
    pub average_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub p95_latency: Duration,
    pub sample_count: usize,
    pub last_acknowledged_at: Option<DateTime<Utc>>,
    pub marked_unhealthy: bool,
}

/// Value at percentile `p` (0.0 to 1.0) of a sorted slice.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let index = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn perfect_history_scores_one() {
        assert_eq!(health_score(10, 10, 0, ms(20)), 1.0);
    }

    #[test]
    fn no_pings_counts_as_zero_success() {
        assert_eq!(health_score(0, 0, 0, Duration::ZERO), 0.0);
    }

    #[test]
    fn failure_penalty_is_capped() {
        let five = health_score(10, 10, 5, ms(10));
        let fifty = health_score(10, 10, 50, ms(10));
        assert!((five - 0.5).abs() < 1e-9);
        assert!((fifty - 0.5).abs() < 1e-9);
    }

    #[test]
    fn latency_penalty_buckets() {
        assert_eq!(latency_penalty(ms(200)), 0.0);
        assert_eq!(latency_penalty(ms(201)), 0.1);
        assert_eq!(latency_penalty(ms(501)), 0.2);
        assert_eq!(latency_penalty(ms(1001)), 0.3);
    }

    #[test]
    fn latency_penalty_counts_sub_millisecond_excess() {
        assert_eq!(latency_penalty(Duration::from_micros(200_001)), 0.1);
        assert_eq!(latency_penalty(Duration::from_micros(500_900)), 0.2);
        assert_eq!(latency_penalty(Duration::from_micros(1_000_700)), 0.3);
        assert_eq!(latency_penalty(ms(1000)), 0.2);
    }

    #[test]
    fn fractional_latency_over_one_second_is_warning() {
        let score = health_score(10, 10, 0, Duration::from_micros(1_000_700));
        assert!((score - 0.7).abs() < 1e-9);
        assert_eq!(
            HealthState::classify(score, HealthThresholds::default()),
            HealthState::Warning
        );
    }

    #[test]
    fn score_is_clamped_to_unit_interval() {
        let s = health_score(1, 10, 10, Duration::from_secs(5));
        assert_eq!(s, 0.0);
        for failures in 0..20 {
            for ok in 0..=10 {
                let s = health_score(ok, 10, failures, ms(u64::from(failures) * 100));
                assert!((0.0..=1.0).contains(&s));
            }
        }
    }

    #[test]
    fn classify_uses_thresholds() {
        let t = HealthThresholds::default();
        assert_eq!(HealthState::classify(1.0, t), HealthState::Healthy);
        assert_eq!(HealthState::classify(0.8, t), HealthState::Healthy);
        assert_eq!(HealthState::classify(0.79, t), HealthState::Warning);
        assert_eq!(HealthState::classify(0.5, t), HealthState::Warning);
        assert_eq!(HealthState::classify(0.49, t), HealthState::Unhealthy);
        assert_eq!(HealthState::classify(0.0, t), HealthState::Critical);
    }

    #[test]
    fn overall_status_from_ratio() {
        assert_eq!(OverallStatus::from_ratio(0.95), OverallStatus::Healthy);
        assert_eq!(OverallStatus::from_ratio(0.9), OverallStatus::Healthy);
        assert_eq!(OverallStatus::from_ratio(0.75), OverallStatus::Warning);
        assert_eq!(OverallStatus::from_ratio(0.5), OverallStatus::Unhealthy);
        assert_eq!(OverallStatus::from_ratio(0.1), OverallStatus::Critical);
    }

    #[test]
    fn aggregate_counts_and_averages() {
        let agg = AggregateHealth::from_records(vec![
            (HealthState::Healthy, 1.0, ms(10)),
            (HealthState::Healthy, 0.9, ms(30)),
            (HealthState::Unhealthy, 0.2, ms(50)),
        ]);
        assert_eq!(agg.total_connections, 3);
        assert_eq!(agg.healthy_connections, 2);
        assert_eq!(agg.unhealthy_connections, 1);
        assert!((agg.average_score - 0.7).abs() < 1e-9);
        assert_eq!(agg.average_latency, ms(30));
        assert_eq!(agg.status, OverallStatus::Unhealthy);
    }

    #[test]
    fn empty_aggregate_is_healthy() {
        let agg = AggregateHealth::from_records(Vec::new());
        assert_eq!(agg.status, OverallStatus::Healthy);
        assert_eq!(agg.healthy_ratio(), 1.0);
    }

    #[test]
    fn percentile_of_sorted_samples() {
        let samples: Vec<Duration> = (1..=100).map(ms).collect();
        assert_eq!(percentile(&samples, 0.5), ms(51));
        assert_eq!(percentile(&samples, 0.95), ms(95));
        assert_eq!(percentile(&[], 0.5), Duration::ZERO);
    }
}
