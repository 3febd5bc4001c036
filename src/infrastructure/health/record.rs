//! Per-connection health record.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::domain::health::percentile;
use crate::domain::{
    health_score, ConnectionHealthSnapshot, ConnectionId, HealthState, HealthThresholds,
};

/// Weight of a new sample in the smoothed latency estimate.
const LATENCY_EMA_WEIGHT: f64 = 0.1;

/// Mutable health state of one connection, guarded by its own lock.
#[derive(Debug)]
pub(super) struct ConnectionHealth {
    pub(super) score: f64,
    pub(super) state: HealthState,
    pub(super) consecutive_failures: u32,
    pub(super) total_pings: u64,
    pub(super) successful_pings: u64,
    samples: VecDeque<Duration>,
    max_samples: usize,
    pub(super) smoothed_latency: Option<Duration>,
    min_latency: Option<Duration>,
    max_latency: Option<Duration>,
    /// Last acknowledgment, or registration time if none yet.
    pub(super) last_ack: Instant,
    last_ack_at: Option<DateTime<Utc>>,
    pub(super) marked_unhealthy: bool,
    pub(super) last_failure: Option<String>,
}

/// A discrete state change produced by a rescore.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Transition {
    pub(super) from: HealthState,
    pub(super) to: HealthState,
    pub(super) score: f64,
}

impl ConnectionHealth {
    /// A fresh record starts fully healthy until the first probe lands.
    pub(super) fn new(max_samples: usize) -> Self {
        Self {
            score: 1.0,
            state: HealthState::Healthy,
            consecutive_failures: 0,
            total_pings: 0,
            successful_pings: 0,
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
            smoothed_latency: None,
            min_latency: None,
            max_latency: None,
            last_ack: Instant::now(),
            last_ack_at: None,
            marked_unhealthy: false,
            last_failure: None,
        }
    }

    pub(super) fn record_success(&mut self, latency: Duration) {
        self.total_pings += 1;
        self.successful_pings += 1;
        self.consecutive_failures = 0;
        self.marked_unhealthy = false;
        self.last_ack = Instant::now();
        self.last_ack_at = Some(Utc::now());

        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);

        self.smoothed_latency = Some(match self.smoothed_latency {
            None => latency,
            Some(avg) => avg.mul_f64(1.0 - LATENCY_EMA_WEIGHT) + latency.mul_f64(LATENCY_EMA_WEIGHT),
        });
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = Some(self.max_latency.map_or(latency, |m| m.max(latency)));
    }

    pub(super) fn record_failure(&mut self, reason: String) {
        self.total_pings += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(reason);
    }

    pub(super) fn average_latency(&self) -> Duration {
        self.smoothed_latency.unwrap_or_default()
    }

    /// Recompute the score and state. Returns the transition if the discrete
    /// state changed.
    ///
    /// A connection marked unhealthy by the heartbeat stays at least
    /// Unhealthy until its next successful probe.
    pub(super) fn rescore(&mut self, thresholds: HealthThresholds) -> Option<Transition> {
        self.score = health_score(
            self.successful_pings,
            self.total_pings,
            self.consecutive_failures,
            self.average_latency(),
        );
        let mut next = HealthState::classify(self.score, thresholds);
        if self.marked_unhealthy {
            next = next.max(HealthState::Unhealthy);
        }

        if next == self.state {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to: next,
            score: self.score,
        };
        self.state = next;
        Some(transition)
    }

    pub(super) fn snapshot(&self, id: &ConnectionId) -> ConnectionHealthSnapshot {
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        ConnectionHealthSnapshot {
            id: id.clone(),
            score: self.score,
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            total_pings: self.total_pings,
            successful_pings: self.successful_pings,
            average_latency: self.average_latency(),
            min_latency: self.min_latency,
            max_latency: self.max_latency,
            p95_latency: percentile(&sorted, 0.95),
            sample_count: self.samples.len(),
            last_acknowledged_at: self.last_ack_at,
            marked_unhealthy: self.marked_unhealthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn smoothed_latency_weights_new_samples_by_a_tenth() {
        let mut h = ConnectionHealth::new(10);
        h.record_success(ms(100));
        assert_eq!(h.average_latency(), ms(100));
        h.record_success(ms(200));
        assert_eq!(h.average_latency().as_millis(), 110);
    }

    #[test]
    fn sample_buffer_is_bounded() {
        let mut h = ConnectionHealth::new(3);
        for v in 1..=5 {
            h.record_success(ms(v));
        }
        let snap = h.snapshot(&ConnectionId::from("c"));
        assert_eq!(snap.sample_count, 3);
        assert_eq!(snap.min_latency, Some(ms(1)));
        assert_eq!(snap.max_latency, Some(ms(5)));
    }

    #[test]
    fn rescore_reports_only_changes() {
        let t = HealthThresholds::default();
        let mut h = ConnectionHealth::new(10);
        h.record_success(ms(10));
        assert_eq!(h.rescore(t), None);

        h.record_failure("timeout".into());
        // 1/2 success - 0.1 penalty = 0.4
        let transition = h.rescore(t).unwrap();
        assert_eq!(transition.from, HealthState::Healthy);
        assert_eq!(transition.to, HealthState::Unhealthy);
        assert_eq!(h.rescore(t), None);
    }

    #[test]
    fn marked_unhealthy_caps_state_until_success() {
        let t = HealthThresholds::default();
        let mut h = ConnectionHealth::new(10);
        for _ in 0..20 {
            h.record_success(ms(10));
        }
        h.marked_unhealthy = true;
        assert_eq!(h.rescore(t).unwrap().to, HealthState::Unhealthy);

        h.record_success(ms(10));
        assert_eq!(h.rescore(t).unwrap().to, HealthState::Healthy);
    }
}
