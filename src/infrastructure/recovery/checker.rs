//! Recovery-side health checks.
//!
//! Independent of the heartbeat probe: recoverable connections may exist
//! before the transport layer registers them for heartbeats.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use super::record::RecoverableConnection;
use super::RecoveryEngine;
use crate::domain::{DisconnectCause, RecoveryState};
use crate::error::Error;

/// Map a check latency to a score in `[0.2, 1.0]`.
pub(super) fn latency_score(latency: Duration) -> f64 {
    match latency.as_millis() {
        0..=49 => 1.0,
        50..=99 => 0.9,
        100..=199 => 0.8,
        200..=499 => 0.6,
        500..=999 => 0.4,
        _ => 0.2,
    }
}

/// Blend a successful check into the running score.
pub(super) fn smoothed_score(current: f64, latency: Duration) -> f64 {
    (0.8 * current + 0.2 * latency_score(latency)).clamp(0.0, 1.0)
}

impl RecoveryEngine {
    /// Ping every connected recoverable connection once. Failures enter the
    /// recovery pipeline. Returns the number of failed checks.
    pub async fn check_health(&self) -> usize {
        let targets: Vec<_> = self
            .connections
            .read()
            .values()
            .filter_map(|connection| {
                let record = connection.record.lock();
                let eligible = record.state == RecoveryState::Connected && record.recovery_enabled;
                eligible
                    .then(|| record.handle.clone())
                    .flatten()
                    .map(|handle| (Arc::clone(connection), handle))
            })
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let probe_timeout = self.config.probe_timeout();
        let checks = targets.into_iter().map(|(connection, handle)| async move {
            let started = Instant::now();
            let result = match timeout(probe_timeout, handle.ping()).await {
                Ok(Ok(())) => Ok(started.elapsed()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::Timeout(probe_timeout)),
            };
            (connection, result)
        });
        let results = futures_util::future::join_all(checks).await;

        let mut failed = 0;
        for (connection, result) in results {
            match result {
                Ok(latency) => self.apply_check(&connection, latency),
                Err(e) => {
                    failed += 1;
                    warn!(connection_id = %connection.id, error = %e, "Recovery health check failed");
                    self.enqueue(
                        &connection.id,
                        DisconnectCause::HealthCheckFailed(e.to_string()),
                        None,
                        false,
                    );
                }
            }
        }
        debug!(failed, "Recovery health check pass complete");
        failed
    }

    fn apply_check(&self, connection: &RecoverableConnection, latency: Duration) {
        let mut record = connection.record.lock();
        record.health_score = smoothed_score(record.health_score, latency);
        record.last_seen = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_score_bands() {
        assert_eq!(latency_score(Duration::from_millis(10)), 1.0);
        assert_eq!(latency_score(Duration::from_millis(50)), 0.9);
        assert_eq!(latency_score(Duration::from_millis(150)), 0.8);
        assert_eq!(latency_score(Duration::from_millis(300)), 0.6);
        assert_eq!(latency_score(Duration::from_millis(700)), 0.4);
        assert_eq!(latency_score(Duration::from_secs(2)), 0.2);
    }

    #[test]
    fn test_smoothing_weights() {
        let score = smoothed_score(1.0, Duration::from_millis(300));
        assert!((score - 0.92).abs() < 1e-9);
        let score = smoothed_score(0.0, Duration::from_millis(1));
        assert!((score - 0.2).abs() < 1e-9);
    }
}
