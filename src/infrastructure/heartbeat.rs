//! Heartbeat probing and hard-timeout eviction.
//!
//! Two independent loops share this probe:
//!
//! - **Probe round** (`ping_interval`): pings every registered connection
//!   concurrently, each bounded by `pong_timeout`, and feeds the outcome to
//!   the [`HealthScorer`]. Reaching `failure_threshold` consecutive failures
//!   marks the connection unresponsive and signals the disconnect listener.
//! - **Timeout sweep** (`cleanup_interval`): evicts any connection whose
//!   last acknowledgment is older than `pong_timeout`. This is the
//!   authoritative timeout path; the failure counter covers connections
//!   that are flaky but alive.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ConnectionId, DisconnectCause, RemovalReason};
use crate::error::{Error, Result};
use crate::infrastructure::config::HeartbeatConfig;
use crate::infrastructure::diagnostics::{DiagnosticsManager, EventSeverity};
use crate::infrastructure::health::HealthScorer;
use crate::infrastructure::metrics::{ErrorCategory, MetricsAggregator};
use crate::infrastructure::registry::ConnectionRegistry;
use crate::infrastructure::task::run_periodic;
use crate::port::{DisconnectListener, TransportHandle};

/// Heartbeat counters since startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeartbeatMetrics {
    pub pings_sent: u64,
    pub acknowledged: u64,
    pub failures: u64,
    /// Connections evicted by the timeout sweep.
    pub timeouts: u64,
    /// Outcome of the most recent probe round.
    pub healthy_connections: usize,
    pub unhealthy_connections: usize,
    pub average_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub last_check: Option<DateTime<Utc>>,
}

impl HeartbeatMetrics {
    fn record_ack(&mut self, latency: Duration) {
        self.acknowledged += 1;
        self.average_latency = if self.acknowledged == 1 {
            latency
        } else {
            self.average_latency.mul_f64(0.9) + latency.mul_f64(0.1)
        };
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = Some(self.max_latency.map_or(latency, |m| m.max(latency)));
    }
}

/// Result of one probe round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeRound {
    pub probed: usize,
    pub acknowledged: usize,
    pub failed: usize,
}

enum ProbeOutcome {
    Ack(Duration),
    Failed(Error),
}

pub struct HeartbeatProbe {
    config: HeartbeatConfig,
    registry: Arc<ConnectionRegistry>,
    scorer: Arc<HealthScorer>,
    metrics: Arc<MetricsAggregator>,
    listener: Option<Arc<dyn DisconnectListener>>,
    diagnostics: Option<Arc<DiagnosticsManager>>,
    counters: Mutex<HeartbeatMetrics>,
}

impl HeartbeatProbe {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: HeartbeatConfig,
        registry: Arc<ConnectionRegistry>,
        scorer: Arc<HealthScorer>,
        metrics: Arc<MetricsAggregator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            scorer,
            metrics,
            listener: None,
            diagnostics: None,
            counters: Mutex::new(HeartbeatMetrics::default()),
        })
    }

    /// Receive disconnect signals from both detection paths.
    pub fn with_listener(mut self, listener: Arc<dyn DisconnectListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticsManager>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Ping every registered connection once.
    pub async fn probe_all(&self) -> ProbeRound {
        let targets = self.registry.handles();
        if targets.is_empty() {
            self.counters.lock().last_check = Some(Utc::now());
            return ProbeRound::default();
        }

        let pong_timeout = self.config.pong_timeout();
        let probes = targets.into_iter().map(|(id, handle)| async move {
            let outcome = probe(&handle, pong_timeout).await;
            self.apply(&id, outcome)
        });
        let results = futures_util::future::join_all(probes).await;

        let acknowledged = results.iter().filter(|ok| **ok).count();
        let round = ProbeRound {
            probed: results.len(),
            acknowledged,
            failed: results.len() - acknowledged,
        };

        {
            let mut counters = self.counters.lock();
            counters.healthy_connections = round.acknowledged;
            counters.unhealthy_connections = round.failed;
            counters.last_check = Some(Utc::now());
        }
        debug!(
            probed = round.probed,
            acknowledged = round.acknowledged,
            failed = round.failed,
            "Heartbeat round complete"
        );
        round
    }

    /// Record one probe outcome. Returns whether it was acknowledged.
    fn apply(&self, id: &ConnectionId, outcome: ProbeOutcome) -> bool {
        self.counters.lock().pings_sent += 1;

        match outcome {
            ProbeOutcome::Ack(latency) => {
                self.counters.lock().record_ack(latency);
                self.scorer.record_success(id, latency);
                self.metrics.record_latency(latency);
                self.metrics.record_connection_latency(id, latency);
                if let Some(diagnostics) = &self.diagnostics {
                    diagnostics.record_latency(id, latency);
                }
                true
            }
            ProbeOutcome::Failed(error) => {
                self.counters.lock().failures += 1;
                let category = match error {
                    Error::Timeout(_) => ErrorCategory::Timeout,
                    _ => ErrorCategory::Connection,
                };
                let message = format!("heartbeat to {id} failed: {error}");
                self.metrics.record_connection_error(id, message.clone());
                self.metrics.record_error(category, message);
                if let Some(diagnostics) = &self.diagnostics {
                    diagnostics.record_event(
                        id,
                        "heartbeat_failed",
                        error.to_string(),
                        EventSeverity::Medium,
                    );
                }

                let failures = self.scorer.record_failure(id, error.to_string());
                debug!(connection_id = %id, ?failures, error = %error, "Heartbeat failed");
                if failures == Some(self.config.failure_threshold) {
                    warn!(
                        connection_id = %id,
                        failures = self.config.failure_threshold,
                        "Heartbeat failure threshold reached"
                    );
                    self.scorer.mark_unresponsive(id);
                    self.signal(
                        id,
                        DisconnectCause::ConsecutiveFailures(self.config.failure_threshold),
                    );
                }
                false
            }
        }
    }

    /// Evict every connection not acknowledged within `pong_timeout`.
    /// Returns the number evicted.
    pub async fn cleanup_timed_out(&self) -> usize {
        let pong_timeout = self.config.pong_timeout();
        let expired: Vec<ConnectionId> = self
            .registry
            .connection_ids()
            .into_iter()
            .filter(|id| {
                self.scorer
                    .last_acknowledged(id)
                    .is_some_and(|ack| ack.elapsed() > pong_timeout)
            })
            .collect();

        let mut evicted = 0;
        for id in expired {
            if self.registry.evict(&id, RemovalReason::HeartbeatTimeout).await {
                evicted += 1;
                warn!(
                    connection_id = %id,
                    timeout_ms = pong_timeout.as_millis() as u64,
                    "Connection evicted after heartbeat timeout"
                );
                self.metrics.record_error(
                    ErrorCategory::Timeout,
                    format!("{id} not acknowledged within {pong_timeout:?}"),
                );
                self.signal(&id, DisconnectCause::HeartbeatTimeout);
            }
        }

        if evicted > 0 {
            self.counters.lock().timeouts += evicted as u64;
            info!(evicted, "Heartbeat timeout sweep complete");
        }
        evicted
    }

    fn signal(&self, id: &ConnectionId, cause: DisconnectCause) {
        if let Some(listener) = &self.listener {
            listener.on_disconnect(id, cause);
        }
    }

    pub fn metrics(&self) -> HeartbeatMetrics {
        self.counters.lock().clone()
    }

    /// Run the probe round and the timeout sweep until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            ping_interval_ms = self.config.ping_interval_ms,
            pong_timeout_ms = self.config.pong_timeout_ms,
            "Heartbeat probe started"
        );
        let probes = run_periodic(
            "heartbeat_probe",
            self.config.ping_interval(),
            cancel.clone(),
            || {
                let this = Arc::clone(&self);
                async move {
                    this.probe_all().await;
                }
            },
        );
        let sweep = run_periodic(
            "heartbeat_timeout_sweep",
            self.config.cleanup_interval(),
            cancel,
            || {
                let this = Arc::clone(&self);
                async move {
                    this.cleanup_timed_out().await;
                }
            },
        );
        tokio::join!(probes, sweep);
        info!("Heartbeat probe stopped");
    }
}

async fn probe(handle: &TransportHandle, pong_timeout: Duration) -> ProbeOutcome {
    let started = Instant::now();
    match timeout(pong_timeout, handle.ping()).await {
        Ok(Ok(())) => ProbeOutcome::Ack(started.elapsed()),
        Ok(Err(e)) => ProbeOutcome::Failed(e),
        Err(_) => ProbeOutcome::Failed(Error::Timeout(pong_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HealthState;
    use crate::infrastructure::health::AlertChannel;
    use crate::testkit;
    use crate::testkit::domain::{attributes, connection_id as id};
    use crate::testkit::observer::RecordingListener;
    use crate::testkit::transport::MockTransport;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        scorer: Arc<HealthScorer>,
        metrics: Arc<MetricsAggregator>,
        listener: Arc<RecordingListener>,
        probe: HeartbeatProbe,
    }

    impl Fixture {
        fn new() -> Self {
            let config = testkit::config::heartbeat();
            let registry = Arc::new(ConnectionRegistry::new(testkit::config::registry(10)).unwrap());
            let alerts = Arc::new(AlertChannel::new(100, Duration::ZERO));
            let scorer = Arc::new(
                HealthScorer::new(&testkit::config::health(), config.failure_threshold, alerts)
                    .unwrap(),
            );
            let metrics = Arc::new(MetricsAggregator::new());
            let listener = Arc::new(RecordingListener::default());
            let probe = HeartbeatProbe::new(
                config,
                Arc::clone(&registry),
                Arc::clone(&scorer),
                Arc::clone(&metrics),
            )
            .unwrap()
            .with_listener(listener.clone());
            Self {
                registry,
                scorer,
                metrics,
                listener,
                probe,
            }
        }

        fn add(&self, name: &str, transport: Arc<MockTransport>) {
            assert!(self.registry.add(id(name), transport, attributes()));
            self.scorer.register(&id(name));
        }
    }

    #[tokio::test]
    async fn test_round_with_no_connections() {
        let f = Fixture::new();
        assert_eq!(f.probe.probe_all().await, ProbeRound::default());
        assert!(f.probe.metrics().last_check.is_some());
    }

    #[tokio::test]
    async fn test_acknowledged_round() {
        let f = Fixture::new();
        let transport = MockTransport::healthy();
        f.add("c1", transport.clone());
        f.add("c2", MockTransport::healthy());

        let round = f.probe.probe_all().await;
        assert_eq!(round.probed, 2);
        assert_eq!(round.acknowledged, 2);
        assert_eq!(transport.ping_count(), 1);

        let health = f.scorer.connection_health(&id("c1")).unwrap();
        assert_eq!(health.total_pings, 1);
        assert_eq!(health.successful_pings, 1);

        let metrics = f.probe.metrics();
        assert_eq!(metrics.pings_sent, 2);
        assert_eq!(metrics.acknowledged, 2);
        assert_eq!(metrics.healthy_connections, 2);
        assert_eq!(f.metrics.summary().performance.samples, 2);
    }

    #[tokio::test]
    async fn test_threshold_signals_once() {
        let f = Fixture::new();
        f.add("flaky", MockTransport::failing());

        for _ in 0..5 {
            let round = f.probe.probe_all().await;
            assert_eq!(round.failed, 1);
        }

        assert_eq!(f.listener.count(), 1);
        assert_eq!(
            f.listener.causes_for(&id("flaky")),
            vec![DisconnectCause::ConsecutiveFailures(3)]
        );
        let health = f.scorer.connection_health(&id("flaky")).unwrap();
        assert_eq!(health.consecutive_failures, 5);
        assert!(health.state >= HealthState::Unhealthy);
        assert_eq!(f.metrics.summary().errors.total, 5);
        // Probe failures never evict on their own.
        assert!(f.registry.contains(&id("flaky")));
    }

    #[tokio::test]
    async fn test_threshold_rearms_after_success() {
        let f = Fixture::new();
        let transport = MockTransport::failing();
        f.add("flaky", transport.clone());

        for _ in 0..3 {
            f.probe.probe_all().await;
        }
        transport.set_failing(false);
        f.probe.probe_all().await;
        assert!(!f.scorer.connection_health(&id("flaky")).unwrap().marked_unhealthy);

        transport.set_failing(true);
        for _ in 0..3 {
            f.probe.probe_all().await;
        }
        assert_eq!(f.listener.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out() {
        let f = Fixture::new();
        f.add("stuck", MockTransport::hanging());

        let round = f.probe.probe_all().await;
        assert_eq!(round.failed, 1);
        let errors = f.metrics.summary().errors;
        assert_eq!(errors.by_category.get(&ErrorCategory::Timeout), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_unacknowledged() {
        let f = Fixture::new();
        let stuck = MockTransport::hanging();
        f.add("stuck", stuck.clone());
        f.add("alive", MockTransport::healthy());

        assert_eq!(f.probe.cleanup_timed_out().await, 0);

        tokio::time::advance(Duration::from_millis(200)).await;
        f.scorer.record_success(&id("alive"), Duration::from_millis(1));
        tokio::time::advance(Duration::from_millis(200)).await;

        assert_eq!(f.probe.cleanup_timed_out().await, 1);
        assert!(!f.registry.contains(&id("stuck")));
        assert!(f.registry.contains(&id("alive")));
        assert!(stuck.is_closed());
        assert_eq!(
            f.listener.causes_for(&id("stuck")),
            vec![DisconnectCause::HeartbeatTimeout]
        );
        assert_eq!(f.probe.metrics().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_evicts_silent_connection() {
        let f = Fixture::new();
        let stuck = MockTransport::hanging();
        f.add("stuck", stuck.clone());
        f.add("alive", MockTransport::healthy());

        let probe = Arc::new(f.probe);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&probe).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!f.registry.contains(&id("stuck")));
        assert!(f.registry.contains(&id("alive")));
        assert!(stuck.ping_count() >= 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
