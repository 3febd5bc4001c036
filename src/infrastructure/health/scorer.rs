use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::alerts::AlertChannel;
use super::record::ConnectionHealth;
use crate::domain::{
    AggregateHealth, ConnectionHealthSnapshot, ConnectionId, HealthAlert, HealthThresholds,
    OverallStatus,
};
use crate::error::{Error, Result};
use crate::infrastructure::config::HealthConfig;
use crate::infrastructure::task::run_periodic;

/// Health scoring engine.
///
/// One coarse lock guards the map's key set; each record has its own lock,
/// so probe results for different connections never contend. State-change
/// alerts are published while the record lock is held, which keeps them in
/// probe completion order for a given connection.
pub struct HealthScorer {
    thresholds: HealthThresholds,
    max_sample_size: usize,
    high_latency: Duration,
    aggregate_interval: Duration,
    failure_threshold: u32,
    records: RwLock<HashMap<ConnectionId, Arc<Mutex<ConnectionHealth>>>>,
    aggregate: RwLock<AggregateHealth>,
    alerts: Arc<AlertChannel>,
}

impl HealthScorer {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: &HealthConfig,
        failure_threshold: u32,
        alerts: Arc<AlertChannel>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            thresholds: config.thresholds(),
            max_sample_size: config.max_sample_size,
            high_latency: config.high_latency(),
            aggregate_interval: config.aggregate_interval(),
            failure_threshold: failure_threshold.max(1),
            records: RwLock::new(HashMap::new()),
            aggregate: RwLock::new(AggregateHealth::empty()),
            alerts,
        })
    }

    /// Create a record for a newly registered connection.
    ///
    /// Re-registering an existing ID starts a fresh record.
    pub fn register(&self, id: &ConnectionId) {
        let record = Arc::new(Mutex::new(ConnectionHealth::new(self.max_sample_size)));
        self.records.write().insert(id.clone(), record);
    }

    /// Drop the record for a departed connection.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.records.write().remove(id).is_some();
        if removed {
            self.alerts.forget(id);
        }
        removed
    }

    fn record(&self, id: &ConnectionId) -> Option<Arc<Mutex<ConnectionHealth>>> {
        self.records.read().get(id).cloned()
    }

    pub fn is_tracked(&self, id: &ConnectionId) -> bool {
        self.records.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply an acknowledged probe.
    pub fn record_success(&self, id: &ConnectionId, latency: Duration) {
        let Some(record) = self.record(id) else {
            return;
        };

        {
            let mut health = record.lock();
            let recovered = health.marked_unhealthy;
            health.record_success(latency);
            if let Some(t) = health.rescore(self.thresholds) {
                debug!(connection_id = %id, from = %t.from, to = %t.to, score = t.score, "Health state changed");
                self.alerts
                    .publish(HealthAlert::state_changed(id, t.from, t.to, t.score));
            }
            if recovered {
                debug!(connection_id = %id, "Heartbeat acknowledged again");
            }
        }

        if latency > self.high_latency {
            self.alerts
                .publish_throttled(HealthAlert::high_latency(id, latency, self.high_latency));
        }
    }

    /// Apply a failed probe. Returns the new consecutive failure count, or
    /// `None` if the connection is not tracked.
    pub fn record_failure(&self, id: &ConnectionId, reason: impl Into<String>) -> Option<u32> {
        let record = self.record(id)?;
        let failures = {
            let mut health = record.lock();
            health.record_failure(reason.into());
            if let Some(t) = health.rescore(self.thresholds) {
                debug!(connection_id = %id, from = %t.from, to = %t.to, score = t.score, "Health state changed");
                self.alerts
                    .publish(HealthAlert::state_changed(id, t.from, t.to, t.score));
            }
            health.consecutive_failures
        };

        if failures == self.failure_threshold {
            self.alerts
                .publish_throttled(HealthAlert::connection_down(id, failures));
        }
        Some(failures)
    }

    /// Force a connection to at least Unhealthy until its next successful
    /// probe.
    pub fn mark_unresponsive(&self, id: &ConnectionId) {
        let Some(record) = self.record(id) else {
            return;
        };
        let mut health = record.lock();
        health.marked_unhealthy = true;
        if let Some(t) = health.rescore(self.thresholds) {
            warn!(connection_id = %id, from = %t.from, to = %t.to, "Connection marked unhealthy");
            self.alerts
                .publish(HealthAlert::state_changed(id, t.from, t.to, t.score));
        }
    }

    /// Last acknowledgment instant (registration time if never acknowledged).
    pub fn last_acknowledged(&self, id: &ConnectionId) -> Option<Instant> {
        self.record(id).map(|record| record.lock().last_ack)
    }

    pub fn connection_health(&self, id: &ConnectionId) -> Result<ConnectionHealthSnapshot> {
        let record = self
            .record(id)
            .ok_or_else(|| Error::connection_not_found(id))?;
        let snapshot = record.lock().snapshot(id);
        Ok(snapshot)
    }

    pub fn all_health(&self) -> Vec<ConnectionHealthSnapshot> {
        let records: Vec<(ConnectionId, Arc<Mutex<ConnectionHealth>>)> = self
            .records
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), Arc::clone(record)))
            .collect();
        records
            .iter()
            .map(|(id, record)| record.lock().snapshot(id))
            .collect()
    }

    /// Recompute fleet-wide health from every live record.
    ///
    /// Emits a system alert when the overall status moves into an
    /// unhealthy or critical band.
    pub fn recompute_aggregate(&self) -> AggregateHealth {
        let records: Vec<Arc<Mutex<ConnectionHealth>>> =
            self.records.read().values().cloned().collect();

        let aggregate = AggregateHealth::from_records(records.iter().map(|record| {
            let health = record.lock();
            (health.state, health.score, health.average_latency())
        }));

        let previous = {
            let mut current = self.aggregate.write();
            std::mem::replace(&mut *current, aggregate.clone())
        };

        if aggregate.status != previous.status {
            info!(
                from = previous.status.as_str(),
                to = aggregate.status.as_str(),
                total = aggregate.total_connections,
                healthy = aggregate.healthy_connections,
                "Overall health changed"
            );
            if aggregate.status.is_alarming() {
                self.alerts.publish(HealthAlert::system_unhealthy(&aggregate));
            }
        }
        aggregate
    }

    /// Most recently computed aggregate.
    pub fn aggregate(&self) -> AggregateHealth {
        self.aggregate.read().clone()
    }

    pub fn overall_status(&self) -> OverallStatus {
        self.aggregate.read().status
    }

    /// Run the aggregation pass until cancelled.
    pub async fn run_aggregation(self: Arc<Self>, cancel: CancellationToken) {
        run_periodic("health_aggregate", self.aggregate_interval, cancel, || {
            let scorer = Arc::clone(&self);
            async move {
                scorer.recompute_aggregate();
            }
        })
        .await;
    }
}
