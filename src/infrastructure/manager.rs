//! Connection manager: composition root and façade.
//!
//! Builds every component from one [`Config`], wires them together and owns
//! their background tasks. The transport layer talks only to this type.
//!
//! Wiring:
//! - registry observer → metrics counters, per-connection stats, health
//!   records, diagnostics records (all per-connection state is created and
//!   destroyed here)
//! - heartbeat probe → recovery engine (disconnect signals)
//! - recovery engine → registry (`replace` on success)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::domain::{
    AggregateHealth, ConnectionAttributes, ConnectionHealthSnapshot, ConnectionId,
    ConnectionInfo, DebugFeature, DebugSessionId, DisconnectCause, Direction, HealthAlert,
    HealthCheckKind, LogLevel, RecoveryPriority, RecoveryStatus, RemovalReason,
};
use crate::error::{Error, Result};
use crate::infrastructure::config::Config;
use crate::infrastructure::diagnostics::{
    ConnectionDiagnostics, DiagnosticsManager, HealthCheckResult, SystemDiagnostics,
};
use crate::infrastructure::health::{AlertChannel, AlertStats, HealthScorer};
use crate::infrastructure::heartbeat::{HeartbeatMetrics, HeartbeatProbe};
use crate::infrastructure::metrics::{
    ConnectionStats, ErrorCategory, MetricsAggregator, MetricsSnapshot, TimeSeriesPoint,
};
use crate::infrastructure::recovery::{RecoveryEngine, RecoveryMetrics};
use crate::infrastructure::registry::{ConnectionRegistry, PoolMetrics, PoolStats};
use crate::port::{Dialer, DisconnectListener, RegistryObserver, TransportHandle};

/// Creates and destroys per-connection records as the registry changes.
struct Lifecycle {
    registry: Weak<ConnectionRegistry>,
    recovery: Weak<RecoveryEngine>,
    scorer: Arc<HealthScorer>,
    metrics: Arc<MetricsAggregator>,
    diagnostics: Arc<DiagnosticsManager>,
}

impl RegistryObserver for Lifecycle {
    fn on_registered(&self, info: &ConnectionInfo) {
        self.metrics.record_connection_accepted();
        self.metrics.register_connection(&info.id);
        self.scorer.register(&info.id);
        if self.diagnostics.is_enabled() {
            let handle = self.registry.upgrade().and_then(|r| r.handle(&info.id));
            if let Some(handle) = handle {
                self.diagnostics.register_connection(info.clone(), handle);
            }
        }
    }

    fn on_rejected(&self, _id: &ConnectionId, reason: &'static str) {
        self.metrics.record_connection_rejected(reason);
    }

    fn on_removed(&self, id: &ConnectionId, reason: RemovalReason, lifetime: Duration) {
        self.metrics.record_connection_closed(lifetime);
        // Stats outlive a disconnect while recovery may bring the ID back.
        let recovering = reason == RemovalReason::Replaced
            || self
                .recovery
                .upgrade()
                .is_some_and(|recovery| recovery.status(id).is_some());
        if !recovering {
            self.metrics.unregister_connection(id);
        }
        self.scorer.unregister(id);
        self.diagnostics.unregister_connection(id);
        debug!(connection_id = %id, reason = reason.as_str(), "Connection records released");
    }
}

pub struct ConnectionManager {
    config: Config,
    registry: Arc<ConnectionRegistry>,
    scorer: Arc<HealthScorer>,
    alerts: Arc<AlertChannel>,
    metrics: Arc<MetricsAggregator>,
    heartbeat: Arc<HeartbeatProbe>,
    recovery: Arc<RecoveryEngine>,
    diagnostics: Arc<DiagnosticsManager>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl ConnectionManager {
    /// Build and wire every component. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration section is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new(config.registry.clone())?);
        let alerts = Arc::new(AlertChannel::new(
            config.health.alert_capacity,
            config.health.alert_cooldown(),
        ));
        let scorer = Arc::new(HealthScorer::new(
            &config.health,
            config.heartbeat.failure_threshold,
            Arc::clone(&alerts),
        )?);
        let metrics = Arc::new(MetricsAggregator::with_config(&config.metrics)?);
        let diagnostics = Arc::new(DiagnosticsManager::new(config.diagnostics.clone())?);

        let recovery = Arc::new(
            RecoveryEngine::new(
                config.recovery.clone(),
                Arc::clone(&registry),
                Arc::clone(&alerts),
                Arc::clone(&metrics),
            )?
            .with_diagnostics(Arc::clone(&diagnostics)),
        );
        let listener: Arc<dyn DisconnectListener> = recovery.clone();
        let heartbeat = Arc::new(
            HeartbeatProbe::new(
                config.heartbeat.clone(),
                Arc::clone(&registry),
                Arc::clone(&scorer),
                Arc::clone(&metrics),
            )?
            .with_listener(listener)
            .with_diagnostics(Arc::clone(&diagnostics)),
        );

        registry.add_observer(Arc::new(Lifecycle {
            registry: Arc::downgrade(&registry),
            recovery: Arc::downgrade(&recovery),
            scorer: Arc::clone(&scorer),
            metrics: Arc::clone(&metrics),
            diagnostics: Arc::clone(&diagnostics),
        }));

        Ok(Self {
            config,
            registry,
            scorer,
            alerts,
            metrics,
            heartbeat,
            recovery,
            diagnostics,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn every background task. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.tracker
            .spawn(Arc::clone(&self.registry).run_cleanup(self.cancel.clone()));
        self.tracker
            .spawn(Arc::clone(&self.heartbeat).run(self.cancel.clone()));
        self.tracker
            .spawn(Arc::clone(&self.scorer).run_aggregation(self.cancel.clone()));
        self.tracker
            .spawn(Arc::clone(&self.metrics).run_sampling(self.cancel.clone()));
        self.recovery.start(self.cancel.clone(), &self.tracker);
        if self.diagnostics.is_enabled() {
            self.tracker
                .spawn(Arc::clone(&self.diagnostics).run(self.cancel.clone()));
        }

        info!(
            max_connections = self.config.registry.max_connections,
            recovery = self.recovery.is_enabled(),
            diagnostics = self.diagnostics.is_enabled(),
            tasks = self.tracker.len(),
            "Connection manager started"
        );
    }

    /// Cancel every background task, wait for them to finish and close all
    /// registered connections.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        let closed = self.registry.close_all().await;
        info!(closed, "Connection manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    /// Admit an inbound connection. Returns `false` when rejected.
    pub fn register_connection(
        &self,
        id: ConnectionId,
        handle: TransportHandle,
        attributes: ConnectionAttributes,
    ) -> bool {
        self.registry.add(id, handle, attributes)
    }

    /// Admit a connection this side dialed and can therefore redial.
    pub fn register_outbound(
        &self,
        id: ConnectionId,
        handle: TransportHandle,
        attributes: ConnectionAttributes,
        dialer: Arc<dyn Dialer>,
        priority: RecoveryPriority,
    ) -> bool {
        if !self
            .registry
            .add(id.clone(), Arc::clone(&handle), attributes.clone())
        {
            return false;
        }
        self.recovery
            .register(id, attributes, handle, dialer, priority);
        true
    }

    /// Remove a connection for good: cancels any recovery, then closes it.
    pub async fn unregister_connection(&self, id: &ConnectionId) -> bool {
        let recoverable = self.recovery.unregister(id);
        let evicted = self.registry.evict(id, RemovalReason::Unregistered).await;
        recoverable || evicted
    }

    /// Report a read/write failure from the transport layer. The connection
    /// is evicted and, if recoverable, queued for recovery.
    pub async fn on_transport_error(&self, id: &ConnectionId, error: &Error) -> bool {
        warn!(connection_id = %id, error = %error, "Transport error");
        self.metrics.record_error(
            ErrorCategory::Connection,
            format!("transport error on {id}: {error}"),
        );
        self.metrics
            .record_connection_error(id, format!("transport error: {error}"));
        self.diagnostics.log_error(id, "transport error", error);

        let evicted = self.registry.evict(id, RemovalReason::TransportError).await;
        self.recovery
            .on_disconnect(id, DisconnectCause::TransportError(error.to_string()));
        evicted
    }

    // -------------------------------------------------------------------------
    // Traffic
    // -------------------------------------------------------------------------

    pub fn record_message_sent(&self, id: &ConnectionId, message_type: &str, bytes: usize) {
        self.registry.record_sent(id, bytes);
        self.metrics.record_message_sent(message_type, bytes);
        self.metrics.record_connection_sent(id, message_type, bytes);
        self.diagnostics
            .log_message(id, message_type, bytes, Direction::Outbound, None);
    }

    pub fn record_message_received(&self, id: &ConnectionId, message_type: &str, bytes: usize) {
        self.registry.record_received(id, bytes);
        self.metrics.record_message_received(message_type, bytes);
        self.metrics
            .record_connection_received(id, message_type, bytes);
        self.diagnostics
            .log_message(id, message_type, bytes, Direction::Inbound, None);
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    pub fn can_accept(&self) -> bool {
        self.registry.can_accept()
    }

    pub fn available_capacity(&self) -> usize {
        self.registry.available_capacity()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn connection(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.registry.get(id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the connection is not registered.
    pub fn connection_health(&self, id: &ConnectionId) -> Result<ConnectionHealthSnapshot> {
        self.scorer.connection_health(id)
    }

    /// Recompute and return fleet-wide health.
    pub fn aggregate_health(&self) -> AggregateHealth {
        self.scorer.recompute_aggregate()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.summary()
    }

    pub fn connection_metrics(&self, id: &ConnectionId) -> Option<ConnectionStats> {
        self.metrics.connection_metrics(id)
    }

    pub fn all_connection_metrics(&self) -> Vec<ConnectionStats> {
        self.metrics.all_connection_metrics()
    }

    /// Time-series samples recorded after `since`.
    pub fn time_series(&self, since: DateTime<Utc>) -> Vec<TimeSeriesPoint> {
        self.metrics.time_series(since)
    }

    pub fn pool_metrics(&self) -> PoolMetrics {
        self.registry.metrics()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.registry.stats()
    }

    pub fn heartbeat_metrics(&self) -> HeartbeatMetrics {
        self.heartbeat.metrics()
    }

    pub fn recovery_metrics(&self) -> RecoveryMetrics {
        self.recovery.metrics()
    }

    pub fn recovery_status(&self, id: &ConnectionId) -> Option<RecoveryStatus> {
        self.recovery.status(id)
    }

    /// Take every pending alert.
    pub fn alerts(&self) -> Vec<HealthAlert> {
        self.alerts.drain()
    }

    pub fn alert_stats(&self) -> AlertStats {
        self.alerts.stats()
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Fails when diagnostics are disabled, the connection is unknown or
    /// the session limit is reached.
    pub fn start_debug_session(
        &self,
        id: &ConnectionId,
        features: impl IntoIterator<Item = DebugFeature>,
        level: LogLevel,
    ) -> Result<DebugSessionId> {
        self.diagnostics.start_debug_session(id, features, level)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such session is open.
    pub fn stop_debug_session(&self, session: &DebugSessionId) -> Result<()> {
        self.diagnostics.stop_debug_session(session)
    }

    /// # Errors
    ///
    /// Fails when diagnostics are disabled or the connection is unknown.
    pub async fn perform_health_check(
        &self,
        id: &ConnectionId,
        kind: HealthCheckKind,
    ) -> Result<HealthCheckResult> {
        self.diagnostics.perform_health_check(id, kind).await
    }

    /// # Errors
    ///
    /// Fails when diagnostics are disabled or the connection is unknown.
    pub fn connection_diagnostics(&self, id: &ConnectionId) -> Result<ConnectionDiagnostics> {
        self.diagnostics.connection_diagnostics(id)
    }

    pub fn system_diagnostics(&self) -> SystemDiagnostics {
        self.diagnostics.system_diagnostics()
    }

    // -------------------------------------------------------------------------
    // Components
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn scorer(&self) -> &Arc<HealthScorer> {
        &self.scorer
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatProbe> {
        &self.heartbeat
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsManager> {
        &self.diagnostics
    }
}
