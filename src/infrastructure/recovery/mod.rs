//! Automatic reconnection of server-initiated connections.
//!
//! Disconnection signals from any detector land in
//! [`RecoveryEngine::handle_disconnection`], which moves the connection to
//! `Disconnected` and enqueues a request on a bounded priority queue. A
//! fixed pool of workers drains the queue, redialing with exponential
//! backoff and re-registering successes with the [`ConnectionRegistry`].
//! A periodic health checker pings connected recoverable connections and
//! feeds failures into the same pipeline.
//!
//! Recovery records outlive registry eviction: a connection is evicted
//! first and recovered afterwards. Records are dropped only by
//! [`RecoveryEngine::unregister`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::domain::{
    BackoffPolicy, ConnectionAttributes, ConnectionId, DisconnectCause, RecoveryOutcome,
    RecoveryPriority, RecoveryState, RecoveryStatus,
};
use crate::error::{Error, Result};
use crate::infrastructure::config::RecoveryConfig;
use crate::infrastructure::diagnostics::DiagnosticsManager;
use crate::infrastructure::health::AlertChannel;
use crate::infrastructure::metrics::MetricsAggregator;
use crate::infrastructure::registry::ConnectionRegistry;
use crate::infrastructure::task::run_periodic;
use crate::port::{Dialer, DisconnectListener, TransportHandle};

mod checker;
mod queue;
mod record;
mod worker;

use queue::RecoveryQueue;
use record::{RecoverableConnection, RecoveryRequest};
pub use record::{RecoveryCallback, RecoveryMetrics};

pub struct RecoveryEngine {
    config: RecoveryConfig,
    backoff: BackoffPolicy,
    registry: Arc<ConnectionRegistry>,
    alerts: Arc<AlertChannel>,
    metrics: Arc<MetricsAggregator>,
    diagnostics: Option<Arc<DiagnosticsManager>>,
    connections: RwLock<HashMap<ConnectionId, Arc<RecoverableConnection>>>,
    queue: RecoveryQueue,
    counters: Mutex<RecoveryMetrics>,
}

impl RecoveryEngine {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: RecoveryConfig,
        registry: Arc<ConnectionRegistry>,
        alerts: Arc<AlertChannel>,
        metrics: Arc<MetricsAggregator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backoff: config.backoff(),
            queue: RecoveryQueue::new(config.queue_capacity),
            config,
            registry,
            alerts,
            metrics,
            diagnostics: None,
            connections: RwLock::new(HashMap::new()),
            counters: Mutex::new(RecoveryMetrics::default()),
        })
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticsManager>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Track a connected connection and how to redial it.
    ///
    /// Re-registering an ID cancels any in-flight recovery for the old
    /// record.
    pub fn register(
        &self,
        id: ConnectionId,
        attributes: ConnectionAttributes,
        handle: TransportHandle,
        dialer: Arc<dyn Dialer>,
        priority: RecoveryPriority,
    ) {
        let target = dialer.target();
        let connection = Arc::new(RecoverableConnection::new(
            id.clone(),
            attributes,
            handle,
            dialer,
            priority,
            self.config.initial_backoff(),
            self.config.enabled_by_default,
        ));
        let previous = self.connections.write().insert(id.clone(), connection);
        if let Some(previous) = previous {
            drain(&previous);
        }
        debug!(
            connection_id = %id,
            dial_target = %target,
            ?priority,
            "Recoverable connection registered"
        );
    }

    /// Stop tracking `id`. Moves it to `Draining` and cancels any in-flight
    /// recovery.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let Some(connection) = self.connections.write().remove(id) else {
            return false;
        };
        drain(&connection);
        debug!(connection_id = %id, "Recoverable connection drained");
        true
    }

    pub fn is_tracked(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` is not tracked.
    pub fn set_recovery_enabled(&self, id: &ConnectionId, enabled: bool) -> Result<()> {
        let connection = self
            .connection(id)
            .ok_or_else(|| Error::connection_not_found(id))?;
        connection.record.lock().recovery_enabled = enabled;
        info!(connection_id = %id, enabled, "Recovery toggled");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Disconnection
    // -------------------------------------------------------------------------

    /// Queue a recovery for `id`. Returns whether a request was enqueued.
    ///
    /// A `Failed` connection is eligible again through this call; automatic
    /// detectors going through [`DisconnectListener`] leave it alone.
    pub fn handle_disconnection(&self, id: &ConnectionId, cause: DisconnectCause) -> bool {
        self.enqueue(id, cause, None, true)
    }

    /// Like [`handle_disconnection`](Self::handle_disconnection), with a
    /// callback that receives the outcome exactly once, including when no
    /// request was enqueued.
    pub fn handle_disconnection_with(
        &self,
        id: &ConnectionId,
        cause: DisconnectCause,
        callback: RecoveryCallback,
    ) -> bool {
        self.enqueue(id, cause, Some(callback), true)
    }

    fn enqueue(
        &self,
        id: &ConnectionId,
        cause: DisconnectCause,
        callback: Option<RecoveryCallback>,
        allow_failed: bool,
    ) -> bool {
        let skip = |callback: Option<RecoveryCallback>, why: &'static str| {
            debug!(connection_id = %id, reason = why, "Recovery not queued");
            if let Some(callback) = callback {
                callback(RecoveryOutcome::Skipped);
            }
            false
        };

        if !self.config.enabled {
            return skip(callback, "recovery disabled");
        }
        let Some(connection) = self.connection(id) else {
            return skip(callback, "not recoverable");
        };

        let decision = {
            let mut record = connection.record.lock();
            if !record.recovery_enabled {
                Err("recovery disabled for connection")
            } else if record.pending {
                Err("recovery already pending")
            } else if record.state == RecoveryState::Draining {
                Err("draining")
            } else if record.state == RecoveryState::Failed && !allow_failed {
                Err("failed; awaiting manual recovery")
            } else {
                let previous = record.state;
                if record.transition(RecoveryState::Disconnected) {
                    record.pending = true;
                    record.handle = None;
                    record.last_error = Some(cause.to_string());
                    Ok(previous)
                } else {
                    Err("invalid transition")
                }
            }
        };
        let previous = match decision {
            Ok(previous) => previous,
            Err(why) => return skip(callback, why),
        };

        self.note_state_change(id, previous, RecoveryState::Disconnected, &cause.to_string());

        let request = RecoveryRequest::new(id.clone(), connection.priority, cause, callback);
        match self.queue.push(request) {
            Ok(()) => {
                self.counters.lock().total_recoveries += 1;
                info!(
                    connection_id = %id,
                    priority = ?connection.priority,
                    queued = self.queue.len(),
                    "Recovery queued"
                );
                true
            }
            Err(request) => {
                connection.record.lock().pending = false;
                self.counters.lock().dropped += 1;
                warn!(
                    connection_id = %id,
                    capacity = self.queue.capacity(),
                    "Recovery queue full, dropping request"
                );
                request.complete(RecoveryOutcome::Dropped);
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn status(&self, id: &ConnectionId) -> Option<RecoveryStatus> {
        self.connection(id).map(|c| c.status())
    }

    pub fn all_status(&self) -> Vec<RecoveryStatus> {
        let connections: Vec<_> = self.connections.read().values().cloned().collect();
        let mut statuses: Vec<_> = connections.iter().map(|c| c.status()).collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub fn metrics(&self) -> RecoveryMetrics {
        let mut metrics = self.counters.lock().clone();
        metrics.queue_length = self.queue.len();
        metrics.queue_capacity = self.queue.capacity();
        metrics
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // -------------------------------------------------------------------------
    // Background tasks
    // -------------------------------------------------------------------------

    /// Spawn the worker pool and the health checker on `tracker`. Does
    /// nothing when recovery is disabled.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken, tracker: &TaskTracker) {
        if !self.config.enabled {
            info!("Recovery disabled, not starting workers");
            return;
        }

        for worker_id in 0..self.config.worker_count {
            tracker.spawn(worker::run(Arc::clone(self), worker_id, cancel.clone()));
        }

        let engine = Arc::clone(self);
        tracker.spawn(async move {
            let interval = engine.config.health_check_interval();
            run_periodic("recovery_health_check", interval, cancel, || {
                let engine = Arc::clone(&engine);
                async move {
                    engine.check_health().await;
                }
            })
            .await;
        });

        info!(
            workers = self.config.worker_count,
            queue_capacity = self.queue.capacity(),
            "Recovery engine started"
        );
    }

    fn connection(&self, id: &ConnectionId) -> Option<Arc<RecoverableConnection>> {
        self.connections.read().get(id).cloned()
    }

    fn note_state_change(
        &self,
        id: &ConnectionId,
        from: RecoveryState,
        to: RecoveryState,
        trigger: &str,
    ) {
        if from == to {
            return;
        }
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.record_state_change(id, from.as_str(), to.as_str(), trigger);
        }
    }
}

impl DisconnectListener for RecoveryEngine {
    fn on_disconnect(&self, id: &ConnectionId, cause: DisconnectCause) {
        self.enqueue(id, cause, None, false);
    }
}

fn drain(connection: &RecoverableConnection) {
    {
        let mut record = connection.record.lock();
        record.transition(RecoveryState::Draining);
        record.handle = None;
    }
    connection.scope.cancel();
}

#[cfg(test)]
mod tests;
