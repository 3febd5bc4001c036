//! Capacity-bounded registry of live connections.
//!
//! The registry owns every connection handle for lifetime purposes. Other
//! components refer to connections by [`ConnectionId`] only and learn about
//! arrivals and departures through [`RegistryObserver`] callbacks, which run
//! after the map lock is released. A separate lifecycle lock spans each map
//! change and its notification, so observers see events for one ID in the
//! order the map applied them.
//!
//! Admission is atomic: the capacity check and the insert happen under one
//! write lock, so concurrent `add` calls can never push the registry past
//! `max_connections`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ConnectionAttributes, ConnectionId, ConnectionInfo, RemovalReason};
use crate::error::Result;
use crate::infrastructure::config::RegistryConfig;
use crate::infrastructure::task::run_periodic;
use crate::port::{RegistryObserver, TransportHandle};

mod state;

use state::{PoolCounters, RegisteredConnection};
pub use state::{PoolMetrics, PoolStats};

/// Rejection reason when the registry is at capacity.
pub const REJECT_POOL_FULL: &str = "pool_full";

/// Rejection reason when the ID is already registered.
pub const REJECT_DUPLICATE_ID: &str = "duplicate_id";

pub struct ConnectionRegistry {
    config: RegistryConfig,
    connections: RwLock<HashMap<ConnectionId, Arc<RegisteredConnection>>>,
    counters: Mutex<PoolCounters>,
    observers: RwLock<Vec<Arc<dyn RegistryObserver>>>,
    /// Held across a map change and its notification. Never held across an
    /// await.
    lifecycle: Mutex<()>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connections: RwLock::new(HashMap::with_capacity(config.max_connections.min(4096))),
            config,
            counters: Mutex::new(PoolCounters::default()),
            observers: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(()),
        })
    }

    /// Subscribe to add, reject and removal notifications.
    pub fn add_observer(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.write().push(observer);
    }

    /// Admit a connection.
    ///
    /// Returns `false` with reason [`REJECT_POOL_FULL`] when at capacity, or
    /// [`REJECT_DUPLICATE_ID`] when the ID is taken. A rejected handle is
    /// not closed; the caller still owns it.
    pub fn add(
        &self,
        id: ConnectionId,
        handle: TransportHandle,
        attributes: ConnectionAttributes,
    ) -> bool {
        let record = Arc::new(RegisteredConnection::new(id.clone(), handle, attributes));
        let _lifecycle = self.lifecycle.lock();

        let outcome = {
            let mut map = self.connections.write();
            if map.len() >= self.config.max_connections {
                Err(REJECT_POOL_FULL)
            } else if map.contains_key(&id) {
                Err(REJECT_DUPLICATE_ID)
            } else {
                map.insert(id.clone(), Arc::clone(&record));
                Ok(map.len())
            }
        };

        match outcome {
            Ok(active) => {
                self.counters.lock().record_accept(active);
                debug!(connection_id = %id, active, "Connection registered");
                self.notify_registered(&record.info());
                true
            }
            Err(reason) => {
                self.counters.lock().record_reject(reason);
                warn!(connection_id = %id, reason, "Connection rejected");
                self.notify_rejected(&id, reason);
                false
            }
        }
    }

    /// Swap in a re-established handle for `id`, or admit it if absent.
    ///
    /// The previous handle, if any, is closed. Still subject to capacity
    /// when `id` is not currently registered.
    pub async fn replace(
        &self,
        id: ConnectionId,
        handle: TransportHandle,
        attributes: ConnectionAttributes,
    ) -> bool {
        let record = Arc::new(RegisteredConnection::new(id.clone(), handle, attributes));

        let previous = {
            let _lifecycle = self.lifecycle.lock();
            let outcome = {
                let mut map = self.connections.write();
                if !map.contains_key(&id) && map.len() >= self.config.max_connections {
                    Err(REJECT_POOL_FULL)
                } else {
                    let previous = map.insert(id.clone(), Arc::clone(&record));
                    Ok((previous, map.len()))
                }
            };

            let (previous, active) = match outcome {
                Ok(v) => v,
                Err(reason) => {
                    self.counters.lock().record_reject(reason);
                    warn!(connection_id = %id, reason, "Replacement rejected");
                    self.notify_rejected(&id, reason);
                    return false;
                }
            };

            if let Some(previous) = &previous {
                self.finish_removal(previous, RemovalReason::Replaced);
            }
            self.counters.lock().record_accept(active);
            info!(connection_id = %id, "Connection replaced");
            self.notify_registered(&record.info());
            previous
        };

        if let Some(previous) = previous {
            previous.handle.close().await;
        }
        true
    }

    /// Remove a connection without closing its handle.
    ///
    /// Returns `false` if the ID is not registered.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.take(id, RemovalReason::Unregistered).is_some()
    }

    /// Remove a connection and close its handle.
    pub async fn evict(&self, id: &ConnectionId, reason: RemovalReason) -> bool {
        match self.take(id, reason) {
            Some(record) => {
                record.handle.close().await;
                true
            }
            None => false,
        }
    }

    fn take(&self, id: &ConnectionId, reason: RemovalReason) -> Option<Arc<RegisteredConnection>> {
        let _lifecycle = self.lifecycle.lock();
        let record = self.connections.write().remove(id)?;
        self.finish_removal(&record, reason);
        Some(record)
    }

    fn finish_removal(&self, record: &RegisteredConnection, reason: RemovalReason) {
        let lifetime = record.lifetime();
        self.counters.lock().record_close(reason.as_str(), lifetime);
        debug!(
            connection_id = %record.id,
            reason = reason.as_str(),
            lifetime_ms = lifetime.as_millis() as u64,
            "Connection removed"
        );
        for observer in self.observers.read().iter() {
            observer.on_removed(&record.id, reason, lifetime);
        }
    }

    /// Evict every connection idle for longer than `max_idle`, closing each
    /// handle. Returns the number evicted.
    pub async fn cleanup_stale(&self, max_idle: Duration) -> usize {
        let stale: Vec<Arc<RegisteredConnection>> = {
            let _lifecycle = self.lifecycle.lock();
            let stale: Vec<Arc<RegisteredConnection>> = {
                let mut map = self.connections.write();
                let ids: Vec<ConnectionId> = map
                    .values()
                    .filter(|record| record.idle() > max_idle)
                    .map(|record| record.id.clone())
                    .collect();
                ids.iter().filter_map(|id| map.remove(id)).collect()
            };
            for record in &stale {
                self.finish_removal(record, RemovalReason::Stale);
            }
            stale
        };

        self.counters.lock().last_cleanup = Some(Utc::now());

        for record in &stale {
            record.handle.close().await;
        }

        if !stale.is_empty() {
            info!(evicted = stale.len(), "Evicted stale connections");
        }
        stale.len()
    }

    /// Remove and close every connection.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<RegisteredConnection>> = {
            let _lifecycle = self.lifecycle.lock();
            let drained: Vec<Arc<RegisteredConnection>> =
                self.connections.write().drain().map(|(_, record)| record).collect();
            for record in &drained {
                self.finish_removal(record, RemovalReason::Shutdown);
            }
            drained
        };
        for record in &drained {
            record.handle.close().await;
        }
        drained.len()
    }

    /// Run the stale-connection sweep until cancelled.
    pub async fn run_cleanup(self: Arc<Self>, cancel: CancellationToken) {
        let max_idle = self.config.max_idle();
        run_periodic("registry_cleanup", self.config.cleanup_interval(), cancel, || {
            let registry = Arc::clone(&self);
            async move {
                registry.cleanup_stale(max_idle).await;
            }
        })
        .await;
    }

    /// Refresh `last_activity` for a connection.
    pub fn touch(&self, id: &ConnectionId) -> bool {
        self.with_record(id, |record| record.activity.lock().touch())
            .is_some()
    }

    /// Account an outbound message and refresh activity.
    pub fn record_sent(&self, id: &ConnectionId, bytes: usize) -> bool {
        self.with_record(id, |record| {
            let mut activity = record.activity.lock();
            activity.messages_sent += 1;
            activity.bytes_sent += bytes as u64;
            activity.touch();
        })
        .is_some()
    }

    /// Account an inbound message and refresh activity.
    pub fn record_received(&self, id: &ConnectionId, bytes: usize) -> bool {
        self.with_record(id, |record| {
            let mut activity = record.activity.lock();
            activity.messages_received += 1;
            activity.bytes_received += bytes as u64;
            activity.touch();
        })
        .is_some()
    }

    fn with_record<T>(&self, id: &ConnectionId, f: impl FnOnce(&RegisteredConnection) -> T) -> Option<T> {
        let record = self.connections.read().get(id).cloned()?;
        Some(f(&record))
    }

    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.with_record(id, RegisteredConnection::info)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn by_repository(&self, repository: &str) -> Vec<ConnectionInfo> {
        self.filter(|record| record.attributes.repository.as_deref() == Some(repository))
    }

    pub fn by_session(&self, session_id: &str) -> Vec<ConnectionInfo> {
        self.filter(|record| record.attributes.session_id.as_deref() == Some(session_id))
    }

    fn filter(&self, pred: impl Fn(&RegisteredConnection) -> bool) -> Vec<ConnectionInfo> {
        let matched: Vec<Arc<RegisteredConnection>> = self
            .connections
            .read()
            .values()
            .filter(|record| pred(record))
            .cloned()
            .collect();
        matched.iter().map(|record| record.info()).collect()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().cloned().collect()
    }

    /// Transport handle for a registered connection.
    pub(crate) fn handle(&self, id: &ConnectionId) -> Option<TransportHandle> {
        self.connections
            .read()
            .get(id)
            .map(|record| Arc::clone(&record.handle))
    }

    /// Every registered connection with its transport handle.
    pub(crate) fn handles(&self) -> Vec<(ConnectionId, TransportHandle)> {
        self.connections
            .read()
            .values()
            .map(|record| (record.id.clone(), Arc::clone(&record.handle)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    /// Whether a new connection would currently be admitted.
    pub fn can_accept(&self) -> bool {
        self.len() < self.config.max_connections
    }

    pub fn available_capacity(&self) -> usize {
        self.config.max_connections.saturating_sub(self.len())
    }

    pub fn metrics(&self) -> PoolMetrics {
        let active = self.len();
        let counters = self.counters.lock();
        PoolMetrics {
            total_accepted: counters.accepted,
            total_rejected: counters.rejected,
            total_closed: counters.closed,
            active,
            peak: counters.peak,
            max_connections: self.config.max_connections,
            rejection_reasons: counters.rejection_reasons.clone(),
            removal_reasons: counters.removal_reasons.clone(),
            average_lifetime: counters.average_lifetime,
            last_cleanup: counters.last_cleanup,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total: 0,
            max_connections: self.config.max_connections,
            utilization_percent: 0.0,
            by_repository: HashMap::new(),
            by_session: HashMap::new(),
            by_protocol_version: HashMap::new(),
        };

        let map = self.connections.read();
        for record in map.values() {
            let attrs = &record.attributes;
            if let Some(repo) = &attrs.repository {
                *stats.by_repository.entry(repo.clone()).or_default() += 1;
            }
            if let Some(session) = &attrs.session_id {
                *stats.by_session.entry(session.clone()).or_default() += 1;
            }
            *stats
                .by_protocol_version
                .entry(attrs.protocol_version.clone())
                .or_default() += 1;
        }
        stats.total = map.len();
        stats.utilization_percent =
            stats.total as f64 / self.config.max_connections as f64 * 100.0;
        stats
    }

    /// Clear the pool counters. Test support only.
    pub fn reset_metrics(&self) {
        *self.counters.lock() = PoolCounters::default();
    }

    fn notify_registered(&self, info: &ConnectionInfo) {
        for observer in self.observers.read().iter() {
            observer.on_registered(info);
        }
    }

    fn notify_rejected(&self, id: &ConnectionId, reason: &'static str) {
        for observer in self.observers.read().iter() {
            observer.on_rejected(id, reason);
        }
    }
}
