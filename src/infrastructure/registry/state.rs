//! Registry record and counter types.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::domain::{ConnectionAttributes, ConnectionId, ConnectionInfo};
use crate::port::TransportHandle;

/// One registered connection.
///
/// Identity is immutable; activity fields sit behind their own lock so
/// traffic accounting never takes the registry's map lock for writing.
pub(super) struct RegisteredConnection {
    pub(super) id: ConnectionId,
    pub(super) attributes: ConnectionAttributes,
    pub(super) handle: TransportHandle,
    pub(super) connected_at: DateTime<Utc>,
    pub(super) connected_instant: Instant,
    pub(super) activity: Mutex<Activity>,
}

#[derive(Debug, Clone)]
pub(super) struct Activity {
    pub(super) last_activity: Instant,
    pub(super) last_activity_at: DateTime<Utc>,
    pub(super) messages_sent: u64,
    pub(super) messages_received: u64,
    pub(super) bytes_sent: u64,
    pub(super) bytes_received: u64,
}

impl Activity {
    pub(super) fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }
}

impl RegisteredConnection {
    pub(super) fn new(
        id: ConnectionId,
        handle: TransportHandle,
        attributes: ConnectionAttributes,
    ) -> Self {
        let now = Instant::now();
        let now_at = Utc::now();
        Self {
            id,
            attributes,
            handle,
            connected_at: now_at,
            connected_instant: now,
            activity: Mutex::new(Activity {
                last_activity: now,
                last_activity_at: now_at,
                messages_sent: 0,
                messages_received: 0,
                bytes_sent: 0,
                bytes_received: 0,
            }),
        }
    }

    pub(super) fn idle(&self) -> Duration {
        self.activity.lock().last_activity.elapsed()
    }

    pub(super) fn lifetime(&self) -> Duration {
        self.connected_instant.elapsed()
    }

    /// Copy of the identifying fields. Never exposes the handle.
    pub(super) fn info(&self) -> ConnectionInfo {
        let activity = self.activity.lock().clone();
        ConnectionInfo {
            id: self.id.clone(),
            attributes: self.attributes.clone(),
            connected_at: self.connected_at,
            last_activity: activity.last_activity_at,
            idle: activity.last_activity.elapsed(),
            messages_sent: activity.messages_sent,
            messages_received: activity.messages_received,
            bytes_sent: activity.bytes_sent,
            bytes_received: activity.bytes_received,
        }
    }
}

/// Monotonic pool counters. Only `reset` clears them.
#[derive(Debug, Default)]
pub(super) struct PoolCounters {
    pub(super) accepted: u64,
    pub(super) rejected: u64,
    pub(super) closed: u64,
    pub(super) peak: usize,
    pub(super) rejection_reasons: HashMap<String, u64>,
    pub(super) removal_reasons: HashMap<String, u64>,
    pub(super) average_lifetime: Duration,
    pub(super) last_cleanup: Option<DateTime<Utc>>,
}

impl PoolCounters {
    pub(super) fn record_accept(&mut self, active: usize) {
        self.accepted += 1;
        self.peak = self.peak.max(active);
    }

    pub(super) fn record_reject(&mut self, reason: &'static str) {
        self.rejected += 1;
        *self.rejection_reasons.entry(reason.to_string()).or_default() += 1;
    }

    /// Count a closure and fold its lifetime into a 0.9/0.1 moving average.
    pub(super) fn record_close(&mut self, reason: &'static str, lifetime: Duration) {
        self.closed += 1;
        *self.removal_reasons.entry(reason.to_string()).or_default() += 1;
        self.average_lifetime = if self.average_lifetime.is_zero() {
            lifetime
        } else {
            self.average_lifetime.mul_f64(0.9) + lifetime.mul_f64(0.1)
        };
    }
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_closed: u64,
    pub active: usize,
    pub peak: usize,
    pub max_connections: usize,
    pub rejection_reasons: HashMap<String, u64>,
    pub removal_reasons: HashMap<String, u64>,
    pub average_lifetime: Duration,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Current registry occupancy broken down by attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub max_connections: usize,
    pub utilization_percent: f64,
    pub by_repository: HashMap<String, usize>,
    pub by_session: HashMap<String, usize>,
    pub by_protocol_version: HashMap<String, usize>,
}
