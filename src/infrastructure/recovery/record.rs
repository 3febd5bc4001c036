//! Per-connection recovery records, requests and counters.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    ConnectionAttributes, ConnectionId, DisconnectCause, RecoveryOutcome, RecoveryPriority,
    RecoveryState, RecoveryStatus,
};
use crate::port::{Dialer, TransportHandle};

/// Invoked exactly once with the outcome of a recovery request.
pub type RecoveryCallback = Box<dyn FnOnce(RecoveryOutcome) + Send + 'static>;

/// A connection the engine knows how to re-establish.
pub(super) struct RecoverableConnection {
    pub id: ConnectionId,
    pub attributes: ConnectionAttributes,
    pub dialer: Arc<dyn Dialer>,
    pub priority: RecoveryPriority,
    /// Cancelled when the connection is unregistered.
    pub scope: CancellationToken,
    pub record: Mutex<RecoveryRecord>,
}

pub(super) struct RecoveryRecord {
    pub state: RecoveryState,
    pub retry_count: u32,
    pub backoff: Duration,
    pub health_score: f64,
    pub recovery_enabled: bool,
    /// Set from enqueue until the worker finishes.
    pub pending: bool,
    pub handle: Option<TransportHandle>,
    pub last_seen: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl RecoverableConnection {
    pub fn new(
        id: ConnectionId,
        attributes: ConnectionAttributes,
        handle: TransportHandle,
        dialer: Arc<dyn Dialer>,
        priority: RecoveryPriority,
        initial_backoff: Duration,
        recovery_enabled: bool,
    ) -> Self {
        Self {
            id,
            attributes,
            dialer,
            priority,
            scope: CancellationToken::new(),
            record: Mutex::new(RecoveryRecord {
                state: RecoveryState::Connected,
                retry_count: 0,
                backoff: initial_backoff,
                health_score: 1.0,
                recovery_enabled,
                pending: false,
                handle: Some(handle),
                last_seen: Utc::now(),
                last_error: None,
            }),
        }
    }

    pub fn status(&self) -> RecoveryStatus {
        let record = self.record.lock();
        RecoveryStatus {
            id: self.id.clone(),
            state: record.state,
            retry_count: record.retry_count,
            backoff: record.backoff,
            health_score: record.health_score,
            recovery_enabled: record.recovery_enabled,
            priority: self.priority,
            last_seen: record.last_seen,
            last_error: record.last_error.clone(),
        }
    }
}

impl RecoveryRecord {
    /// Apply a state change if the state machine allows it.
    pub fn transition(&mut self, next: RecoveryState) -> bool {
        if self.state == next {
            return true;
        }
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// One queued recovery. Consumed exactly once.
pub(super) struct RecoveryRequest {
    pub id: ConnectionId,
    pub priority: RecoveryPriority,
    pub cause: DisconnectCause,
    pub enqueued_at: Instant,
    callback: Option<RecoveryCallback>,
}

impl RecoveryRequest {
    pub fn new(
        id: ConnectionId,
        priority: RecoveryPriority,
        cause: DisconnectCause,
        callback: Option<RecoveryCallback>,
    ) -> Self {
        Self {
            id,
            priority,
            cause,
            enqueued_at: Instant::now(),
            callback,
        }
    }

    pub fn complete(mut self, outcome: RecoveryOutcome) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

/// Recovery counters since startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryMetrics {
    pub total_recoveries: u64,
    pub successful: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Requests rejected by a full queue.
    pub dropped: u64,
    /// Requests currently being worked.
    pub active: u64,
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub average_recovery_time: Duration,
    pub min_recovery_time: Option<Duration>,
    pub max_recovery_time: Option<Duration>,
}

impl RecoveryMetrics {
    pub(super) fn record_outcome(&mut self, outcome: &RecoveryOutcome, elapsed: Duration) {
        match outcome {
            RecoveryOutcome::Recovered { .. } => {
                self.successful += 1;
                self.average_recovery_time = if self.successful == 1 {
                    elapsed
                } else {
                    self.average_recovery_time.mul_f64(0.9) + elapsed.mul_f64(0.1)
                };
                self.min_recovery_time =
                    Some(self.min_recovery_time.map_or(elapsed, |m| m.min(elapsed)));
                self.max_recovery_time =
                    Some(self.max_recovery_time.map_or(elapsed, |m| m.max(elapsed)));
            }
            RecoveryOutcome::Exhausted { .. } | RecoveryOutcome::TimedOut { .. } => {
                self.failed += 1;
            }
            RecoveryOutcome::Cancelled => self.cancelled += 1,
            RecoveryOutcome::Skipped | RecoveryOutcome::Dropped => {}
        }
    }
}
