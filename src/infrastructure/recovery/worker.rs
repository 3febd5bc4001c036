//! Recovery workers and the reconnection attempt loop.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::record::{RecoverableConnection, RecoveryRequest};
use super::RecoveryEngine;
use crate::domain::{HealthAlert, RecoveryOutcome, RecoveryState, RemovalReason};
use crate::error::{Error, Result};
use crate::infrastructure::metrics::ErrorCategory;
use crate::port::TransportHandle;

/// Consume recovery requests until cancelled. Requests still queued at
/// shutdown complete as cancelled.
pub(super) async fn run(engine: Arc<RecoveryEngine>, worker_id: usize, cancel: CancellationToken) {
    debug!(worker_id, "Recovery worker started");
    loop {
        let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = engine.queue.pop() => request,
        };
        engine.process(request, &cancel).await;
    }

    for request in engine.queue.drain() {
        if let Some(connection) = engine.connection(&request.id) {
            connection.record.lock().pending = false;
        }
        request.complete(RecoveryOutcome::Cancelled);
    }
    debug!(worker_id, "Recovery worker stopped");
}

impl RecoveryEngine {
    async fn process(&self, request: RecoveryRequest, shutdown: &CancellationToken) {
        let Some(connection) = self.connection(&request.id) else {
            request.complete(RecoveryOutcome::Skipped);
            return;
        };

        let claimed = {
            let mut record = connection.record.lock();
            if record.pending && record.transition(RecoveryState::Reconnecting) {
                record.retry_count = 0;
                true
            } else {
                false
            }
        };
        if !claimed {
            debug!(connection_id = %request.id, "Recovery request no longer applicable");
            request.complete(RecoveryOutcome::Skipped);
            return;
        }

        self.note_state_change(
            &request.id,
            RecoveryState::Disconnected,
            RecoveryState::Reconnecting,
            "recovery_started",
        );
        self.counters.lock().active += 1;
        info!(
            connection_id = %request.id,
            cause = %request.cause,
            queued_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "Recovery started"
        );

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = connection.scope.cancelled() => RecoveryOutcome::Cancelled,
            _ = shutdown.cancelled() => RecoveryOutcome::Cancelled,
            result = timeout(self.config.recovery_timeout(), self.attempt_loop(&connection, started)) => {
                result.unwrap_or_else(|_| RecoveryOutcome::TimedOut {
                    attempts: connection.record.lock().retry_count,
                })
            }
        };
        let elapsed = started.elapsed();

        self.finish(&connection, &outcome);
        {
            let mut counters = self.counters.lock();
            counters.active = counters.active.saturating_sub(1);
            counters.record_outcome(&outcome, elapsed);
        }
        request.complete(outcome);
    }

    /// Up to `max_retries` dials; attempt `k > 0` waits `backoff(k)` first.
    async fn attempt_loop(
        &self,
        connection: &RecoverableConnection,
        started: Instant,
    ) -> RecoveryOutcome {
        let id = &connection.id;
        let max_retries = self.config.max_retries;

        for attempt in 0..max_retries {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt);
                connection.record.lock().backoff = delay;
                debug!(
                    connection_id = %id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                sleep(delay).await;
            }
            connection.record.lock().retry_count = attempt + 1;

            match self.reconnect(connection).await {
                Ok(handle) => {
                    connection.record.lock().handle = Some(handle);
                    return RecoveryOutcome::Recovered {
                        attempts: attempt + 1,
                        elapsed: started.elapsed(),
                    };
                }
                Err(e) => {
                    warn!(
                        connection_id = %id,
                        attempt = attempt + 1,
                        max_retries,
                        error = %e,
                        "Reconnection attempt failed"
                    );
                    connection.record.lock().last_error = Some(e.to_string());
                }
            }
        }

        RecoveryOutcome::Exhausted {
            attempts: max_retries,
        }
    }

    /// Dial within the handshake timeout and re-register the new handle.
    async fn reconnect(&self, connection: &RecoverableConnection) -> Result<TransportHandle> {
        let id = &connection.id;
        let handshake_timeout = self.config.handshake_timeout();
        let handle = timeout(handshake_timeout, connection.dialer.dial())
            .await
            .map_err(|_| Error::Timeout(handshake_timeout))??;

        if connection.scope.is_cancelled() {
            handle.close().await;
            return Err(Error::Transport("connection drained during dial".into()));
        }

        let accepted = self
            .registry
            .replace(id.clone(), Arc::clone(&handle), connection.attributes.clone())
            .await;
        if !accepted {
            handle.close().await;
            return Err(Error::Capacity("registry rejected re-registration".into()));
        }

        // Unregistered while the replacement was being inserted.
        if connection.scope.is_cancelled() {
            self.registry.evict(id, RemovalReason::Unregistered).await;
            return Err(Error::Transport("connection drained during re-registration".into()));
        }
        Ok(handle)
    }

    fn finish(&self, connection: &RecoverableConnection, outcome: &RecoveryOutcome) {
        let id = &connection.id;
        let (from, to) = {
            let mut record = connection.record.lock();
            let from = record.state;
            record.pending = false;
            match outcome {
                RecoveryOutcome::Recovered { .. } => {
                    if record.transition(RecoveryState::Connected) {
                        record.retry_count = 0;
                        record.backoff = self.config.initial_backoff();
                        record.health_score = 1.0;
                        record.last_error = None;
                        record.last_seen = Utc::now();
                    }
                }
                RecoveryOutcome::Exhausted { .. } | RecoveryOutcome::TimedOut { .. } => {
                    record.transition(RecoveryState::Failed);
                    record.health_score = 0.0;
                }
                RecoveryOutcome::Cancelled => {
                    record.transition(RecoveryState::Disconnected);
                }
                RecoveryOutcome::Skipped | RecoveryOutcome::Dropped => {}
            }
            (from, record.state)
        };
        self.note_state_change(id, from, to, outcome_label(outcome));

        match outcome {
            RecoveryOutcome::Recovered { attempts, elapsed } => {
                info!(
                    connection_id = %id,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Connection recovered"
                );
                self.alerts
                    .publish(HealthAlert::recovery_complete(id, *attempts, *elapsed));
                self.metrics.record_reconnection(id);
            }
            RecoveryOutcome::Exhausted { attempts } | RecoveryOutcome::TimedOut { attempts } => {
                let last_error = connection.record.lock().last_error.clone();
                error!(
                    connection_id = %id,
                    attempts,
                    outcome = outcome_label(outcome),
                    last_error = last_error.as_deref().unwrap_or("none"),
                    "Recovery failed"
                );
                self.alerts
                    .publish(HealthAlert::recovery_failed(id, *attempts));
                self.metrics.record_error(
                    ErrorCategory::Connection,
                    format!("recovery of {id} failed after {attempts} attempts"),
                );
            }
            RecoveryOutcome::Cancelled => {
                info!(connection_id = %id, "Recovery cancelled");
            }
            RecoveryOutcome::Skipped | RecoveryOutcome::Dropped => {}
        }
    }
}

fn outcome_label(outcome: &RecoveryOutcome) -> &'static str {
    match outcome {
        RecoveryOutcome::Recovered { .. } => "recovered",
        RecoveryOutcome::Exhausted { .. } => "retries_exhausted",
        RecoveryOutcome::TimedOut { .. } => "recovery_timeout",
        RecoveryOutcome::Cancelled => "cancelled",
        RecoveryOutcome::Skipped => "skipped",
        RecoveryOutcome::Dropped => "dropped",
    }
}

