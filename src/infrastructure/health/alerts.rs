//! Bounded, lossy alert channel.
//!
//! Publishing never blocks: when the channel is full the new alert is dropped
//! and counted. Consumers drain at their own pace and lose alerts if they
//! fall behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{AlertKind, ConnectionId, HealthAlert};

pub struct AlertChannel {
    tx: mpsc::Sender<HealthAlert>,
    rx: Mutex<mpsc::Receiver<HealthAlert>>,
    cooldown: Duration,
    last_sent: Mutex<HashMap<(ConnectionId, AlertKind), Instant>>,
    published: AtomicU64,
    dropped: AtomicU64,
    suppressed: AtomicU64,
}

/// Counters describing alert delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AlertStats {
    pub published: u64,
    pub dropped: u64,
    pub suppressed: u64,
}

impl AlertChannel {
    /// `capacity` must be non-zero; configuration validation guarantees it.
    pub fn new(capacity: usize, cooldown: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Enqueue an alert. Returns `false` if it was dropped.
    pub fn publish(&self, alert: HealthAlert) -> bool {
        match self.tx.try_send(alert) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(alert)) | Err(TrySendError::Closed(alert)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = alert.kind.as_str(),
                    dropped, "Alert channel full, dropping alert"
                );
                false
            }
        }
    }

    /// Enqueue an alert, suppressing repeatable kinds fired for the same
    /// connection within the cooldown.
    pub fn publish_throttled(&self, alert: HealthAlert) -> bool {
        if let (true, Some(id)) = (alert.kind.is_repeatable(), alert.connection_id.as_ref()) {
            let key = (id.clone(), alert.kind);
            let now = Instant::now();
            let mut last_sent = self.last_sent.lock();
            if let Some(previous) = last_sent.get(&key) {
                if now.duration_since(*previous) < self.cooldown {
                    self.suppressed.fetch_add(1, Ordering::Relaxed);
                    debug!(connection_id = %id, kind = alert.kind.as_str(), "Alert suppressed by cooldown");
                    return false;
                }
            }
            last_sent.insert(key, now);
        }
        self.publish(alert)
    }

    /// Take every queued alert without waiting.
    pub fn drain(&self) -> Vec<HealthAlert> {
        let mut rx = self.rx.lock();
        let mut alerts = Vec::new();
        while let Ok(alert) = rx.try_recv() {
            alerts.push(alert);
        }
        alerts
    }

    /// Forget cooldown state for a departed connection.
    pub fn forget(&self, id: &ConnectionId) {
        self.last_sent.lock().retain(|(key_id, _), _| key_id != id);
    }

    pub fn stats(&self) -> AlertStats {
        AlertStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HealthState;

    fn id() -> ConnectionId {
        ConnectionId::from("c1")
    }

    #[test]
    fn drops_when_full_without_blocking() {
        let channel = AlertChannel::new(2, Duration::ZERO);
        for _ in 0..3 {
            channel.publish(HealthAlert::connection_down(&id(), 3));
        }
        let stats = channel.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(channel.drain().len(), 2);
        assert!(channel.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_throttles_repeatable_kinds() {
        let channel = AlertChannel::new(10, Duration::from_secs(60));
        assert!(channel.publish_throttled(HealthAlert::connection_down(&id(), 3)));
        assert!(!channel.publish_throttled(HealthAlert::connection_down(&id(), 4)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(channel.publish_throttled(HealthAlert::connection_down(&id(), 5)));
        assert_eq!(channel.stats().suppressed, 1);
    }

    #[test]
    fn state_changes_are_never_throttled() {
        let channel = AlertChannel::new(10, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(channel.publish_throttled(HealthAlert::state_changed(
                &id(),
                HealthState::Healthy,
                HealthState::Warning,
                0.7,
            )));
        }
        assert_eq!(channel.drain().len(), 3);
    }

    #[tokio::test]
    async fn forget_resets_cooldown() {
        let channel = AlertChannel::new(10, Duration::from_secs(60));
        assert!(channel.publish_throttled(HealthAlert::connection_down(&id(), 3)));
        channel.forget(&id());
        assert!(channel.publish_throttled(HealthAlert::connection_down(&id(), 3)));
    }
}
