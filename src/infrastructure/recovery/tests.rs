use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::oneshot;

use super::*;
use crate::domain::{AlertKind, RemovalReason};
use crate::port::Transport;
use crate::testkit;
use crate::testkit::domain::{attributes, connection_id as id};
use crate::testkit::transport::{MockTransport, ScriptedDialer};

// -- Helpers --------------------------------------------------------------

struct Fixture {
    registry: Arc<ConnectionRegistry>,
    alerts: Arc<AlertChannel>,
    engine: Arc<RecoveryEngine>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(testkit::config::recovery())
    }

    fn with_config(config: RecoveryConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(testkit::config::registry(10)).unwrap());
        let alerts = Arc::new(AlertChannel::new(100, Duration::ZERO));
        let metrics = Arc::new(MetricsAggregator::new());
        let engine = Arc::new(
            RecoveryEngine::new(config, Arc::clone(&registry), Arc::clone(&alerts), metrics)
                .unwrap(),
        );
        Self {
            registry,
            alerts,
            engine,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Register a live outbound connection with the registry and the engine.
    fn add(&self, name: &str, transport: Arc<MockTransport>, dialer: Arc<ScriptedDialer>) {
        self.add_with_priority(name, transport, dialer, RecoveryPriority::Normal);
    }

    fn add_with_priority(
        &self,
        name: &str,
        transport: Arc<MockTransport>,
        dialer: Arc<ScriptedDialer>,
        priority: RecoveryPriority,
    ) {
        assert!(self.registry.add(id(name), transport.clone(), attributes()));
        self.engine
            .register(id(name), attributes(), transport, dialer, priority);
    }

    fn start(&self) {
        self.engine.start(self.cancel.clone(), &self.tracker);
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn alert_kinds(&self) -> Vec<AlertKind> {
        self.alerts.drain().into_iter().map(|a| a.kind).collect()
    }
}

fn capture() -> (RecoveryCallback, oneshot::Receiver<RecoveryOutcome>) {
    let (tx, rx) = oneshot::channel();
    let callback: RecoveryCallback = Box::new(move |outcome| {
        let _ = tx.send(outcome);
    });
    (callback, rx)
}

fn timeout_cause() -> DisconnectCause {
    DisconnectCause::HeartbeatTimeout
}

// -- Queueing -------------------------------------------------------------

#[tokio::test]
async fn test_disconnection_queues_once() {
    let f = Fixture::new();
    f.add("c1", MockTransport::healthy(), ScriptedDialer::always_succeed());

    assert!(f.engine.handle_disconnection(&id("c1"), timeout_cause()));
    assert!(!f.engine.handle_disconnection(&id("c1"), timeout_cause()));

    let status = f.engine.status(&id("c1")).unwrap();
    assert_eq!(status.state, RecoveryState::Disconnected);
    assert_eq!(status.last_error.as_deref(), Some("heartbeat timeout"));
    assert_eq!(f.engine.queue_len(), 1);
    assert_eq!(f.engine.metrics().total_recoveries, 1);
}

#[tokio::test]
async fn test_unknown_connection_is_skipped() {
    let f = Fixture::new();
    let (callback, rx) = capture();
    assert!(!f
        .engine
        .handle_disconnection_with(&id("ghost"), timeout_cause(), callback));
    assert_eq!(rx.await.unwrap(), RecoveryOutcome::Skipped);
}

#[tokio::test]
async fn test_full_queue_drops_exactly_one() {
    let f = Fixture::with_config(RecoveryConfig {
        queue_capacity: 2,
        ..testkit::config::recovery()
    });
    for name in ["a", "b", "c"] {
        f.add(name, MockTransport::healthy(), ScriptedDialer::always_succeed());
    }

    assert!(f.engine.handle_disconnection(&id("a"), timeout_cause()));
    assert!(f.engine.handle_disconnection(&id("b"), timeout_cause()));
    let (callback, rx) = capture();
    assert!(!f
        .engine
        .handle_disconnection_with(&id("c"), timeout_cause(), callback));

    assert_eq!(rx.await.unwrap(), RecoveryOutcome::Dropped);
    let metrics = f.engine.metrics();
    assert_eq!(metrics.dropped, 1);
    assert_eq!(metrics.queue_length, 2);

    // A dropped request does not block a later signal once there is room.
    assert!(f.engine.queue.try_pop().is_some());
    assert!(f.engine.handle_disconnection(&id("c"), timeout_cause()));
}

#[tokio::test]
async fn test_recovery_disabled_for_connection() {
    let f = Fixture::new();
    f.add("c1", MockTransport::healthy(), ScriptedDialer::always_succeed());
    f.engine.set_recovery_enabled(&id("c1"), false).unwrap();

    let (callback, rx) = capture();
    assert!(!f
        .engine
        .handle_disconnection_with(&id("c1"), timeout_cause(), callback));
    assert_eq!(rx.await.unwrap(), RecoveryOutcome::Skipped);
    assert_eq!(f.engine.status(&id("c1")).unwrap().state, RecoveryState::Connected);

    assert!(f.engine.set_recovery_enabled(&id("ghost"), true).is_err());
}

// -- Attempt loop ---------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_recovers_after_failures() {
    let f = Fixture::new();
    let dialer = ScriptedDialer::fail_then_succeed(2);
    f.add("c1", MockTransport::healthy(), dialer.clone());
    f.start();

    f.registry.evict(&id("c1"), RemovalReason::HeartbeatTimeout).await;
    let (callback, rx) = capture();
    assert!(f
        .engine
        .handle_disconnection_with(&id("c1"), timeout_cause(), callback));

    match rx.await.unwrap() {
        RecoveryOutcome::Recovered { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(dialer.dial_count(), 3);

    let status = f.engine.status(&id("c1")).unwrap();
    assert_eq!(status.state, RecoveryState::Connected);
    assert_eq!(status.retry_count, 0);
    assert_eq!(status.backoff, Duration::from_millis(10));
    assert_eq!(status.health_score, 1.0);
    assert!(status.last_error.is_none());

    assert!(f.registry.contains(&id("c1")));
    let redialed = dialer.last_transport().unwrap();
    assert_eq!(redialed.peer(), "redialed-3");
    assert!(f.alert_kinds().contains(&AlertKind::RecoveryComplete));
    assert_eq!(f.engine.metrics().successful, 1);

    f.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_is_terminal() {
    let f = Fixture::new();
    let dialer = ScriptedDialer::always_fail();
    f.add("c1", MockTransport::healthy(), dialer.clone());
    f.start();

    let (callback, rx) = capture();
    f.engine
        .handle_disconnection_with(&id("c1"), timeout_cause(), callback);
    assert_eq!(rx.await.unwrap(), RecoveryOutcome::Exhausted { attempts: 5 });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(dialer.dial_count(), 5);

    let status = f.engine.status(&id("c1")).unwrap();
    assert_eq!(status.state, RecoveryState::Failed);
    assert_eq!(status.health_score, 0.0);
    assert!(status.last_error.unwrap().contains("scripted dial failure"));
    assert!(f.alert_kinds().contains(&AlertKind::RecoveryFailed));
    assert_eq!(f.engine.metrics().failed, 1);

    // Automatic detectors leave a failed connection alone.
    f.engine.on_disconnect(&id("c1"), timeout_cause());
    assert_eq!(f.engine.queue_len(), 0);
    assert_eq!(f.engine.metrics().total_recoveries, 1);

    // An explicit request starts a new round.
    let (callback, rx) = capture();
    assert!(f
        .engine
        .handle_disconnection_with(&id("c1"), timeout_cause(), callback));
    assert_eq!(rx.await.unwrap(), RecoveryOutcome::Exhausted { attempts: 5 });
    assert_eq!(dialer.dial_count(), 10);

    f.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregister_cancels_inflight() {
    let f = Fixture::new();
    let dialer =
        Arc::new(ScriptedDialer::new(Vec::new(), false).with_delay(Duration::from_millis(150)));
    f.add("c1", MockTransport::healthy(), dialer.clone());
    f.start();

    let (callback, rx) = capture();
    f.engine
        .handle_disconnection_with(&id("c1"), timeout_cause(), callback);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dialer.dial_count(), 1);

    assert!(f.engine.unregister(&id("c1")));
    assert_eq!(rx.await.unwrap(), RecoveryOutcome::Cancelled);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(dialer.dial_count(), 1);
    assert!(f.engine.status(&id("c1")).is_none());

    let metrics = f.engine.metrics();
    assert_eq!(metrics.cancelled, 1);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.successful, 0);

    f.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_overall_timeout() {
    let f = Fixture::with_config(RecoveryConfig {
        recovery_timeout_secs: 1,
        ..testkit::config::recovery()
    });
    let dialer =
        Arc::new(ScriptedDialer::new(Vec::new(), true).with_delay(Duration::from_secs(10)));
    f.add("c1", MockTransport::healthy(), dialer.clone());
    f.start();

    let (callback, rx) = capture();
    f.engine
        .handle_disconnection_with(&id("c1"), timeout_cause(), callback);

    assert!(matches!(
        rx.await.unwrap(),
        RecoveryOutcome::TimedOut { attempts } if attempts >= 4
    ));
    assert_eq!(f.engine.status(&id("c1")).unwrap().state, RecoveryState::Failed);

    f.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_full_registry_counts_as_failed_attempt() {
    let f = Fixture::new();
    let dialer = ScriptedDialer::always_succeed();
    f.add("c1", MockTransport::healthy(), dialer.clone());
    f.registry.evict(&id("c1"), RemovalReason::HeartbeatTimeout).await;
    for i in 0..10 {
        assert!(f
            .registry
            .add(id(&format!("filler-{i}")), MockTransport::healthy(), attributes()));
    }
    f.start();

    let (callback, rx) = capture();
    f.engine
        .handle_disconnection_with(&id("c1"), timeout_cause(), callback);
    assert_eq!(rx.await.unwrap(), RecoveryOutcome::Exhausted { attempts: 5 });

    // Every rejected replacement closed its freshly dialed handle.
    let last = dialer.last_transport().unwrap();
    assert!(last.is_closed());

    f.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_higher_priority_runs_first() {
    let f = Fixture::with_config(RecoveryConfig {
        worker_count: 1,
        ..testkit::config::recovery()
    });
    let order = Arc::new(StdMutex::new(Vec::new()));
    let names = [
        ("low", RecoveryPriority::Low),
        ("normal", RecoveryPriority::Normal),
        ("critical", RecoveryPriority::Critical),
    ];
    for (name, priority) in names {
        f.add_with_priority(
            name,
            MockTransport::healthy(),
            ScriptedDialer::always_succeed(),
            priority,
        );
    }

    let mut receivers = Vec::new();
    for (name, _) in names {
        let order = Arc::clone(&order);
        let (tx, rx) = oneshot::channel::<()>();
        let callback: RecoveryCallback = Box::new(move |_| {
            order.lock().unwrap().push(name);
            let _ = tx.send(());
        });
        f.engine
            .handle_disconnection_with(&id(name), timeout_cause(), callback);
        receivers.push(rx);
    }
    f.start();
    for rx in receivers {
        rx.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec!["critical", "normal", "low"]);
    f.shutdown().await;
}

// -- Lifecycle ------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_cancels_queued_requests() {
    let f = Fixture::new();
    f.add("c1", MockTransport::healthy(), ScriptedDialer::always_succeed());
    let (callback, rx) = capture();
    f.engine
        .handle_disconnection_with(&id("c1"), timeout_cause(), callback);

    f.cancel.cancel();
    f.start();
    let engine = Arc::clone(&f.engine);
    f.shutdown().await;

    assert_eq!(rx.await.unwrap(), RecoveryOutcome::Cancelled);
    assert_eq!(engine.queue_len(), 0);
}

#[tokio::test]
async fn test_disabled_engine_spawns_nothing() {
    let f = Fixture::with_config(RecoveryConfig {
        enabled: false,
        ..testkit::config::recovery()
    });
    f.add("c1", MockTransport::healthy(), ScriptedDialer::always_succeed());
    f.start();
    assert!(f.tracker.is_empty());
    assert!(!f.engine.handle_disconnection(&id("c1"), timeout_cause()));
}

// -- Health checker -------------------------------------------------------

#[tokio::test]
async fn test_health_check_feeds_pipeline() {
    let f = Fixture::new();
    let transport = MockTransport::healthy();
    f.add("ok", transport.clone(), ScriptedDialer::always_succeed());
    f.add("bad", MockTransport::failing(), ScriptedDialer::always_succeed());

    assert_eq!(f.engine.check_health().await, 1);
    assert_eq!(transport.ping_count(), 1);
    assert_eq!(f.engine.status(&id("ok")).unwrap().state, RecoveryState::Connected);

    let bad = f.engine.status(&id("bad")).unwrap();
    assert_eq!(bad.state, RecoveryState::Disconnected);
    assert!(bad.last_error.unwrap().contains("health check failed"));
    assert_eq!(f.engine.queue_len(), 1);

    // Disconnected connections are not probed again.
    assert_eq!(f.engine.check_health().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_smooths_score() {
    let f = Fixture::new();
    f.add(
        "slow",
        MockTransport::with_latency(Duration::from_millis(60)),
        ScriptedDialer::always_succeed(),
    );

    f.engine.check_health().await;
    let score = f.engine.status(&id("slow")).unwrap().health_score;
    assert!((score - 0.98).abs() < 1e-9);
}
