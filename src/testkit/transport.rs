//! Mock transports and dialers.
//!
//! - [`MockTransport`] - Ping behavior switchable at runtime (ok, fail,
//!   hang, slow). Counts pings and closes.
//! - [`ScriptedDialer`] - Pops scripted dial results; every successful dial
//!   yields a fresh healthy `MockTransport`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::port::{Dialer, Transport, TransportHandle};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

pub struct MockTransport {
    label: String,
    latency: Mutex<Duration>,
    failing: AtomicBool,
    hanging: AtomicBool,
    ping_count: AtomicU32,
    close_count: AtomicU32,
}

impl MockTransport {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            latency: Mutex::new(Duration::ZERO),
            failing: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            ping_count: AtomicU32::new(0),
            close_count: AtomicU32::new(0),
        }
    }

    /// A transport whose pings succeed immediately.
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::new("mock"))
    }

    /// A transport whose pings fail immediately.
    pub fn failing() -> Arc<Self> {
        let t = Self::new("mock-failing");
        t.set_failing(true);
        Arc::new(t)
    }

    /// A transport whose pings never resolve.
    pub fn hanging() -> Arc<Self> {
        let t = Self::new("mock-hanging");
        t.set_hanging(true);
        Arc::new(t)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        let t = Self::new("mock-slow");
        t.set_latency(latency);
        Arc::new(t)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn ping_count(&self) -> u32 {
        self.ping_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn ping(&self) -> Result<()> {
        self.ping_count.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport("scripted ping failure".into()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }

    fn peer(&self) -> String {
        self.label.clone()
    }
}

// ---------------------------------------------------------------------------
// ScriptedDialer
// ---------------------------------------------------------------------------

/// A dialer with a queue of scripted outcomes (`true` = success).
///
/// Falls back to `default_success` once the script is exhausted.
pub struct ScriptedDialer {
    script: Mutex<VecDeque<bool>>,
    default_success: bool,
    delay: Duration,
    dial_count: AtomicU32,
    dialed: Mutex<Vec<Arc<MockTransport>>>,
}

impl ScriptedDialer {
    pub fn new(script: Vec<bool>, default_success: bool) -> Self {
        Self {
            script: Mutex::new(script.into()),
            default_success,
            delay: Duration::ZERO,
            dial_count: AtomicU32::new(0),
            dialed: Mutex::new(Vec::new()),
        }
    }

    pub fn always_succeed() -> Arc<Self> {
        Arc::new(Self::new(Vec::new(), true))
    }

    pub fn always_fail() -> Arc<Self> {
        Arc::new(Self::new(Vec::new(), false))
    }

    /// Fail `failures` times, then succeed.
    pub fn fail_then_succeed(failures: usize) -> Arc<Self> {
        Arc::new(Self::new(vec![false; failures], true))
    }

    /// Delay every dial by `delay` before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn dial_count(&self) -> u32 {
        self.dial_count.load(Ordering::SeqCst)
    }

    /// The most recent transport handed out.
    pub fn last_transport(&self) -> Option<Arc<MockTransport>> {
        self.dialed.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self) -> Result<TransportHandle> {
        let attempt = self.dial_count.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let success = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_success);
        if !success {
            return Err(Error::Transport(format!("scripted dial failure #{attempt}")));
        }
        let transport = Arc::new(MockTransport::new(format!("redialed-{attempt}")));
        self.dialed.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }

    fn target(&self) -> String {
        "mock://peer".into()
    }
}
