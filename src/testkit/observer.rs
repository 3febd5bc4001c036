//! Recording implementations of the observer ports.

use std::sync::Mutex;
use std::time::Duration;

use crate::domain::{ConnectionId, ConnectionInfo, DisconnectCause, RemovalReason};
use crate::port::{DisconnectListener, RegistryObserver};

/// Records every registry notification in arrival order.
#[derive(Default)]
pub struct RecordingObserver {
    pub registered: Mutex<Vec<ConnectionId>>,
    pub rejected: Mutex<Vec<(ConnectionId, &'static str)>>,
    pub removed: Mutex<Vec<(ConnectionId, RemovalReason, Duration)>>,
}

impl RecordingObserver {
    pub fn removed_reasons(&self) -> Vec<(ConnectionId, RemovalReason)> {
        self.removed
            .lock()
            .unwrap()
            .iter()
            .map(|(id, reason, _)| (id.clone(), *reason))
            .collect()
    }
}

impl RegistryObserver for RecordingObserver {
    fn on_registered(&self, info: &ConnectionInfo) {
        self.registered.lock().unwrap().push(info.id.clone());
    }

    fn on_rejected(&self, id: &ConnectionId, reason: &'static str) {
        self.rejected.lock().unwrap().push((id.clone(), reason));
    }

    fn on_removed(&self, id: &ConnectionId, reason: RemovalReason, lifetime: Duration) {
        self.removed
            .lock()
            .unwrap()
            .push((id.clone(), reason, lifetime));
    }
}

/// Records every disconnection signal.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<(ConnectionId, DisconnectCause)>>,
}

impl RecordingListener {
    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn causes_for(&self, id: &ConnectionId) -> Vec<DisconnectCause> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event_id, _)| event_id == id)
            .map(|(_, cause)| cause.clone())
            .collect()
    }
}

impl DisconnectListener for RecordingListener {
    fn on_disconnect(&self, id: &ConnectionId, cause: DisconnectCause) {
        self.events.lock().unwrap().push((id.clone(), cause));
    }
}
