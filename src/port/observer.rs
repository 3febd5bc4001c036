use std::time::Duration;

use crate::domain::{ConnectionId, ConnectionInfo, DisconnectCause, RemovalReason};

/// Notified by the connection registry after its map lock is released.
///
/// Every per-connection record elsewhere is created and destroyed through
/// these callbacks, so the registry's key set stays authoritative.
pub trait RegistryObserver: Send + Sync {
    fn on_registered(&self, info: &ConnectionInfo);

    fn on_rejected(&self, id: &ConnectionId, reason: &'static str);

    fn on_removed(&self, id: &ConnectionId, reason: RemovalReason, lifetime: Duration);
}

/// Receives disconnection signals from failure detectors.
///
/// Implementations must not block: they are called from probe loops.
pub trait DisconnectListener: Send + Sync {
    fn on_disconnect(&self, id: &ConnectionId, cause: DisconnectCause);
}
