//! Domain value builders.

use std::time::Duration;

use chrono::Utc;

use crate::domain::{ConnectionAttributes, ConnectionId, ConnectionInfo};

pub fn connection_id(id: &str) -> ConnectionId {
    ConnectionId::new(id)
}

pub fn attributes() -> ConnectionAttributes {
    ConnectionAttributes::new("1.0")
}

/// A freshly connected, idle-free connection snapshot.
pub fn connection_info(id: &str) -> ConnectionInfo {
    let now = Utc::now();
    ConnectionInfo {
        id: ConnectionId::new(id),
        attributes: attributes(),
        connected_at: now,
        last_activity: now,
        idle: Duration::ZERO,
        messages_sent: 0,
        messages_received: 0,
        bytes_sent: 0,
        bytes_received: 0,
    }
}
