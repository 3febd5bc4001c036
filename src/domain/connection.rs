//! Connection identity, attributes, and lifecycle reasons.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::ConnectionId;

/// Identifying attributes supplied by the transport layer on registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAttributes {
    /// Repository the client is subscribed to, if any.
    pub repository: Option<String>,
    /// Client session the connection belongs to, if any.
    pub session_id: Option<String>,
    /// Negotiated protocol version.
    pub protocol_version: String,
}

impl ConnectionAttributes {
    pub fn new(protocol_version: impl Into<String>) -> Self {
        Self {
            repository: None,
            session_id: None,
            protocol_version: protocol_version.into(),
        }
    }

    #[must_use]
    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Read-only copy of a registered connection's identifying fields.
///
/// Never carries the transport handle, so holders cannot race the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub attributes: ConnectionAttributes,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Time since the last recorded activity, at the moment of the copy.
    pub idle: Duration,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Explicit unregistration by the transport layer.
    Unregistered,
    /// Idle past the stale threshold.
    Stale,
    /// No heartbeat acknowledgment within the pong timeout.
    HeartbeatTimeout,
    /// Reported broken by the transport read/write loop.
    TransportError,
    /// Superseded by a re-established connection with the same ID.
    Replaced,
    /// Manager shutdown.
    Shutdown,
}

impl RemovalReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Stale => "stale",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::TransportError => "transport_error",
            Self::Replaced => "replaced",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether the connection should be handed to recovery after removal.
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::HeartbeatTimeout | Self::TransportError)
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal delivered to recovery when a connection is detected as broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Read/write loop reported an error.
    TransportError(String),
    /// Heartbeat failure counter crossed the threshold.
    ConsecutiveFailures(u32),
    /// No acknowledgment within the pong timeout.
    HeartbeatTimeout,
    /// Recovery's own periodic health check failed.
    HealthCheckFailed(String),
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::ConsecutiveFailures(n) => write!(f, "{n} consecutive heartbeat failures"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::HealthCheckFailed(e) => write!(f, "health check failed: {e}"),
        }
    }
}
