use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// A live bidirectional connection as seen by the connection manager.
///
/// Implementations own framing and authentication. The manager only needs a
/// liveness probe and a way to close.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a liveness probe and resolve once it is acknowledged.
    ///
    /// Callers bound this with their own timeout.
    async fn ping(&self) -> Result<()>;

    /// Close the connection. Must be idempotent.
    async fn close(&self);

    /// Remote address or URL, for logging.
    fn peer(&self) -> String {
        String::from("unknown")
    }
}

/// Shared handle to a transport.
pub type TransportHandle = Arc<dyn Transport>;

/// Re-establishes a server-initiated connection.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a fresh connection. Callers bound this with a handshake timeout.
    async fn dial(&self) -> Result<TransportHandle>;

    /// Target the dialer connects to, for logging.
    fn target(&self) -> String;
}
