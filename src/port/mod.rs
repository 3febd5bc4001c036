//! Trait seams between the connection manager and the outside world.
//!
//! - [`Transport`] / [`Dialer`] - the excluded transport layer: probe, close
//!   and re-establish a connection.
//! - [`RegistryObserver`] - registry-driven cleanup of per-connection records.
//! - [`DisconnectListener`] - failure detectors feeding the recovery pipeline.

mod observer;
mod transport;

pub use observer::{DisconnectListener, RegistryObserver};
pub use transport::{Dialer, Transport, TransportHandle};
