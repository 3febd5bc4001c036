//! Transport adapters implementing the [`crate::port`] traits.

pub mod websocket;

pub use websocket::{WebSocketDialer, WebSocketTransport};
