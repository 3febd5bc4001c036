//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`transport`] - Mock [`Transport`](crate::port::Transport) and
//!   [`Dialer`](crate::port::Dialer) implementations: `MockTransport`,
//!   `ScriptedDialer`.
//! - [`observer`] - Recording observers for registry and disconnect events.
//! - [`config`] - Canonical fast-timing test configurations.
//! - [`domain`] - Builders for IDs, attributes and connection snapshots.

pub mod config;
pub mod domain;
pub mod observer;
pub mod transport;
