//! Infrastructure layer.
//!
//! Every moving part of connection management lives here; the domain layer
//! holds only values and rules.
//!
//! # Submodules
//!
//! - [`config`] - Configuration loading and validation
//! - [`registry`] - Capacity-bounded connection registry
//! - [`heartbeat`] - Liveness probing and hard-timeout eviction
//! - [`health`] - Health scoring, aggregation and alerts
//! - [`recovery`] - Reconnection worker pool and priority queue
//! - [`metrics`] - Connection, message, error and latency metrics
//! - [`diagnostics`] - Optional troubleshooting overlay
//! - [`manager`] - Composition root and façade
//! - [`task`] - Periodic task driver

pub mod config;
pub mod diagnostics;
pub mod health;
pub mod heartbeat;
pub mod manager;
pub mod metrics;
pub mod recovery;
pub mod registry;
pub mod task;

pub use manager::ConnectionManager;
