//! Lifeline - resilient connection management for a real-time event
//! distribution server.
//!
//! The crate tracks every live client connection, probes liveness with
//! heartbeats, scores connection health, automatically re-establishes
//! dropped outbound connections and exposes metrics and per-connection
//! diagnostics.
//!
//! # Architecture
//!
//! - **[`infrastructure::registry`]** - bounded pool of live connections
//! - **[`infrastructure::heartbeat`]** - periodic liveness probing
//! - **[`infrastructure::health`]** - per-connection scoring and alerts
//! - **[`infrastructure::recovery`]** - prioritized reconnection with backoff
//! - **[`infrastructure::metrics`]** - counters, histograms and rates
//! - **[`infrastructure::diagnostics`]** - timelines, traces, debug sessions
//! - **[`ConnectionManager`]** - façade wiring the above together
//!
//! The transport itself stays behind the [`port::Transport`] and
//! [`port::Dialer`] traits; [`adapter::websocket`] provides a
//! tokio-tungstenite implementation.
//!
//! # Modules
//!
//! - [`adapter`] - Transport implementations
//! - [`cli`] - Command-line entry points
//! - [`domain`] - Plain data: ids, health states, alerts, recovery states
//! - [`error`] - Error types for the crate
//! - [`infrastructure`] - Stateful components and their configuration
//! - [`port`] - Trait seams to the transport layer and between components
//!
//! # Features
//!
//! - `testkit` - Fake transports, dialers and observers for tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lifeline::adapter::{WebSocketDialer, WebSocketTransport};
//! use lifeline::domain::{ConnectionAttributes, ConnectionId, RecoveryPriority};
//! use lifeline::infrastructure::config::Config;
//! use lifeline::ConnectionManager;
//!
//! # async fn example() -> lifeline::error::Result<()> {
//! let manager = ConnectionManager::new(Config::default())?;
//! manager.start();
//!
//! let url = "ws://127.0.0.1:9000/events";
//! let transport = WebSocketTransport::connect(url, None).await?;
//! manager.register_outbound(
//!     ConnectionId::new("upstream"),
//!     Arc::new(transport),
//!     ConnectionAttributes::new("1.0"),
//!     Arc::new(WebSocketDialer::new(url)),
//!     RecoveryPriority::High,
//! );
//!
//! println!("{:?}", manager.aggregate_health().status);
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cli;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use infrastructure::ConnectionManager;
