//! Domain types shared by every component.
//!
//! Everything here is plain data and pure functions: no locks, no tasks,
//! no I/O.

pub mod alert;
pub mod connection;
pub mod diagnostic;
pub mod health;
pub mod id;
pub mod recovery;

pub use alert::{AlertKind, AlertSeverity, HealthAlert};
pub use connection::{ConnectionAttributes, ConnectionInfo, DisconnectCause, RemovalReason};
pub use diagnostic::{
    CheckStatus, DebugFeature, DetailLevel, Direction, HealthCheckKind, LogLevel,
};
pub use health::{
    health_score, AggregateHealth, ConnectionHealthSnapshot, HealthState, HealthThresholds,
    OverallStatus,
};
pub use id::{ConnectionId, DebugSessionId};
pub use recovery::{
    BackoffPolicy, RecoveryOutcome, RecoveryPriority, RecoveryState, RecoveryStatus,
};
