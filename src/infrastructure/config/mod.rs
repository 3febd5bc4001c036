//! Configuration for every component, loaded from TOML.
//!
//! Each section carries serde defaults, so an empty file is a valid
//! configuration. Sections validate themselves; [`settings::Config::validate`]
//! runs them all.

pub mod diagnostics;
pub mod health;
pub mod heartbeat;
pub mod logging;
pub mod metrics;
pub mod recovery;
pub mod registry;
pub mod settings;

pub use diagnostics::DiagnosticsConfig;
pub use health::HealthConfig;
pub use heartbeat::HeartbeatConfig;
pub use logging::LoggingConfig;
pub use metrics::MetricsConfig;
pub use recovery::RecoveryConfig;
pub use registry::RegistryConfig;
pub use settings::Config;

use crate::error::{ConfigError, Error};

/// Build an `InvalidValue` error for `field`.
pub(crate) fn invalid(field: &'static str, reason: &str) -> Error {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
    .into()
}
