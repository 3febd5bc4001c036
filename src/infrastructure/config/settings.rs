//! Top-level configuration loading and validation.
//!
//! # Example
//!
//! ```no_run
//! use lifeline::infrastructure::config::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("lifeline.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::diagnostics::DiagnosticsConfig;
use super::health::HealthConfig;
use super::heartbeat::HeartbeatConfig;
use super::logging::LoggingConfig;
use super::metrics::MetricsConfig;
use super::recovery::RecoveryConfig;
use super::registry::RegistryConfig;
use super::invalid;
use crate::error::{ConfigError, Result};

/// Complete connection-manager configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The TOML content is malformed
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Validate every section plus the rules that span sections.
    pub fn validate(&self) -> Result<()> {
        self.logging.validate()?;
        self.registry.validate()?;
        self.heartbeat.validate()?;
        self.health.validate()?;
        self.recovery.validate()?;
        self.diagnostics.validate()?;
        self.metrics.validate()?;

        if self.heartbeat.pong_timeout_ms < self.heartbeat.ping_interval_ms {
            return Err(invalid(
                "heartbeat.pong_timeout_ms",
                "must be >= ping_interval_ms",
            ));
        }
        Ok(())
    }

    /// Initialize the tracing subscriber from the `[logging]` section.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}
