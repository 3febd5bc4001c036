//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests. Timings are
//! in milliseconds so paused-clock tests advance quickly.

use crate::infrastructure::config::{
    Config, DiagnosticsConfig, HealthConfig, HeartbeatConfig, LoggingConfig, MetricsConfig,
    RecoveryConfig, RegistryConfig,
};

pub fn registry(max_connections: usize) -> RegistryConfig {
    RegistryConfig {
        max_connections,
        cleanup_interval_secs: 60,
        max_idle_secs: 300,
    }
}

/// 100ms probe rounds, 300ms pong timeout, threshold 3.
pub fn heartbeat() -> HeartbeatConfig {
    HeartbeatConfig {
        ping_interval_ms: 100,
        pong_timeout_ms: 300,
        cleanup_interval_ms: 100,
        failure_threshold: 3,
    }
}

/// Default thresholds, no alert cooldown, small sample window.
pub fn health() -> HealthConfig {
    HealthConfig {
        health_threshold: 0.8,
        unhealthy_threshold: 0.5,
        max_sample_size: 10,
        aggregate_interval_secs: 1,
        alert_cooldown_secs: 0,
        alert_capacity: 100,
        high_latency_ms: 500,
    }
}

/// Fast deterministic backoff: 10ms doubling to 100ms, no jitter.
pub fn recovery() -> RecoveryConfig {
    RecoveryConfig {
        enabled: true,
        enabled_by_default: true,
        max_retries: 5,
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
        backoff_multiplier: 2.0,
        jitter_enabled: false,
        recovery_timeout_secs: 30,
        handshake_timeout_ms: 200,
        health_check_interval_secs: 1,
        probe_timeout_ms: 100,
        worker_count: 2,
        queue_capacity: 16,
    }
}

pub fn diagnostics() -> DiagnosticsConfig {
    DiagnosticsConfig {
        check_timeout_ms: 100,
        ..DiagnosticsConfig::default()
    }
}

/// One-second samples, ten retained.
pub fn metrics() -> MetricsConfig {
    MetricsConfig {
        time_series_resolution_secs: 1,
        max_data_points: 10,
    }
}

/// Full manager configuration assembled from the sections above.
pub fn manager(max_connections: usize) -> Config {
    Config {
        logging: LoggingConfig::default(),
        registry: registry(max_connections),
        heartbeat: heartbeat(),
        health: health(),
        recovery: recovery(),
        diagnostics: diagnostics(),
        metrics: metrics(),
    }
}
