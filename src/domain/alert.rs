//! Operator-facing alerts.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::health::{AggregateHealth, HealthState};
use super::id::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HealthStateChanged,
    HighLatency,
    ConnectionDown,
    SystemUnhealthy,
    RecoveryComplete,
    RecoveryFailed,
}

impl AlertKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HealthStateChanged => "health_state_changed",
            Self::HighLatency => "high_latency",
            Self::ConnectionDown => "connection_down",
            Self::SystemUnhealthy => "system_unhealthy",
            Self::RecoveryComplete => "recovery_complete",
            Self::RecoveryFailed => "recovery_failed",
        }
    }

    /// Kinds that can fire repeatedly for the same condition and are
    /// therefore subject to the per-connection cooldown.
    pub const fn is_repeatable(self) -> bool {
        matches!(self, Self::HighLatency | Self::ConnectionDown)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    fn for_state(state: HealthState) -> Self {
        match state {
            HealthState::Healthy => Self::Info,
            HealthState::Warning => Self::Warning,
            HealthState::Unhealthy => Self::Error,
            HealthState::Critical => Self::Critical,
        }
    }
}

/// A single alert delivered through the bounded alert channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthAlert {
    pub id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub connection_id: Option<ConnectionId>,
    pub message: String,
    pub old_state: Option<HealthState>,
    pub new_state: Option<HealthState>,
    pub score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl HealthAlert {
    fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        connection_id: Option<ConnectionId>,
        message: String,
    ) -> Self {
        Self {
            id: format!("alert_{}", uuid::Uuid::new_v4().simple()),
            kind,
            severity,
            connection_id,
            message,
            old_state: None,
            new_state: None,
            score: None,
            timestamp: Utc::now(),
        }
    }

    pub fn state_changed(id: &ConnectionId, old: HealthState, new: HealthState, score: f64) -> Self {
        let mut alert = Self::new(
            AlertKind::HealthStateChanged,
            AlertSeverity::for_state(new),
            Some(id.clone()),
            format!("connection {id} health changed from {old} to {new} (score {score:.2})"),
        );
        alert.old_state = Some(old);
        alert.new_state = Some(new);
        alert.score = Some(score);
        alert
    }

    pub fn high_latency(id: &ConnectionId, latency: Duration, threshold: Duration) -> Self {
        Self::new(
            AlertKind::HighLatency,
            AlertSeverity::Warning,
            Some(id.clone()),
            format!(
                "connection {id} latency {}ms exceeds {}ms",
                latency.as_millis(),
                threshold.as_millis()
            ),
        )
    }

    pub fn connection_down(id: &ConnectionId, consecutive_failures: u32) -> Self {
        Self::new(
            AlertKind::ConnectionDown,
            AlertSeverity::Error,
            Some(id.clone()),
            format!("connection {id} failed {consecutive_failures} consecutive heartbeats"),
        )
    }

    pub fn system_unhealthy(aggregate: &AggregateHealth) -> Self {
        let severity = if aggregate.status == super::health::OverallStatus::Critical {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Error
        };
        let mut alert = Self::new(
            AlertKind::SystemUnhealthy,
            severity,
            None,
            format!(
                "system health {}: {}/{} connections healthy",
                aggregate.status, aggregate.healthy_connections, aggregate.total_connections
            ),
        );
        alert.score = Some(aggregate.average_score);
        alert
    }

    pub fn recovery_complete(id: &ConnectionId, attempts: u32, elapsed: Duration) -> Self {
        Self::new(
            AlertKind::RecoveryComplete,
            AlertSeverity::Info,
            Some(id.clone()),
            format!(
                "connection {id} recovered after {attempts} attempt(s) in {}ms",
                elapsed.as_millis()
            ),
        )
    }

    pub fn recovery_failed(id: &ConnectionId, attempts: u32) -> Self {
        let mut alert = Self::new(
            AlertKind::RecoveryFailed,
            AlertSeverity::Critical,
            Some(id.clone()),
            format!("connection {id} recovery failed after {attempts} attempt(s)"),
        );
        alert.score = Some(0.0);
        alert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_change_carries_states_and_score() {
        let id = ConnectionId::from("c1");
        let alert =
            HealthAlert::state_changed(&id, HealthState::Healthy, HealthState::Unhealthy, 0.3);
        assert_eq!(alert.kind, AlertKind::HealthStateChanged);
        assert_eq!(alert.severity, AlertSeverity::Error);
        assert_eq!(alert.old_state, Some(HealthState::Healthy));
        assert_eq!(alert.new_state, Some(HealthState::Unhealthy));
        assert_eq!(alert.score, Some(0.3));
        assert_eq!(alert.connection_id, Some(id));
    }

    #[test]
    fn only_repeatable_kinds_are_throttled() {
        assert!(AlertKind::HighLatency.is_repeatable());
        assert!(AlertKind::ConnectionDown.is_repeatable());
        assert!(!AlertKind::HealthStateChanged.is_repeatable());
        assert!(!AlertKind::RecoveryFailed.is_repeatable());
    }
}
