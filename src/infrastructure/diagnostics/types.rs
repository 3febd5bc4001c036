//! Diagnostic records and reports.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    CheckStatus, ConnectionId, ConnectionInfo, DebugFeature, DebugSessionId, DetailLevel,
    Direction, HealthCheckKind, LogLevel,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: &'static str,
    pub message: String,
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub description: String,
    pub severity: EventSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkTrace {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub message_type: String,
    pub size: usize,
    pub latency: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySample {
    pub timestamp: DateTime<Utc>,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub connection_id: ConnectionId,
    pub kind: HealthCheckKind,
    pub status: CheckStatus,
    pub latency: Option<Duration>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// An on-demand collection window for one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugSession {
    pub id: DebugSessionId,
    pub connection_id: ConnectionId,
    pub features: HashSet<DebugFeature>,
    pub level: LogLevel,
    pub started_at: DateTime<Utc>,
}

impl DebugSession {
    pub fn collects(&self, feature: DebugFeature) -> bool {
        self.features.contains(&feature)
    }
}

/// Everything recorded for one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionDiagnostics {
    pub info: ConnectionInfo,
    pub health: CheckStatus,
    pub debug_logs: Vec<DebugLogEntry>,
    pub timeline: Vec<TimelineEvent>,
    pub traces: Vec<NetworkTrace>,
    pub latency_samples: Vec<LatencySample>,
    pub health_checks: Vec<HealthCheckResult>,
    pub debug_sessions: Vec<DebugSessionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl SystemHealthStatus {
    /// 90% passing is healthy, 70% degraded.
    pub fn from_ratio(passing_ratio: f64) -> Self {
        if passing_ratio >= 0.9 {
            Self::Healthy
        } else if passing_ratio >= 0.7 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemDiagnostics {
    pub enabled: bool,
    pub detail_level: DetailLevel,
    pub total_connections: usize,
    pub passing_connections: usize,
    pub health: SystemHealthStatus,
    pub active_debug_sessions: usize,
    pub total_log_entries: usize,
    pub total_timeline_events: usize,
    pub total_traces: usize,
    pub timestamp: DateTime<Utc>,
}

/// Append to a ring buffer, evicting the oldest entry at capacity.
pub(super) fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

/// Drop leading entries older than `cutoff`. Buffers are time-ordered.
pub(super) fn prune_before<T>(
    buffer: &mut VecDeque<T>,
    cutoff: DateTime<Utc>,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> usize {
    let mut pruned = 0;
    while buffer.front().is_some_and(|item| timestamp(item) < cutoff) {
        buffer.pop_front();
        pruned += 1;
    }
    pruned
}
