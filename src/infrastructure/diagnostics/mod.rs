//! Optional diagnostics overlay.
//!
//! Collects per-connection debug logs, a state timeline, network traces,
//! latency samples and on-demand health check results into bounded ring
//! buffers. Collection beyond the timeline is gated by global switches or
//! by debug sessions opened on a single connection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    CheckStatus, ConnectionId, ConnectionInfo, DebugFeature, DebugSessionId, DetailLevel,
    Direction, HealthCheckKind, LogLevel,
};
use crate::error::{Error, Result};
use crate::infrastructure::config::DiagnosticsConfig;
use crate::infrastructure::task::run_periodic;
use crate::port::TransportHandle;

mod types;

use types::{prune_before, push_bounded};
pub use types::{
    ConnectionDiagnostics, DebugLogEntry, DebugSession, EventSeverity, HealthCheckResult,
    LatencySample, NetworkTrace, SystemDiagnostics, SystemHealthStatus, TimelineEvent,
};

const COMPONENT: &str = "diagnostics";

struct DiagnosticRecord {
    info: ConnectionInfo,
    handle: TransportHandle,
    health: CheckStatus,
    debug_logs: VecDeque<DebugLogEntry>,
    timeline: VecDeque<TimelineEvent>,
    traces: VecDeque<NetworkTrace>,
    latency_samples: VecDeque<LatencySample>,
    health_checks: VecDeque<HealthCheckResult>,
}

impl DiagnosticRecord {
    fn new(info: ConnectionInfo, handle: TransportHandle) -> Self {
        Self {
            info,
            handle,
            health: CheckStatus::Pass,
            debug_logs: VecDeque::new(),
            timeline: VecDeque::new(),
            traces: VecDeque::new(),
            latency_samples: VecDeque::new(),
            health_checks: VecDeque::new(),
        }
    }
}

pub struct DiagnosticsManager {
    config: DiagnosticsConfig,
    connections: RwLock<HashMap<ConnectionId, Arc<Mutex<DiagnosticRecord>>>>,
    sessions: RwLock<HashMap<DebugSessionId, DebugSession>>,
    last_report: RwLock<Option<SystemDiagnostics>>,
}

impl DiagnosticsManager {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: DiagnosticsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connections: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            last_report: RwLock::new(None),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn detail_level(&self) -> DetailLevel {
        self.config.detail_level
    }

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    pub fn register_connection(&self, info: ConnectionInfo, handle: TransportHandle) {
        if !self.config.enabled {
            return;
        }
        let id = info.id.clone();
        let mut record = DiagnosticRecord::new(info, handle);
        self.push_event(
            &mut record,
            timeline_event("connected", "connection registered", EventSeverity::Low),
        );
        self.connections
            .write()
            .insert(id.clone(), Arc::new(Mutex::new(record)));
        debug!(connection_id = %id, "Diagnostics tracking started");
    }

    /// Drop all data for `id` and end its debug sessions.
    pub fn unregister_connection(&self, id: &ConnectionId) -> bool {
        if !self.config.enabled {
            return false;
        }
        let removed = self.connections.write().remove(id).is_some();
        let ended = {
            let mut sessions = self.sessions.write();
            let before = sessions.len();
            sessions.retain(|_, session| &session.connection_id != id);
            before - sessions.len()
        };
        if removed {
            debug!(connection_id = %id, sessions_ended = ended, "Diagnostics tracking stopped");
        }
        removed
    }

    pub fn is_tracked(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Record a message exchange as a network trace and a debug entry,
    /// each subject to its own gate.
    pub fn log_message(
        &self,
        id: &ConnectionId,
        message_type: &str,
        size: usize,
        direction: Direction,
        latency: Option<Duration>,
    ) {
        let Some(record) = self.record(id) else {
            return;
        };
        let trace = self.tracing_enabled(id);
        let log = self.should_log(id, DebugFeature::MessageLogging, LogLevel::Debug);
        if !trace && !log {
            return;
        }

        let now = Utc::now();
        let context = self.context(|| {
            json!({
                "type": message_type,
                "size": size,
                "direction": direction,
                "latency_ms": latency.map(|l| l.as_millis() as u64),
            })
        });
        let mut record = record.lock();
        if trace {
            push_bounded(
                &mut record.traces,
                NetworkTrace {
                    timestamp: now,
                    direction,
                    message_type: message_type.to_string(),
                    size,
                    latency,
                },
                self.config.max_traces,
            );
        }
        if log {
            push_bounded(
                &mut record.debug_logs,
                DebugLogEntry {
                    timestamp: now,
                    level: LogLevel::Debug,
                    category: "message",
                    message: format!("{direction:?} {message_type} ({size} bytes)"),
                    context,
                },
                self.config.max_log_entries,
            );
        }
    }

    /// Record an error. The timeline always gets a high-severity event;
    /// the debug log entry is gated on error capture.
    pub fn log_error(&self, id: &ConnectionId, message: &str, error: &dyn fmt::Display) {
        let Some(record) = self.record(id) else {
            return;
        };
        let log = self.should_log(id, DebugFeature::ErrorCapture, LogLevel::Error);
        let context = self.context(|| json!({ "error": error.to_string() }));

        let mut record = record.lock();
        if log {
            push_bounded(
                &mut record.debug_logs,
                DebugLogEntry {
                    timestamp: Utc::now(),
                    level: LogLevel::Error,
                    category: "error",
                    message: format!("{message}: {error}"),
                    context,
                },
                self.config.max_log_entries,
            );
        }
        self.push_event(
            &mut record,
            timeline_event("error", format!("{message}: {error}"), EventSeverity::High),
        );
    }

    pub fn record_state_change(&self, id: &ConnectionId, from: &str, to: &str, trigger: &str) {
        let Some(record) = self.record(id) else {
            return;
        };
        let log = self.should_log(id, DebugFeature::StateTracking, LogLevel::Info);
        let context = self.context(|| json!({ "from": from, "to": to, "trigger": trigger }));

        let mut record = record.lock();
        if log {
            push_bounded(
                &mut record.debug_logs,
                DebugLogEntry {
                    timestamp: Utc::now(),
                    level: LogLevel::Info,
                    category: "state",
                    message: format!("{from} -> {to}"),
                    context,
                },
                self.config.max_log_entries,
            );
        }
        self.push_event(
            &mut record,
            timeline_event(
                "state_change",
                format!("{from} -> {to} ({trigger})"),
                EventSeverity::Medium,
            ),
        );
    }

    /// Add a free-form timeline event.
    pub fn record_event(
        &self,
        id: &ConnectionId,
        event_type: &str,
        description: impl Into<String>,
        severity: EventSeverity,
    ) {
        let Some(record) = self.record(id) else {
            return;
        };
        let mut record = record.lock();
        self.push_event(&mut record, timeline_event(event_type, description, severity));
    }

    pub fn record_latency(&self, id: &ConnectionId, latency: Duration) {
        let Some(record) = self.record(id) else {
            return;
        };
        if !self.config.enable_performance_profiling
            && self
                .session_level(id, DebugFeature::PerformanceProfiling)
                .is_none()
        {
            return;
        }
        push_bounded(
            &mut record.lock().latency_samples,
            LatencySample {
                timestamp: Utc::now(),
                latency,
            },
            self.config.max_traces,
        );
    }

    // -------------------------------------------------------------------------
    // Debug sessions
    // -------------------------------------------------------------------------

    /// Open a debug session on one connection.
    ///
    /// # Errors
    ///
    /// Fails when diagnostics are disabled, the connection is unknown, or
    /// `max_debug_sessions` sessions are already open.
    pub fn start_debug_session(
        &self,
        id: &ConnectionId,
        features: impl IntoIterator<Item = DebugFeature>,
        level: LogLevel,
    ) -> Result<DebugSessionId> {
        if !self.config.enabled {
            return Err(Error::Disabled(COMPONENT));
        }
        let record = self.record(id).ok_or_else(|| Error::connection_not_found(id))?;

        let session = DebugSession {
            id: DebugSessionId::generate(),
            connection_id: id.clone(),
            features: features.into_iter().collect::<HashSet<_>>(),
            level,
            started_at: Utc::now(),
        };
        let session_id = session.id.clone();
        {
            let mut sessions = self.sessions.write();
            if sessions.len() >= self.config.max_debug_sessions {
                return Err(Error::Capacity(format!(
                    "maximum debug sessions reached ({})",
                    self.config.max_debug_sessions
                )));
            }
            sessions.insert(session_id.clone(), session);
        }

        let mut record = record.lock();
        self.push_event(
            &mut record,
            timeline_event(
                "debug_session_started",
                format!("debug session {session_id} started"),
                EventSeverity::Low,
            ),
        );
        info!(connection_id = %id, session_id = %session_id, level = %level, "Debug session started");
        Ok(session_id)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such session is open.
    pub fn stop_debug_session(&self, session_id: &DebugSessionId) -> Result<()> {
        let session = self
            .sessions
            .write()
            .remove(session_id)
            .ok_or_else(|| Error::NotFound {
                kind: "debug session",
                id: session_id.to_string(),
            })?;

        if let Some(record) = self.record(&session.connection_id) {
            let mut record = record.lock();
            self.push_event(
                &mut record,
                timeline_event(
                    "debug_session_stopped",
                    format!("debug session {session_id} stopped"),
                    EventSeverity::Low,
                ),
            );
        }
        info!(
            connection_id = %session.connection_id,
            session_id = %session_id,
            "Debug session stopped"
        );
        Ok(())
    }

    pub fn debug_sessions(&self) -> Vec<DebugSession> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    // -------------------------------------------------------------------------
    // Health checks
    // -------------------------------------------------------------------------

    /// Probe a connection on demand and record the result.
    ///
    /// # Errors
    ///
    /// Fails when diagnostics are disabled or the connection is unknown. A
    /// failing probe is a `Fail` result, not an error.
    pub async fn perform_health_check(
        &self,
        id: &ConnectionId,
        kind: HealthCheckKind,
    ) -> Result<HealthCheckResult> {
        if !self.config.enabled {
            return Err(Error::Disabled(COMPONENT));
        }
        let record = self.record(id).ok_or_else(|| Error::connection_not_found(id))?;
        let handle = Arc::clone(&record.lock().handle);

        let started = Instant::now();
        let probe = timeout(self.config.check_timeout(), handle.ping()).await;
        let elapsed = started.elapsed();

        let (status, latency, message) = match (kind, probe) {
            (HealthCheckKind::Ping, Ok(Ok(()))) => {
                (CheckStatus::Pass, Some(elapsed), "ping acknowledged".to_string())
            }
            (HealthCheckKind::Latency, Ok(Ok(()))) => (
                CheckStatus::for_latency(elapsed.as_millis()),
                Some(elapsed),
                format!("latency {}ms", elapsed.as_millis()),
            ),
            (_, Ok(Err(e))) => (CheckStatus::Fail, None, format!("ping failed: {e}")),
            (_, Err(_)) => (
                CheckStatus::Fail,
                None,
                format!("no response within {:?}", self.config.check_timeout()),
            ),
        };

        let result = HealthCheckResult {
            connection_id: id.clone(),
            kind,
            status,
            latency,
            message,
            timestamp: Utc::now(),
        };

        {
            let mut record = record.lock();
            record.health = status;
            push_bounded(
                &mut record.health_checks,
                result.clone(),
                self.config.max_health_checks,
            );
            if status == CheckStatus::Fail {
                self.push_event(
                    &mut record,
                    timeline_event("health_check_failed", result.message.clone(), EventSeverity::High),
                );
            }
        }

        if status == CheckStatus::Fail {
            warn!(connection_id = %id, ?kind, message = %result.message, "Health check failed");
        } else {
            debug!(connection_id = %id, ?kind, ?status, "Health check completed");
        }
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// Fails when diagnostics are disabled or the connection is unknown.
    pub fn connection_diagnostics(&self, id: &ConnectionId) -> Result<ConnectionDiagnostics> {
        if !self.config.enabled {
            return Err(Error::Disabled(COMPONENT));
        }
        let record = self.record(id).ok_or_else(|| Error::connection_not_found(id))?;
        let debug_sessions = self
            .sessions
            .read()
            .values()
            .filter(|s| &s.connection_id == id)
            .map(|s| s.id.clone())
            .collect();

        let record = record.lock();
        Ok(ConnectionDiagnostics {
            info: record.info.clone(),
            health: record.health,
            debug_logs: record.debug_logs.iter().cloned().collect(),
            timeline: record.timeline.iter().cloned().collect(),
            traces: record.traces.iter().cloned().collect(),
            latency_samples: record.latency_samples.iter().cloned().collect(),
            health_checks: record.health_checks.iter().cloned().collect(),
            debug_sessions,
        })
    }

    /// Compute a fleet-wide report. Connections never checked count as
    /// passing; an empty fleet is healthy.
    pub fn system_diagnostics(&self) -> SystemDiagnostics {
        let records: Vec<_> = self.connections.read().values().cloned().collect();
        let active_debug_sessions = self.sessions.read().len();

        let mut passing = 0;
        let (mut logs, mut events, mut traces) = (0, 0, 0);
        for record in &records {
            let record = record.lock();
            if record.health == CheckStatus::Pass {
                passing += 1;
            }
            logs += record.debug_logs.len();
            events += record.timeline.len();
            traces += record.traces.len();
        }

        let total = records.len();
        let ratio = if total == 0 {
            1.0
        } else {
            passing as f64 / total as f64
        };

        SystemDiagnostics {
            enabled: self.config.enabled,
            detail_level: self.config.detail_level,
            total_connections: total,
            passing_connections: passing,
            health: SystemHealthStatus::from_ratio(ratio),
            active_debug_sessions,
            total_log_entries: logs,
            total_timeline_events: events,
            total_traces: traces,
            timestamp: Utc::now(),
        }
    }

    /// The report computed by the most recent maintenance round.
    pub fn last_report(&self) -> Option<SystemDiagnostics> {
        self.last_report.read().clone()
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Prune entries older than the retention period. Returns the number
    /// of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention_period())
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.prune_older_than(cutoff)
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let records: Vec<_> = self.connections.read().values().cloned().collect();
        let mut pruned = 0;
        for record in records {
            let mut record = record.lock();
            pruned += prune_before(&mut record.debug_logs, cutoff, |e| e.timestamp);
            pruned += prune_before(&mut record.timeline, cutoff, |e| e.timestamp);
            pruned += prune_before(&mut record.traces, cutoff, |t| t.timestamp);
            pruned += prune_before(&mut record.latency_samples, cutoff, |s| s.timestamp);
            pruned += prune_before(&mut record.health_checks, cutoff, |c| c.timestamp);
        }
        if pruned > 0 {
            debug!(pruned, "Expired diagnostics pruned");
        }
        pruned
    }

    /// Periodically prune expired data and refresh the system report.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.config.enabled {
            return;
        }
        run_periodic(
            "diagnostics_cleanup",
            self.config.cleanup_interval(),
            cancel,
            || {
                let this = Arc::clone(&self);
                async move {
                    this.cleanup_expired();
                    let report = this.system_diagnostics();
                    if report.health != SystemHealthStatus::Healthy {
                        warn!(
                            health = ?report.health,
                            passing = report.passing_connections,
                            total = report.total_connections,
                            "System diagnostics degraded"
                        );
                    }
                    *this.last_report.write() = Some(report);
                }
            },
        )
        .await;
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn record(&self, id: &ConnectionId) -> Option<Arc<Mutex<DiagnosticRecord>>> {
        if !self.config.enabled {
            return None;
        }
        self.connections.read().get(id).cloned()
    }

    /// Lowest level requested by any open session on `id` with `feature`.
    fn session_level(&self, id: &ConnectionId, feature: DebugFeature) -> Option<LogLevel> {
        self.sessions
            .read()
            .values()
            .filter(|s| &s.connection_id == id && s.collects(feature))
            .map(|s| s.level)
            .min()
    }

    fn should_log(&self, id: &ConnectionId, feature: DebugFeature, level: LogLevel) -> bool {
        self.config.enable_debug_logging
            || self
                .session_level(id, feature)
                .is_some_and(|min| level >= min)
    }

    fn tracing_enabled(&self, id: &ConnectionId) -> bool {
        self.config.enable_network_tracing
            || self.session_level(id, DebugFeature::NetworkTracing).is_some()
    }

    /// Structured context is only kept at detailed verbosity and above.
    fn context(&self, build: impl FnOnce() -> serde_json::Value) -> serde_json::Value {
        if self.config.detail_level >= DetailLevel::Detailed {
            build()
        } else {
            serde_json::Value::Null
        }
    }

    fn push_event(&self, record: &mut DiagnosticRecord, event: TimelineEvent) {
        if self.config.detail_level == DetailLevel::Basic && event.severity < EventSeverity::Medium
        {
            return;
        }
        push_bounded(&mut record.timeline, event, self.config.max_timeline_events);
    }
}

fn timeline_event(
    event_type: &str,
    description: impl Into<String>,
    severity: EventSeverity,
) -> TimelineEvent {
    TimelineEvent {
        timestamp: Utc::now(),
        event_type: event_type.to_string(),
        description: description.into(),
        severity,
    }
}
