//! Connection, message, error and latency metrics.
//!
//! Pure aggregation: components push observations, operators pull
//! [`MetricsSnapshot`]s. Each section has its own lock, so recording a
//! message never contends with recording a connection. A snapshot reads each
//! section under a single acquisition of that section's lock and copies it,
//! so it is internally consistent per section and never mutates live state.
//!
//! Alongside the fleet totals the aggregator keeps per-connection
//! [`ConnectionStats`] and a bounded ring of [`TimeSeriesPoint`]s sampled at
//! a fixed resolution.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::domain::health::latency_penalty;
use crate::domain::ConnectionId;
use crate::error::Result;
use crate::infrastructure::config::MetricsConfig;
use crate::infrastructure::task::run_periodic;

/// Upper bounds of the latency histogram buckets, in milliseconds. A final
/// overflow bucket catches everything above the last bound.
pub const LATENCY_BUCKETS_MS: [u64; 9] = [1, 5, 10, 50, 100, 500, 1000, 5000, 10_000];

/// Error taxonomy for error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Connection,
    Message,
    Timeout,
    Authentication,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Message => "message",
            Self::Timeout => "timeout",
            Self::Authentication => "authentication",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_closed: u64,
    pub active: u64,
    pub max_concurrent: u64,
    pub rejection_reasons: HashMap<String, u64>,
    pub average_lifetime: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageMetrics {
    pub sent: u64,
    pub received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub by_type: HashMap<String, u64>,
    pub average_size: f64,
    pub messages_per_second: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorMetrics {
    pub total: u64,
    pub by_category: HashMap<ErrorCategory, u64>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyBucket {
    /// Inclusive upper bound in milliseconds; `None` for the overflow bucket.
    pub le_ms: Option<u64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub average_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub samples: u64,
    pub histogram: Vec<LatencyBucket>,
    pub bytes_per_second: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        let histogram = LATENCY_BUCKETS_MS
            .iter()
            .map(|le| Some(*le))
            .chain(std::iter::once(None))
            .map(|le_ms| LatencyBucket { le_ms, count: 0 })
            .collect();
        Self {
            average_latency: Duration::ZERO,
            min_latency: None,
            max_latency: None,
            samples: 0,
            histogram,
            bytes_per_second: 0.0,
        }
    }
}

/// Traffic and quality counters for one connection.
///
/// Survives a handle replacement, so `reconnections` counts every recovery
/// of the same ID.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub by_type: HashMap<String, u64>,
    pub average_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub latency_samples: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub reconnections: u32,
    /// 1.0 is perfect. Error ratio, latency and reconnections pull it down.
    pub quality_score: f64,
}

impl ConnectionStats {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            messages_sent: 0,
            messages_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            by_type: HashMap::new(),
            average_latency: Duration::ZERO,
            min_latency: None,
            max_latency: None,
            latency_samples: 0,
            errors: 0,
            last_error: None,
            last_error_at: None,
            reconnections: 0,
            quality_score: 1.0,
        }
    }

    fn refresh_quality(&mut self) {
        let messages = self.messages_sent + self.messages_received;
        let error_ratio = if messages == 0 {
            0.0
        } else {
            (self.errors as f64 / messages as f64).min(1.0)
        };
        let score = 1.0
            - error_ratio
            - latency_penalty(self.average_latency)
            - 0.1 * f64::from(self.reconnections);
        self.quality_score = score.max(0.0);
    }
}

/// One time-series sample. Rates cover the interval since the previous
/// sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub active_connections: u64,
    pub messages_per_second: f64,
    pub bytes_per_second: f64,
    pub errors_per_second: f64,
    pub average_latency: Duration,
}

/// Cumulative totals at the previous sample.
#[derive(Debug, Clone, Copy)]
struct Baseline {
    at: Instant,
    messages: u64,
    bytes: u64,
    errors: u64,
}

impl Baseline {
    fn zero() -> Self {
        Self {
            at: Instant::now(),
            messages: 0,
            bytes: 0,
            errors: 0,
        }
    }
}

struct TimeSeries {
    points: VecDeque<TimeSeriesPoint>,
    capacity: usize,
    baseline: Baseline,
}

impl TimeSeries {
    fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            baseline: Baseline::zero(),
        }
    }

    fn push(&mut self, point: TimeSeriesPoint) {
        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }
}

/// Deep copy of every metrics section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
    pub performance: PerformanceMetrics,
    pub uptime: Duration,
    pub timestamp: DateTime<Utc>,
}

pub struct MetricsAggregator {
    resolution: Duration,
    started: RwLock<Instant>,
    connections: RwLock<ConnectionMetrics>,
    messages: RwLock<MessageMetrics>,
    errors: RwLock<ErrorMetrics>,
    performance: RwLock<PerformanceMetrics>,
    per_connection: RwLock<HashMap<ConnectionId, Arc<Mutex<ConnectionStats>>>>,
    time_series: Mutex<TimeSeries>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::build(&MetricsConfig::default())
    }

    /// Create an aggregator with a custom time-series resolution and
    /// retention.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_config(config: &MetricsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: &MetricsConfig) -> Self {
        Self {
            resolution: config.time_series_resolution(),
            started: RwLock::new(Instant::now()),
            connections: RwLock::new(ConnectionMetrics::default()),
            messages: RwLock::new(MessageMetrics::default()),
            errors: RwLock::new(ErrorMetrics::default()),
            performance: RwLock::new(PerformanceMetrics::default()),
            per_connection: RwLock::new(HashMap::new()),
            time_series: Mutex::new(TimeSeries::new(config.max_data_points)),
        }
    }

    pub fn record_connection_accepted(&self) {
        let mut c = self.connections.write();
        c.total_accepted += 1;
        c.active += 1;
        c.max_concurrent = c.max_concurrent.max(c.active);
    }

    pub fn record_connection_rejected(&self, reason: &str) {
        let mut c = self.connections.write();
        c.total_rejected += 1;
        *c.rejection_reasons.entry(reason.to_string()).or_default() += 1;
    }

    pub fn record_connection_closed(&self, lifetime: Duration) {
        let mut c = self.connections.write();
        c.total_closed += 1;
        c.active = c.active.saturating_sub(1);
        c.average_lifetime = if c.average_lifetime.is_zero() {
            lifetime
        } else {
            c.average_lifetime.mul_f64(0.9) + lifetime.mul_f64(0.1)
        };
    }

    pub fn record_message_sent(&self, message_type: &str, bytes: usize) {
        let mut m = self.messages.write();
        m.sent += 1;
        m.bytes_sent += bytes as u64;
        *m.by_type.entry(message_type.to_string()).or_default() += 1;
        m.average_size = m.bytes_sent as f64 / m.sent as f64;
    }

    pub fn record_message_received(&self, message_type: &str, bytes: usize) {
        let mut m = self.messages.write();
        m.received += 1;
        m.bytes_received += bytes as u64;
        *m.by_type.entry(message_type.to_string()).or_default() += 1;
    }

    pub fn record_latency(&self, latency: Duration) {
        let mut p = self.performance.write();
        p.samples += 1;
        p.average_latency = if p.samples == 1 {
            latency
        } else {
            p.average_latency.mul_f64(0.9) + latency.mul_f64(0.1)
        };
        p.min_latency = Some(p.min_latency.map_or(latency, |m| m.min(latency)));
        p.max_latency = Some(p.max_latency.map_or(latency, |m| m.max(latency)));

        let bucket = LATENCY_BUCKETS_MS
            .iter()
            .position(|le| latency <= Duration::from_millis(*le))
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        p.histogram[bucket].count += 1;
    }

    pub fn record_error(&self, category: ErrorCategory, message: impl Into<String>) {
        let mut e = self.errors.write();
        e.total += 1;
        *e.by_category.entry(category).or_default() += 1;
        e.last_error = Some(message.into());
        e.last_error_at = Some(Utc::now());
    }

    // -------------------------------------------------------------------------
    // Per-connection
    // -------------------------------------------------------------------------

    /// Start tracking `id`. Existing stats for the same ID are kept.
    pub fn register_connection(&self, id: &ConnectionId) {
        self.per_connection
            .write()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ConnectionStats::new(id.clone()))));
    }

    /// Stop tracking `id` and drop its stats.
    pub fn unregister_connection(&self, id: &ConnectionId) {
        self.per_connection.write().remove(id);
    }

    pub fn record_connection_sent(&self, id: &ConnectionId, message_type: &str, bytes: usize) {
        self.with_connection(id, |s| {
            s.messages_sent += 1;
            s.bytes_sent += bytes as u64;
            *s.by_type.entry(message_type.to_string()).or_default() += 1;
        });
    }

    pub fn record_connection_received(&self, id: &ConnectionId, message_type: &str, bytes: usize) {
        self.with_connection(id, |s| {
            s.messages_received += 1;
            s.bytes_received += bytes as u64;
            *s.by_type.entry(message_type.to_string()).or_default() += 1;
        });
    }

    pub fn record_connection_latency(&self, id: &ConnectionId, latency: Duration) {
        self.with_connection(id, |s| {
            s.latency_samples += 1;
            s.average_latency = if s.latency_samples == 1 {
                latency
            } else {
                s.average_latency.mul_f64(0.9) + latency.mul_f64(0.1)
            };
            s.min_latency = Some(s.min_latency.map_or(latency, |m| m.min(latency)));
            s.max_latency = Some(s.max_latency.map_or(latency, |m| m.max(latency)));
        });
    }

    pub fn record_connection_error(&self, id: &ConnectionId, message: impl Into<String>) {
        let message = message.into();
        self.with_connection(id, |s| {
            s.errors += 1;
            s.last_error = Some(message);
            s.last_error_at = Some(Utc::now());
        });
    }

    /// Count a successful recovery of `id`.
    pub fn record_reconnection(&self, id: &ConnectionId) {
        self.with_connection(id, |s| s.reconnections += 1);
    }

    pub fn connection_metrics(&self, id: &ConnectionId) -> Option<ConnectionStats> {
        let record = self.per_connection.read().get(id).cloned()?;
        let stats = record.lock().clone();
        Some(stats)
    }

    pub fn all_connection_metrics(&self) -> Vec<ConnectionStats> {
        let records: Vec<_> = self.per_connection.read().values().cloned().collect();
        records.iter().map(|record| record.lock().clone()).collect()
    }

    /// Apply `f` to the stats of `id` and refresh its quality score. Unknown
    /// IDs are ignored.
    fn with_connection(&self, id: &ConnectionId, f: impl FnOnce(&mut ConnectionStats)) {
        let Some(record) = self.per_connection.read().get(id).cloned() else {
            return;
        };
        let mut stats = record.lock();
        f(&mut stats);
        stats.refresh_quality();
    }

    // -------------------------------------------------------------------------
    // Time series
    // -------------------------------------------------------------------------

    /// Append a point computed from the totals since the previous sample.
    /// The oldest point is dropped once the ring is full.
    pub fn sample_time_series(&self) -> TimeSeriesPoint {
        let active_connections = self.connections.read().active;
        let (messages, bytes) = {
            let m = self.messages.read();
            (m.sent + m.received, m.bytes_sent + m.bytes_received)
        };
        let errors = self.errors.read().total;
        let average_latency = self.performance.read().average_latency;

        let mut series = self.time_series.lock();
        let now = Instant::now();
        let previous = series.baseline;
        let secs = now.duration_since(previous.at).as_secs_f64();
        let rate = |current: u64, before: u64| {
            if secs > 0.0 {
                current.saturating_sub(before) as f64 / secs
            } else {
                0.0
            }
        };

        let point = TimeSeriesPoint {
            timestamp: Utc::now(),
            active_connections,
            messages_per_second: rate(messages, previous.messages),
            bytes_per_second: rate(bytes, previous.bytes),
            errors_per_second: rate(errors, previous.errors),
            average_latency,
        };
        series.baseline = Baseline {
            at: now,
            messages,
            bytes,
            errors,
        };
        series.push(point.clone());
        trace!(
            points = series.points.len(),
            messages_per_second = point.messages_per_second,
            "Time-series sample recorded"
        );
        point
    }

    /// Points recorded strictly after `since`, oldest first.
    pub fn time_series(&self, since: DateTime<Utc>) -> Vec<TimeSeriesPoint> {
        self.time_series
            .lock()
            .points
            .iter()
            .filter(|point| point.timestamp > since)
            .cloned()
            .collect()
    }

    /// Sample the time series every resolution period until cancelled.
    pub async fn run_sampling(self: Arc<Self>, cancel: CancellationToken) {
        run_periodic("metrics_sampling", self.resolution, cancel, || {
            let metrics = Arc::clone(&self);
            async move {
                metrics.sample_time_series();
            }
        })
        .await;
    }

    pub fn uptime(&self) -> Duration {
        self.started.read().elapsed()
    }

    /// Copy every section and derive throughput from uptime.
    pub fn summary(&self) -> MetricsSnapshot {
        let uptime = self.uptime();
        let connections = self.connections.read().clone();
        let mut messages = self.messages.read().clone();
        let errors = self.errors.read().clone();
        let mut performance = self.performance.read().clone();

        let secs = uptime.as_secs_f64();
        if secs > 0.0 {
            messages.messages_per_second = (messages.sent + messages.received) as f64 / secs;
            performance.bytes_per_second =
                (messages.bytes_sent + messages.bytes_received) as f64 / secs;
        }

        MetricsSnapshot {
            connections,
            messages,
            errors,
            performance,
            uptime,
            timestamp: Utc::now(),
        }
    }

    /// Zero every counter and restart the uptime clock. Tracked connections
    /// stay tracked with fresh stats; the time series is emptied.
    pub fn reset(&self) {
        *self.connections.write() = ConnectionMetrics::default();
        *self.messages.write() = MessageMetrics::default();
        *self.errors.write() = ErrorMetrics::default();
        *self.performance.write() = PerformanceMetrics::default();
        for (id, record) in self.per_connection.read().iter() {
            *record.lock() = ConnectionStats::new(id.clone());
        }
        {
            let mut series = self.time_series.lock();
            series.points.clear();
            series.baseline = Baseline::zero();
        }
        *self.started.write() = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn connection_counters() {
        let m = MetricsAggregator::new();
        m.record_connection_accepted();
        m.record_connection_accepted();
        m.record_connection_rejected("pool_full");
        m.record_connection_closed(Duration::from_secs(4));

        let s = m.summary();
        assert_eq!(s.connections.total_accepted, 2);
        assert_eq!(s.connections.active, 1);
        assert_eq!(s.connections.max_concurrent, 2);
        assert_eq!(s.connections.rejection_reasons.get("pool_full"), Some(&1));
        assert_eq!(s.connections.average_lifetime, Duration::from_secs(4));
    }

    #[test]
    fn close_never_underflows_active() {
        let m = MetricsAggregator::new();
        m.record_connection_closed(ms(1));
        assert_eq!(m.summary().connections.active, 0);
    }

    #[test]
    fn message_counters_and_types() {
        let m = MetricsAggregator::new();
        m.record_message_sent("memory_created", 100);
        m.record_message_sent("memory_created", 300);
        m.record_message_received("subscribe", 20);

        let s = m.summary();
        assert_eq!(s.messages.sent, 2);
        assert_eq!(s.messages.bytes_sent, 400);
        assert_eq!(s.messages.received, 1);
        assert_eq!(s.messages.by_type.get("memory_created"), Some(&2));
        assert!((s.messages.average_size - 200.0).abs() < 1e-9);
    }

    #[test]
    fn error_categories() {
        let m = MetricsAggregator::new();
        m.record_error(ErrorCategory::Timeout, "ping timed out");
        m.record_error(ErrorCategory::Connection, "reset by peer");
        let s = m.summary();
        assert_eq!(s.errors.total, 2);
        assert_eq!(s.errors.by_category.get(&ErrorCategory::Timeout), Some(&1));
        assert_eq!(s.errors.last_error.as_deref(), Some("reset by peer"));
        assert!(s.errors.last_error_at.is_some());
    }

    #[test]
    fn latency_histogram_buckets() {
        let m = MetricsAggregator::new();
        for v in [0, 1, 3, 10, 75, 450, 900, 4000, 9000, 20_000] {
            m.record_latency(ms(v));
        }
        let p = m.summary().performance;
        let counts: Vec<u64> = p.histogram.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 1, 0, 1, 1, 1, 1, 1, 1]);
        assert_eq!(p.histogram.last().unwrap().le_ms, None);
        assert_eq!(p.min_latency, Some(ms(0)));
        assert_eq!(p.max_latency, Some(ms(20_000)));
        assert_eq!(p.samples, 10);
    }

    #[test]
    fn sub_millisecond_excess_moves_to_next_bucket() {
        let m = MetricsAggregator::new();
        m.record_latency(Duration::from_micros(1900));
        m.record_latency(Duration::from_micros(5001));
        m.record_latency(Duration::from_micros(1000));
        let counts: Vec<u64> = m
            .summary()
            .performance
            .histogram
            .iter()
            .map(|b| b.count)
            .collect();
        assert_eq!(counts, vec![1, 1, 1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_derived_from_uptime() {
        let m = MetricsAggregator::new();
        for _ in 0..10 {
            m.record_message_sent("event", 100);
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        let s = m.summary();
        assert!((s.messages.messages_per_second - 2.0).abs() < 1e-9);
        assert!((s.performance.bytes_per_second - 200.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_does_not_mutate_and_reset_clears() {
        let m = MetricsAggregator::new();
        m.record_connection_accepted();
        let a = m.summary();
        let b = m.summary();
        assert_eq!(a.connections, b.connections);

        m.reset();
        assert_eq!(m.summary().connections, ConnectionMetrics::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_snapshots_are_consistent() {
        let m = Arc::new(MetricsAggregator::new());
        let writer = {
            let m = Arc::clone(&m);
            tokio::spawn(async move {
                for i in 0..5000 {
                    m.record_connection_accepted();
                    if i % 2 == 0 {
                        m.record_connection_closed(ms(1));
                    }
                    m.record_message_sent("e", 10);
                }
            })
        };
        for _ in 0..200 {
            let s = m.summary();
            let c = &s.connections;
            assert!(c.total_closed <= c.total_accepted);
            assert_eq!(c.active, c.total_accepted - c.total_closed);
            assert!(c.max_concurrent >= c.active);
            assert_eq!(s.messages.bytes_sent, s.messages.sent * 10);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    // -- Per-connection ---------------------------------------------------

    #[test]
    fn unknown_connection_is_ignored() {
        let m = MetricsAggregator::new();
        m.record_connection_sent(&ConnectionId::from("ghost"), "event", 10);
        m.record_reconnection(&ConnectionId::from("ghost"));
        assert!(m.connection_metrics(&ConnectionId::from("ghost")).is_none());
        assert!(m.all_connection_metrics().is_empty());
    }

    #[test]
    fn per_connection_traffic_and_latency() {
        let m = MetricsAggregator::new();
        let id = ConnectionId::from("c1");
        m.register_connection(&id);
        m.record_connection_sent(&id, "memory_created", 100);
        m.record_connection_received(&id, "subscribe", 20);
        m.record_connection_latency(&id, ms(40));
        m.record_connection_latency(&id, ms(10));

        let s = m.connection_metrics(&id).unwrap();
        assert_eq!(s.messages_sent, 1);
        assert_eq!(s.messages_received, 1);
        assert_eq!(s.bytes_sent, 100);
        assert_eq!(s.bytes_received, 20);
        assert_eq!(s.by_type.get("subscribe"), Some(&1));
        assert_eq!(s.min_latency, Some(ms(10)));
        assert_eq!(s.max_latency, Some(ms(40)));
        assert!((s.average_latency.as_secs_f64() - 0.037).abs() < 1e-6);
        assert_eq!(s.quality_score, 1.0);
        // Per-connection recording leaves fleet totals alone.
        assert_eq!(m.summary().messages.sent, 0);
    }

    #[test]
    fn quality_score_penalties() {
        let m = MetricsAggregator::new();
        let id = ConnectionId::from("c1");
        m.register_connection(&id);
        for _ in 0..10 {
            m.record_connection_sent(&id, "event", 1);
        }
        m.record_connection_error(&id, "write failed");
        m.record_reconnection(&id);
        m.record_connection_latency(&id, Duration::from_micros(200_500));

        let s = m.connection_metrics(&id).unwrap();
        assert_eq!(s.errors, 1);
        assert_eq!(s.last_error.as_deref(), Some("write failed"));
        assert_eq!(s.reconnections, 1);
        // 1.0 - 0.1 errors - 0.1 latency - 0.1 reconnection
        assert!((s.quality_score - 0.7).abs() < 1e-9);

        for _ in 0..20 {
            m.record_reconnection(&id);
        }
        assert_eq!(m.connection_metrics(&id).unwrap().quality_score, 0.0);
    }

    #[test]
    fn reregistration_keeps_stats_until_unregistered() {
        let m = MetricsAggregator::new();
        let id = ConnectionId::from("c1");
        m.register_connection(&id);
        m.record_reconnection(&id);
        m.register_connection(&id);
        assert_eq!(m.connection_metrics(&id).unwrap().reconnections, 1);

        m.unregister_connection(&id);
        assert!(m.connection_metrics(&id).is_none());
    }

    // -- Time series ------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn time_series_rates_cover_the_interval() {
        let m = MetricsAggregator::new();
        m.record_connection_accepted();
        for _ in 0..20 {
            m.record_message_sent("event", 50);
        }
        m.record_error(ErrorCategory::Message, "bad frame");
        tokio::time::advance(Duration::from_secs(10)).await;
        let first = m.sample_time_series();
        assert_eq!(first.active_connections, 1);
        assert!((first.messages_per_second - 2.0).abs() < 1e-9);
        assert!((first.bytes_per_second - 100.0).abs() < 1e-9);
        assert!((first.errors_per_second - 0.1).abs() < 1e-9);

        for _ in 0..5 {
            m.record_message_received("event", 10);
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        let second = m.sample_time_series();
        assert!((second.messages_per_second - 1.0).abs() < 1e-9);
        assert!((second.bytes_per_second - 10.0).abs() < 1e-9);
        assert_eq!(second.errors_per_second, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn time_series_is_bounded_and_filtered_by_time() {
        let config = MetricsConfig {
            time_series_resolution_secs: 1,
            max_data_points: 3,
        };
        let m = MetricsAggregator::with_config(&config).unwrap();
        let before = Utc::now() - chrono::Duration::seconds(1);
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            m.sample_time_series();
        }
        let points = m.time_series(before);
        assert_eq!(points.len(), 3);

        let after_last = points[2].timestamp;
        assert!(m.time_series(after_last).is_empty());

        m.reset();
        assert!(m.time_series(before).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sampling_task_runs_every_resolution() {
        let config = MetricsConfig {
            time_series_resolution_secs: 1,
            max_data_points: 100,
        };
        let m = Arc::new(MetricsAggregator::with_config(&config).unwrap());
        let since = Utc::now() - chrono::Duration::seconds(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&m).run_sampling(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(m.time_series(since).len(), 3);
    }

    #[test]
    fn rejects_empty_ring() {
        let config = MetricsConfig {
            time_series_resolution_secs: 60,
            max_data_points: 0,
        };
        assert!(MetricsAggregator::with_config(&config).is_err());
    }
}
