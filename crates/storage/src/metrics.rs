//! Store operation metrics.
//!
//! [`Metrics`] counts the key-value operations a store serves, their
//! latencies and their failures. One collector is typically shared by every
//! store a factory opens, so the numbers describe the physical table rather
//! than a single logical store.
//!
//! # Memory Ordering
//!
//! Counters are independent and only ever incremented (or zeroed by
//! [`Metrics::reset`]), so every atomic uses `Ordering::Relaxed`. A snapshot
//! reads counters one after the other and may observe them at slightly
//! different instants.
//!
//! # Percentiles
//!
//! Each operation keeps the most recent 1024 latency samples in a ring
//! buffer guarded by a [`parking_lot::Mutex`] held for a single push.
//! Percentiles are computed when a snapshot is taken.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use tablekv_storage::metrics::{Metrics, Operation};
//!
//! let metrics = Metrics::new();
//! metrics.record(Operation::Get, Duration::from_micros(120));
//! metrics.record(Operation::Put, Duration::from_micros(300));
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.get.count, 1);
//! assert_eq!(snapshot.total_operations(), 2);
//! assert_eq!(snapshot.get.percentiles.p50, 120);
//! ```

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::StorageError;

/// Number of latency samples retained per operation.
const HISTOGRAM_WINDOW_SIZE: usize = 1024;

/// Error rate above which [`Metrics::log_metrics`] emits a warning.
const HIGH_ERROR_RATE: f64 = 0.05;

/// Key-value operations tracked by [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Single-key read.
    Get,
    /// Unconditional single-key write.
    Put,
    /// Bulk write.
    PutAll,
    /// Conditional insert.
    PutIfAbsent,
    /// Single-key delete.
    Delete,
}

impl Operation {
    /// Every tracked operation, in reporting order.
    pub const ALL: [Operation; 5] =
        [Operation::Get, Operation::Put, Operation::PutAll, Operation::PutIfAbsent, Operation::Delete];

    /// Returns the operation's name as used in span and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Put => "put",
            Operation::PutAll => "put_all",
            Operation::PutIfAbsent => "put_if_absent",
            Operation::Delete => "delete",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency percentiles for one operation, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyPercentiles {
    /// Median latency.
    pub p50: u64,
    /// 95th percentile latency.
    pub p95: u64,
    /// 99th percentile latency.
    pub p99: u64,
}

/// Ring buffer of recent latency samples.
struct LatencyHistogram {
    inner: Mutex<HistogramInner>,
}

struct HistogramInner {
    samples: Vec<u64>,
    next: usize,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HistogramInner {
                samples: Vec::with_capacity(HISTOGRAM_WINDOW_SIZE),
                next: 0,
            }),
        }
    }

    fn record(&self, value_us: u64) {
        let mut inner = self.inner.lock();
        let next = inner.next;
        if inner.samples.len() < HISTOGRAM_WINDOW_SIZE {
            inner.samples.push(value_us);
        } else {
            inner.samples[next] = value_us;
        }
        inner.next = (next + 1) % HISTOGRAM_WINDOW_SIZE;
    }

    fn percentiles(&self) -> LatencyPercentiles {
        let mut sorted = self.inner.lock().samples.clone();
        if sorted.is_empty() {
            return LatencyPercentiles::default();
        }
        sorted.sort_unstable();
        let len = sorted.len();
        LatencyPercentiles {
            p50: sorted[percentile_index(len, 50)],
            p95: sorted[percentile_index(len, 95)],
            p99: sorted[percentile_index(len, 99)],
        }
    }

    fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.samples.clear();
        inner.next = 0;
    }
}

/// Nearest-rank index of `percentile` in a sorted slice of `len` elements.
fn percentile_index(len: usize, percentile: u32) -> usize {
    if len == 0 {
        return 0;
    }
    let rank = (u64::from(percentile) * len as u64).div_ceil(100) as usize;
    rank.saturating_sub(1).min(len - 1)
}

struct OperationCounters {
    count: AtomicU64,
    latency_us: AtomicU64,
    histogram: LatencyHistogram,
}

impl OperationCounters {
    fn new() -> Self {
        Self { count: AtomicU64::new(0), latency_us: AtomicU64::new(0), histogram: LatencyHistogram::new() }
    }

    fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            count: self.count.load(Ordering::Relaxed),
            latency_us: self.latency_us.load(Ordering::Relaxed),
            percentiles: self.histogram.percentiles(),
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.latency_us.store(0, Ordering::Relaxed);
        self.histogram.reset();
    }
}

/// Counters of a single operation at snapshot time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationSnapshot {
    /// Completed calls, successful or not.
    pub count: u64,
    /// Cumulative latency in microseconds.
    pub latency_us: u64,
    /// Percentiles over the recent sample window.
    pub percentiles: LatencyPercentiles,
}

impl OperationSnapshot {
    /// Mean latency in microseconds, or `0.0` if nothing was recorded.
    #[must_use]
    pub fn avg_latency_us(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.latency_us as f64 / self.count as f64
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// `get` calls.
    pub get: OperationSnapshot,
    /// `put` calls.
    pub put: OperationSnapshot,
    /// `put_all` calls.
    pub put_all: OperationSnapshot,
    /// `put_if_absent` calls.
    pub put_if_absent: OperationSnapshot,
    /// `delete` calls.
    pub delete: OperationSnapshot,
    /// Bulk-write requests submitted by `put_all`.
    pub chunks_written: u64,
    /// Put-if-absent attempts that lost the conditional insert and re-read.
    pub put_if_absent_conflicts: u64,
    /// Put-if-absent attempts restarted because the competing record vanished.
    pub put_if_absent_retries: u64,
    /// Failed operations.
    pub error_count: u64,
    /// Failed operations that were timeouts.
    pub timeout_count: u64,
}

impl MetricsSnapshot {
    /// Returns the snapshot of a single operation.
    #[must_use]
    pub fn operation(&self, op: Operation) -> &OperationSnapshot {
        match op {
            Operation::Get => &self.get,
            Operation::Put => &self.put,
            Operation::PutAll => &self.put_all,
            Operation::PutIfAbsent => &self.put_if_absent,
            Operation::Delete => &self.delete,
        }
    }

    /// Total operations across all kinds.
    #[must_use]
    pub fn total_operations(&self) -> u64 {
        Operation::ALL.iter().map(|op| self.operation(*op).count).sum()
    }

    /// Failed operations divided by total operations.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let total = self.total_operations();
        if total == 0 {
            return 0.0;
        }
        self.error_count as f64 / total as f64
    }
}

/// Collects operation counts, latencies and failures for key-value stores.
///
/// Cloning is cheap; clones share the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    operations: [OperationCounters; 5],
    chunks_written: AtomicU64,
    put_if_absent_conflicts: AtomicU64,
    put_if_absent_retries: AtomicU64,
    error_count: AtomicU64,
    timeout_count: AtomicU64,
}

impl Metrics {
    /// Creates a collector with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                operations: std::array::from_fn(|_| OperationCounters::new()),
                chunks_written: AtomicU64::new(0),
                put_if_absent_conflicts: AtomicU64::new(0),
                put_if_absent_retries: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                timeout_count: AtomicU64::new(0),
            }),
        }
    }

    /// Records one completed call of `op`.
    pub fn record(&self, op: Operation, duration: Duration) {
        let us = duration.as_micros() as u64;
        let counters = &self.inner.operations[op.index()];
        counters.count.fetch_add(1, Ordering::Relaxed);
        counters.latency_us.fetch_add(us, Ordering::Relaxed);
        counters.histogram.record(us);
    }

    /// Records a failed operation, classifying timeouts.
    pub fn record_error(&self, err: &StorageError) {
        self.inner.error_count.fetch_add(1, Ordering::Relaxed);
        if matches!(err, StorageError::Timeout) {
            self.inner.timeout_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records one bulk-write request.
    pub fn record_chunk(&self) {
        self.inner.chunks_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lost conditional insert.
    pub fn record_conflict(&self) {
        self.inner.put_if_absent_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a restarted put-if-absent attempt.
    pub fn record_retry(&self) {
        self.inner.put_if_absent_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let op = |op: Operation| self.inner.operations[op.index()].snapshot();
        MetricsSnapshot {
            get: op(Operation::Get),
            put: op(Operation::Put),
            put_all: op(Operation::PutAll),
            put_if_absent: op(Operation::PutIfAbsent),
            delete: op(Operation::Delete),
            chunks_written: self.inner.chunks_written.load(Ordering::Relaxed),
            put_if_absent_conflicts: self.inner.put_if_absent_conflicts.load(Ordering::Relaxed),
            put_if_absent_retries: self.inner.put_if_absent_retries.load(Ordering::Relaxed),
            error_count: self.inner.error_count.load(Ordering::Relaxed),
            timeout_count: self.inner.timeout_count.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        for counters in &self.inner.operations {
            counters.reset();
        }
        self.inner.chunks_written.store(0, Ordering::Relaxed);
        self.inner.put_if_absent_conflicts.store(0, Ordering::Relaxed);
        self.inner.put_if_absent_retries.store(0, Ordering::Relaxed);
        self.inner.error_count.store(0, Ordering::Relaxed);
        self.inner.timeout_count.store(0, Ordering::Relaxed);
    }

    /// Logs the current snapshot at INFO level.
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        if snapshot.total_operations() == 0 {
            return;
        }

        tracing::info!(
            get_count = snapshot.get.count,
            put_count = snapshot.put.count,
            put_all_count = snapshot.put_all.count,
            put_if_absent_count = snapshot.put_if_absent.count,
            delete_count = snapshot.delete.count,
            avg_get_latency_us = snapshot.get.avg_latency_us(),
            avg_put_latency_us = snapshot.put.avg_latency_us(),
            get_p99 = snapshot.get.percentiles.p99,
            put_p99 = snapshot.put.percentiles.p99,
            chunks_written = snapshot.chunks_written,
            put_if_absent_conflicts = snapshot.put_if_absent_conflicts,
            put_if_absent_retries = snapshot.put_if_absent_retries,
            error_count = snapshot.error_count,
            timeout_count = snapshot.timeout_count,
            "Store metrics snapshot"
        );

        if snapshot.error_rate() > HIGH_ERROR_RATE {
            warn!(
                error_rate = snapshot.error_rate(),
                error_count = snapshot.error_count,
                total_ops = snapshot.total_operations(),
                "High store error rate detected"
            );
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics").field("snapshot", &self.snapshot()).finish()
    }
}

/// Exposes the [`Metrics`] instance a store reports to.
pub trait MetricsCollector {
    /// Returns the store's metrics collector.
    fn metrics(&self) -> &Metrics;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_index_nearest_rank() {
        assert_eq!(percentile_index(0, 50), 0);
        assert_eq!(percentile_index(1, 99), 0);
        assert_eq!(percentile_index(100, 50), 49);
        assert_eq!(percentile_index(100, 99), 98);
        assert_eq!(percentile_index(10, 95), 9);
    }

    #[test]
    fn test_histogram_window_wraps() {
        let histogram = LatencyHistogram::new();
        for i in 0..(HISTOGRAM_WINDOW_SIZE as u64 + 10) {
            histogram.record(i);
        }
        let inner = histogram.inner.lock();
        assert_eq!(inner.samples.len(), HISTOGRAM_WINDOW_SIZE);
        assert_eq!(inner.next, 10);
        // The oldest samples were overwritten.
        assert!(!inner.samples.contains(&0));
    }

    #[test]
    fn test_record_and_snapshot() {
        let metrics = Metrics::new();
        metrics.record(Operation::Get, Duration::from_micros(100));
        metrics.record(Operation::Get, Duration::from_micros(300));
        metrics.record(Operation::PutIfAbsent, Duration::from_micros(50));
        metrics.record_conflict();
        metrics.record_chunk();
        metrics.record_chunk();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.get.count, 2);
        assert_eq!(snapshot.get.latency_us, 400);
        assert!((snapshot.get.avg_latency_us() - 200.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.put_if_absent.count, 1);
        assert_eq!(snapshot.put_if_absent_conflicts, 1);
        assert_eq!(snapshot.chunks_written, 2);
        assert_eq!(snapshot.total_operations(), 3);
        assert_eq!(snapshot.put.avg_latency_us(), 0.0);
    }

    #[test]
    fn test_error_classification() {
        let metrics = Metrics::new();
        metrics.record(Operation::Put, Duration::from_micros(1));
        metrics.record(Operation::Put, Duration::from_micros(1));
        metrics.record_error(&StorageError::timeout());
        metrics.record_error(&StorageError::connection("throttled"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.error_count, 2);
        assert_eq!(snapshot.timeout_count, 1);
        assert!((snapshot.error_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let metrics = Metrics::new();
        for op in Operation::ALL {
            metrics.record(op, Duration::from_micros(10));
        }
        metrics.record_retry();
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record(Operation::Delete, Duration::from_micros(5));
        assert_eq!(metrics.snapshot().delete.count, 1);
    }

    #[test]
    fn test_operation_names() {
        let names: Vec<_> = Operation::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["get", "put", "put_all", "put_if_absent", "delete"]);
    }
}
