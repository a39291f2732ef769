//! Process-wide instrumentation for the background loops and the ingester.
//!
//! Everything is lock-free: counters and histogram buckets are atomics,
//! and label sets are small closed enums indexed into fixed arrays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds (seconds) of the duration histogram buckets.
pub const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cumulative duration histogram over [`DURATION_BUCKETS`].
#[derive(Debug)]
pub struct Histogram {
    /// Non-cumulative per-bucket counts; summed when rendered.
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: DURATION_BUCKETS.iter().map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if let Some(i) = DURATION_BUCKETS.iter().position(|le| secs <= *le) {
            self.buckets[i].fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_seconds(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Cumulative `(le, count)` pairs, excluding `+Inf`.
    pub fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut running = 0;
        DURATION_BUCKETS
            .iter()
            .zip(&self.buckets)
            .map(|(le, n)| {
                running += n.load(Ordering::Relaxed);
                (*le, running)
            })
            .collect()
    }
}

/// Phases of an inventory sync cycle, plus the cycle as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Metadata,
    Summary,
    JobIndex,
    Run,
}

impl SyncStep {
    pub const ALL: [SyncStep; 4] = [
        SyncStep::Metadata,
        SyncStep::Summary,
        SyncStep::JobIndex,
        SyncStep::Run,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::Metadata => "metadata",
            SyncStep::Summary => "summary",
            SyncStep::JobIndex => "job_index",
            SyncStep::Run => "run",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub const ALL: [RunStatus; 2] = [RunStatus::Success, RunStatus::Failure];

    pub fn from_ok(ok: bool) -> Self {
        if ok {
            RunStatus::Success
        } else {
            RunStatus::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// All promtrail metrics. Share one instance behind an `Arc`.
#[derive(Debug, Default)]
pub struct Metrics {
    sync_duration: [Histogram; 4],
    sync_success: [Counter; 4],
    sync_failure: [Counter; 4],
    job_index_jobs: [Counter; 2],
    retention_duration: [Histogram; 2],
    retention_deleted: Counter,
    ingest_enqueued: Counter,
    ingest_dropped: Counter,
    ingest_flushed_records: Counter,
    ingest_flush_failures: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sync step (or whole run) outcome.
    pub fn observe_sync(&self, step: SyncStep, elapsed: Duration, ok: bool) {
        self.sync_duration[step.index()].observe(elapsed);
        if ok {
            self.sync_success[step.index()].inc();
        } else {
            self.sync_failure[step.index()].inc();
        }
    }

    /// Record the per-job outcome counts of one job-index phase.
    pub fn record_job_index_jobs(&self, succeeded: u64, failed: u64) {
        self.job_index_jobs[RunStatus::Success.index()].add(succeeded);
        self.job_index_jobs[RunStatus::Failure.index()].add(failed);
    }

    pub fn observe_retention(&self, elapsed: Duration, status: RunStatus, deleted: u64) {
        self.retention_duration[status.index()].observe(elapsed);
        self.retention_deleted.add(deleted);
    }

    pub fn record_enqueued(&self) {
        self.ingest_enqueued.inc();
    }

    pub fn record_dropped(&self) {
        self.ingest_dropped.inc();
    }

    pub fn record_flush(&self, records: usize, ok: bool) {
        if ok {
            self.ingest_flushed_records.add(records as u64);
        } else {
            self.ingest_flush_failures.inc();
        }
    }

    pub fn sync_duration(&self, step: SyncStep) -> &Histogram {
        &self.sync_duration[step.index()]
    }

    pub fn sync_successes(&self, step: SyncStep) -> u64 {
        self.sync_success[step.index()].get()
    }

    pub fn sync_failures(&self, step: SyncStep) -> u64 {
        self.sync_failure[step.index()].get()
    }

    pub fn job_index_jobs(&self, status: RunStatus) -> u64 {
        self.job_index_jobs[status.index()].get()
    }

    pub fn retention_duration(&self, status: RunStatus) -> &Histogram {
        &self.retention_duration[status.index()]
    }

    pub fn retention_runs(&self, status: RunStatus) -> u64 {
        self.retention_duration(status).count()
    }

    pub fn retention_deleted(&self) -> u64 {
        self.retention_deleted.get()
    }

    pub fn ingest_enqueued(&self) -> u64 {
        self.ingest_enqueued.get()
    }

    pub fn ingest_dropped(&self) -> u64 {
        self.ingest_dropped.get()
    }

    pub fn ingest_flushed_records(&self) -> u64 {
        self.ingest_flushed_records.get()
    }

    pub fn ingest_flush_failures(&self) -> u64 {
        self.ingest_flush_failures.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_are_cumulative() {
        let h = Histogram::default();
        h.observe(Duration::from_millis(3));
        h.observe(Duration::from_millis(40));
        h.observe(Duration::from_secs(500));

        let cumulative = h.cumulative();
        assert_eq!(cumulative[0], (0.005, 1));
        assert_eq!(cumulative[3], (0.05, 2));
        assert_eq!(cumulative.last().map(|(_, n)| *n), Some(2));
        assert_eq!(h.count(), 3);
        assert!((h.sum_seconds() - 500.043).abs() < 1e-9);
    }

    #[test]
    fn sync_outcomes_are_tracked_per_step() {
        let m = Metrics::new();
        m.observe_sync(SyncStep::Metadata, Duration::from_millis(10), true);
        m.observe_sync(SyncStep::JobIndex, Duration::from_millis(10), false);
        m.observe_sync(SyncStep::JobIndex, Duration::from_millis(10), false);

        assert_eq!(m.sync_successes(SyncStep::Metadata), 1);
        assert_eq!(m.sync_failures(SyncStep::JobIndex), 2);
        assert_eq!(m.sync_successes(SyncStep::Summary), 0);
        assert_eq!(m.sync_duration(SyncStep::JobIndex).count(), 2);
    }

    #[test]
    fn retention_runs_split_by_status() {
        let m = Metrics::new();
        m.observe_retention(Duration::from_millis(5), RunStatus::Success, 42);
        m.observe_retention(Duration::from_millis(5), RunStatus::Failure, 0);
        assert_eq!(m.retention_runs(RunStatus::Success), 1);
        assert_eq!(m.retention_runs(RunStatus::Failure), 1);
        assert_eq!(m.retention_deleted(), 42);
    }

    #[test]
    fn flush_outcomes() {
        let m = Metrics::new();
        m.record_flush(10, true);
        m.record_flush(4, false);
        assert_eq!(m.ingest_flushed_records(), 10);
        assert_eq!(m.ingest_flush_failures(), 1);
    }
}
