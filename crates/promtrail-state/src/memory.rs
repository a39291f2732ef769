//! MemoryProvider — a call-recording [`Provider`] for tests.
//!
//! Every call is recorded so tests can assert on batch boundaries and
//! arguments; individual operations can be made to fail or to stall.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StateError, StateResult};
use crate::provider::{AdvisoryLocks, Provider};
use crate::types::*;

#[derive(Default)]
struct Calls {
    inserts: Vec<Vec<QueryRecord>>,
    catalog: Vec<Vec<MetricCatalogItem>>,
    summaries: Vec<TimeRange>,
    job_index: Vec<Vec<MetricJobIndexItem>>,
    deletes: Vec<DateTime<Utc>>,
}

/// In-memory provider that records every call.
#[derive(Default)]
pub struct MemoryProvider {
    calls: Mutex<Calls>,
    fail_insert: AtomicBool,
    fail_catalog: AtomicBool,
    fail_summary: AtomicBool,
    fail_delete: AtomicBool,
    failing_jobs: Mutex<HashSet<String>>,
    insert_delay: Mutex<Option<Duration>>,
    delete_result: Mutex<u64>,
    locks: Option<Arc<dyn AdvisoryLocks>>,
    closed: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer advisory locks from the given backend.
    pub fn with_advisory_locks(mut self, locks: Arc<dyn AdvisoryLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_catalog(&self, fail: bool) {
        self.fail_catalog.store(fail, Ordering::SeqCst);
    }

    pub fn fail_summary(&self, fail: bool) {
        self.fail_summary.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Make job-index upserts containing `job` fail.
    pub fn fail_job_index_for(&self, job: &str) {
        lock(&self.failing_jobs).insert(job.to_string());
    }

    /// Stall every insert for `delay` before recording it.
    pub fn set_insert_delay(&self, delay: Duration) {
        *lock(&self.insert_delay) = Some(delay);
    }

    /// Value returned by `delete_queries_before`.
    pub fn set_delete_result(&self, deleted: u64) {
        *lock(&self.delete_result) = deleted;
    }

    /// Batches passed to `insert`, in call order.
    pub fn inserted_batches(&self) -> Vec<Vec<QueryRecord>> {
        lock(&self.calls).inserts.clone()
    }

    pub fn catalog_upserts(&self) -> Vec<Vec<MetricCatalogItem>> {
        lock(&self.calls).catalog.clone()
    }

    pub fn summary_refreshes(&self) -> Vec<TimeRange> {
        lock(&self.calls).summaries.clone()
    }

    pub fn job_index_upserts(&self) -> Vec<Vec<MetricJobIndexItem>> {
        lock(&self.calls).job_index.clone()
    }

    pub fn delete_cutoffs(&self) -> Vec<DateTime<Utc>> {
        lock(&self.calls).deletes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn insert(&self, records: &[QueryRecord]) -> StateResult<()> {
        let delay = *lock(&self.insert_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.calls).inserts.push(records.to_vec());
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(StateError::Write("injected insert failure".to_string()));
        }
        Ok(())
    }

    async fn upsert_metrics_catalog(&self, items: &[MetricCatalogItem]) -> StateResult<()> {
        if self.fail_catalog.load(Ordering::SeqCst) {
            return Err(StateError::Write("injected catalog failure".to_string()));
        }
        lock(&self.calls).catalog.push(items.to_vec());
        Ok(())
    }

    async fn refresh_metrics_usage_summary(&self, window: TimeRange) -> StateResult<()> {
        if self.fail_summary.load(Ordering::SeqCst) {
            return Err(StateError::Write("injected summary failure".to_string()));
        }
        lock(&self.calls).summaries.push(window);
        Ok(())
    }

    async fn upsert_metrics_job_index(&self, items: &[MetricJobIndexItem]) -> StateResult<()> {
        let failing = lock(&self.failing_jobs).clone();
        if items.iter().any(|i| failing.contains(&i.job)) {
            return Err(StateError::Write("injected job index failure".to_string()));
        }
        lock(&self.calls).job_index.push(items.to_vec());
        Ok(())
    }

    async fn delete_queries_before(&self, cutoff: DateTime<Utc>) -> StateResult<u64> {
        lock(&self.calls).deletes.push(cutoff);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StateError::Write("injected delete failure".to_string()));
        }
        Ok(*lock(&self.delete_result))
    }

    fn advisory_locks(&self) -> Option<Arc<dyn AdvisoryLocks>> {
        self.locks.clone()
    }

    async fn close(&self) -> StateResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
