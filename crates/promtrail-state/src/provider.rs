//! The storage abstraction shared by the ingester, syncer and retention
//! worker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StateResult;
use crate::types::{MetricCatalogItem, MetricJobIndexItem, QueryRecord, TimeRange};

/// Backing store for captured queries and derived inventories.
///
/// Implementations must tolerate concurrent calls from every background
/// task (and, in leaderless mode, from other replicas).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Persist one batch of query records.
    async fn insert(&self, records: &[QueryRecord]) -> StateResult<()>;

    /// Insert or refresh catalog rows. Existing rows keep their
    /// `first_seen_at`.
    async fn upsert_metrics_catalog(&self, items: &[MetricCatalogItem]) -> StateResult<()>;

    /// Recompute per-metric usage counts over `window`.
    async fn refresh_metrics_usage_summary(&self, window: TimeRange) -> StateResult<()>;

    /// Insert or refresh `(metric, job)` pairs.
    async fn upsert_metrics_job_index(&self, items: &[MetricJobIndexItem]) -> StateResult<()>;

    /// Delete every query record observed strictly before `cutoff`.
    /// Returns the number of deleted records.
    async fn delete_queries_before(&self, cutoff: DateTime<Utc>) -> StateResult<u64>;

    /// Session-scoped advisory locks, when the backend offers them.
    ///
    /// `None` means callers must run their protected work leaderless.
    fn advisory_locks(&self) -> Option<Arc<dyn AdvisoryLocks>> {
        None
    }

    /// Release backend resources.
    async fn close(&self) -> StateResult<()>;
}

/// A backend able to hand out session-scoped advisory locks.
#[async_trait]
pub trait AdvisoryLocks: Send + Sync {
    /// Open a fresh session. Locks taken through it live as long as it does.
    async fn open_session(&self) -> StateResult<Box<dyn LockSession>>;
}

/// One live session against an [`AdvisoryLocks`] backend.
///
/// Closing (or dropping) the session releases every lock it holds.
#[async_trait]
pub trait LockSession: Send {
    /// Non-blocking attempt to take `key`. Returns whether it is now held.
    async fn try_lock(&mut self, key: i64) -> StateResult<bool>;

    /// Close the session, releasing its locks.
    async fn close(self: Box<Self>) -> StateResult<()>;
}
