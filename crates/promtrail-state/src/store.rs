//! StateStore — redb-backed [`Provider`] for promtrail.
//!
//! Provides typed operations over query records, the metric catalog, the
//! job index, usage summaries and the usage facts that feed them. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).
//!
//! redb holds an exclusive lock on its file, so a store is never shared
//! between processes and offers no advisory locks: background jobs over a
//! `StateStore` always run leaderless.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::provider::Provider;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Tie-breaker for query keys observed in the same microsecond.
    seq: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        // Seeding from the clock keeps keys unique across reopenings.
        let seed = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
        Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(seed)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(QUERIES).map_err(map_err!(Table))?;
        txn.open_table(METRICS_CATALOG).map_err(map_err!(Table))?;
        txn.open_table(METRICS_JOB_INDEX).map_err(map_err!(Table))?;
        txn.open_table(METRICS_USAGE_SUMMARY).map_err(map_err!(Table))?;
        txn.open_table(RULE_USAGE).map_err(map_err!(Table))?;
        txn.open_table(DASHBOARD_USAGE).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn ensure_open(&self) -> StateResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StateError::Closed);
        }
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put_many<T: Serialize>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        rows: impl IntoIterator<Item = (String, T)>,
    ) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            for (key, row) in rows {
                let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                count += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    fn get_one<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let row: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn list_all<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }

    // ── Query records ──────────────────────────────────────────────

    fn query_key(&self, ts: DateTime<Utc>) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}{:020}", query_key_prefix(ts), seq)
    }

    /// Persist a batch of query records in one transaction.
    pub fn insert_queries(&self, records: &[QueryRecord]) -> StateResult<usize> {
        self.ensure_open()?;
        let rows: Vec<(String, &QueryRecord)> = records
            .iter()
            .map(|r| (self.query_key(r.ts), r))
            .collect();
        let count = self.put_many(QUERIES, rows)?;
        debug!(count, "query records stored");
        Ok(count)
    }

    /// List all query records in observation order.
    pub fn list_queries(&self) -> StateResult<Vec<QueryRecord>> {
        self.list_all(QUERIES)
    }

    /// List query records observed within `window`.
    pub fn list_queries_in(&self, window: TimeRange) -> StateResult<Vec<QueryRecord>> {
        let lower = query_key_prefix(window.from);
        let upper = query_key_prefix(window.to);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUERIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range::<&str>(lower.as_str()..upper.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: QueryRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Number of stored query records.
    pub fn count_queries(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUERIES).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    /// Delete all query records observed strictly before `cutoff`.
    pub fn delete_queries_older_than(&self, cutoff: DateTime<Utc>) -> StateResult<u64> {
        self.ensure_open()?;
        let upper = query_key_prefix(cutoff);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(QUERIES).map_err(map_err!(Table))?;
            let keys: Vec<String> = table
                .range::<&str>(..upper.as_str())
                .map_err(map_err!(Read))?
                .map(|entry| entry.map(|(key, _)| key.value().to_string()))
                .collect::<Result<_, _>>()
                .map_err(map_err!(Read))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            count = keys.len() as u64;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%cutoff, count, "query records deleted");
        Ok(count)
    }

    // ── Catalog ────────────────────────────────────────────────────

    /// Insert or refresh catalog rows, preserving `first_seen_at`.
    pub fn upsert_catalog(&self, items: &[MetricCatalogItem]) -> StateResult<()> {
        self.ensure_open()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(METRICS_CATALOG).map_err(map_err!(Table))?;
            for item in items {
                let mut row = item.clone();
                let existing = table
                    .get(item.name.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| serde_json::from_slice::<MetricCatalogItem>(guard.value()))
                    .transpose()
                    .map_err(map_err!(Deserialize))?;
                if let Some(existing) = existing {
                    row.first_seen_at = existing.first_seen_at.min(row.first_seen_at);
                }
                let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
                table
                    .insert(item.name.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = items.len(), "catalog rows upserted");
        Ok(())
    }

    /// Get a catalog row by metric name.
    pub fn get_catalog_item(&self, name: &str) -> StateResult<Option<MetricCatalogItem>> {
        self.get_one(METRICS_CATALOG, name)
    }

    /// List the whole catalog, ordered by metric name.
    pub fn list_catalog(&self) -> StateResult<Vec<MetricCatalogItem>> {
        self.list_all(METRICS_CATALOG)
    }

    // ── Job index ──────────────────────────────────────────────────

    /// Insert or refresh `(metric, job)` pairs.
    pub fn upsert_job_index(&self, items: &[MetricJobIndexItem]) -> StateResult<()> {
        self.ensure_open()?;
        let count = self.put_many(METRICS_JOB_INDEX, items.iter().map(|i| (i.table_key(), i)))?;
        debug!(count, "job index rows upserted");
        Ok(())
    }

    /// List every job-index row.
    pub fn list_job_index(&self) -> StateResult<Vec<MetricJobIndexItem>> {
        self.list_all(METRICS_JOB_INDEX)
    }

    /// Metric names produced by `job`, sorted.
    pub fn list_metrics_for_job(&self, job: &str) -> StateResult<Vec<String>> {
        let prefix = format!("{job}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS_JOB_INDEX).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let item: MetricJobIndexItem =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                // A job named "a" must not pick up rows of job "a/b".
                if item.job == job {
                    results.push(item.name);
                }
            }
        }
        Ok(results)
    }

    // ── Usage facts ────────────────────────────────────────────────

    /// Register a rule referencing a metric.
    pub fn put_rule_usage(&self, usage: &RuleUsage) -> StateResult<()> {
        self.ensure_open()?;
        self.put_many(RULE_USAGE, [(usage.table_key(), usage)])?;
        Ok(())
    }

    /// Register a dashboard referencing a metric.
    pub fn put_dashboard_usage(&self, usage: &DashboardUsage) -> StateResult<()> {
        self.ensure_open()?;
        self.put_many(DASHBOARD_USAGE, [(usage.table_key(), usage)])?;
        Ok(())
    }

    // ── Usage summary ──────────────────────────────────────────────

    /// Recompute the usage summary table for `window`.
    ///
    /// Every metric known to the catalog, a rule, a dashboard or a query in
    /// the window gets one row; rows from previous refreshes are replaced.
    pub fn refresh_usage_summary(&self, window: TimeRange) -> StateResult<usize> {
        self.ensure_open()?;
        let catalog: Vec<MetricCatalogItem> = self.list_all(METRICS_CATALOG)?;
        let rules: Vec<RuleUsage> = self.list_all(RULE_USAGE)?;
        let dashboards: Vec<DashboardUsage> = self.list_all(DASHBOARD_USAGE)?;
        let queries = self.list_queries_in(window)?;

        let mut names: BTreeSet<String> = catalog.into_iter().map(|c| c.name).collect();
        names.extend(rules.iter().map(|r| r.metric.clone()));
        names.extend(dashboards.iter().map(|d| d.metric.clone()));

        let mut query_counts: BTreeMap<String, u64> = BTreeMap::new();
        for record in &queries {
            // A query naming the same metric twice still counts once.
            let referenced: BTreeSet<&String> = record
                .label_matchers
                .iter()
                .filter_map(|m| m.get(METRIC_NAME_LABEL))
                .collect();
            for name in referenced {
                *query_counts.entry(name.clone()).or_default() += 1;
            }
        }
        names.extend(query_counts.keys().cloned());

        let refreshed_at = Utc::now();
        let summaries: Vec<MetricUsageSummary> = names
            .into_iter()
            .map(|name| {
                let in_window = |metric: &str, seen_at| metric == name && window.contains(seen_at);
                MetricUsageSummary {
                    alert_count: rules
                        .iter()
                        .filter(|r| r.kind == RuleKind::Alert && in_window(&r.metric, r.seen_at))
                        .count() as u64,
                    record_count: rules
                        .iter()
                        .filter(|r| r.kind == RuleKind::Record && in_window(&r.metric, r.seen_at))
                        .count() as u64,
                    dashboard_count: dashboards
                        .iter()
                        .filter(|d| in_window(&d.metric, d.seen_at))
                        .count() as u64,
                    query_count: query_counts.get(&name).copied().unwrap_or(0),
                    window,
                    refreshed_at,
                    name,
                }
            })
            .collect();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn
                .open_table(METRICS_USAGE_SUMMARY)
                .map_err(map_err!(Table))?;
            let stale: Vec<String> = table
                .iter()
                .map_err(map_err!(Read))?
                .map(|entry| entry.map(|(key, _)| key.value().to_string()))
                .collect::<Result<_, _>>()
                .map_err(map_err!(Read))?;
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for summary in &summaries {
                let value = serde_json::to_vec(summary).map_err(map_err!(Serialize))?;
                table
                    .insert(summary.name.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(metrics = summaries.len(), "usage summary refreshed");
        Ok(summaries.len())
    }

    /// Get the usage summary row for a metric.
    pub fn get_usage_summary(&self, name: &str) -> StateResult<Option<MetricUsageSummary>> {
        self.get_one(METRICS_USAGE_SUMMARY, name)
    }

    /// List all usage summary rows, ordered by metric name.
    pub fn list_usage_summaries(&self) -> StateResult<Vec<MetricUsageSummary>> {
        self.list_all(METRICS_USAGE_SUMMARY)
    }
}

/// Key prefix ordering query records by observation time.
///
/// Pre-epoch timestamps clamp to zero; they sort first and are the first
/// to be deleted.
fn query_key_prefix(ts: DateTime<Utc>) -> String {
    format!("{:020}:", ts.timestamp_micros().max(0))
}

impl StateStore {
    /// Run a redb transaction on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> StateResult<T>
    where
        T: Send + 'static,
        F: FnOnce(StateStore) -> StateResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(store))
            .await
            .map_err(map_err!(Task))?
    }
}

#[async_trait]
impl Provider for StateStore {
    async fn insert(&self, records: &[QueryRecord]) -> StateResult<()> {
        let records = records.to_vec();
        self.blocking(move |store| store.insert_queries(&records).map(|_| ()))
            .await
    }

    async fn upsert_metrics_catalog(&self, items: &[MetricCatalogItem]) -> StateResult<()> {
        let items = items.to_vec();
        self.blocking(move |store| store.upsert_catalog(&items)).await
    }

    async fn refresh_metrics_usage_summary(&self, window: TimeRange) -> StateResult<()> {
        self.blocking(move |store| store.refresh_usage_summary(window).map(|_| ()))
            .await
    }

    async fn upsert_metrics_job_index(&self, items: &[MetricJobIndexItem]) -> StateResult<()> {
        let items = items.to_vec();
        self.blocking(move |store| store.upsert_job_index(&items)).await
    }

    async fn delete_queries_before(&self, cutoff: DateTime<Utc>) -> StateResult<u64> {
        self.blocking(move |store| store.delete_queries_older_than(cutoff))
            .await
    }

    async fn close(&self) -> StateResult<()> {
        self.closed.store(true, Ordering::Release);
        debug!("state store closed");
        Ok(())
    }
}
