//! Domain types persisted through a [`Provider`](crate::Provider).
//!
//! Query records are write-once; catalog, job-index and usage-summary rows
//! are derived views refreshed by the inventory syncer. All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label name carrying the metric name in a selector.
pub const METRIC_NAME_LABEL: &str = "__name__";

// ── Query records ─────────────────────────────────────────────────

/// Whether a captured query hit the instant or the range endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    #[default]
    Instant,
    Range,
}

/// One observed query, captured by the ingest surface.
///
/// Created once per query, never updated in place; deleted en masse by
/// retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRecord {
    /// When the query was observed.
    pub ts: DateTime<Utc>,
    /// Raw query text as sent by the client.
    pub query: String,
    /// Evaluation time parameter (`time=` for instant queries).
    #[serde(default)]
    pub time_param: Option<DateTime<Utc>>,
    /// Upstream execution time in milliseconds.
    pub duration_ms: u64,
    /// HTTP status code returned to the client.
    pub status_code: u16,
    /// Response body size in bytes.
    pub body_size: u64,
    /// Fingerprint hash; empty when the query could not be parsed.
    #[serde(default)]
    pub fingerprint: String,
    /// One map of label name → value per selector in the query.
    #[serde(default)]
    pub label_matchers: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub query_type: QueryType,
    /// Range query resolution in seconds.
    #[serde(default)]
    pub step_secs: f64,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Samples the query had to load in total.
    #[serde(default)]
    pub total_queryable_samples: u64,
    /// Peak number of samples held in memory.
    #[serde(default)]
    pub peak_samples: u64,
}

impl QueryRecord {
    /// Whether any selector of this query references `metric` by name.
    pub fn references_metric(&self, metric: &str) -> bool {
        self.label_matchers
            .iter()
            .any(|m| m.get(METRIC_NAME_LABEL).is_some_and(|name| name == metric))
    }
}

// ── Inventory ─────────────────────────────────────────────────────

/// One row of the metric catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricCatalogItem {
    pub name: String,
    /// Prometheus metadata type, or a synthetic sub-series type such as
    /// `histogram_bucket`.
    pub metric_type: String,
    pub help: String,
    pub unit: String,
    /// Preserved across upserts once the row exists.
    pub first_seen_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

/// A `(metric, job)` pair observed in the upstream source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricJobIndexItem {
    pub name: String,
    pub job: String,
    pub updated_at: DateTime<Utc>,
}

impl MetricJobIndexItem {
    /// Build the composite key for the job-index table.
    ///
    /// Metric names cannot contain `/`, so the last separator always splits
    /// the pair unambiguously.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.job, self.name)
    }
}

/// Half-open window `[from, to)` used for usage and job-label lookups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Window of length `window` ending at `now`.
    pub fn ending_at(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            from: now - window,
            to: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts < self.to
    }
}

/// Aggregated usage counts for one metric over a window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricUsageSummary {
    pub name: String,
    pub alert_count: u64,
    pub record_count: u64,
    pub dashboard_count: u64,
    pub query_count: u64,
    pub window: TimeRange,
    pub refreshed_at: DateTime<Utc>,
}

// ── Usage facts ───────────────────────────────────────────────────

/// Kind of rule referencing a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Alert,
    Record,
}

/// A rule (alerting or recording) that references a metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleUsage {
    pub metric: String,
    pub kind: RuleKind,
    pub group: String,
    pub rule: String,
    pub seen_at: DateTime<Utc>,
}

impl RuleUsage {
    /// Build the composite key for the rule-usage table.
    pub fn table_key(&self) -> String {
        format!("{}/{}/{}", self.metric, self.group, self.rule)
    }
}

/// A dashboard panel that references a metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardUsage {
    pub metric: String,
    pub dashboard_id: String,
    pub title: String,
    pub seen_at: DateTime<Utc>,
}

impl DashboardUsage {
    /// Build the composite key for the dashboard-usage table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.metric, self.dashboard_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn references_metric_checks_name_matchers_only() {
        let mut selector = BTreeMap::new();
        selector.insert(METRIC_NAME_LABEL.to_string(), "up".to_string());
        selector.insert("job".to_string(), "node".to_string());

        let record = QueryRecord {
            ts: Utc::now(),
            query: "up{job=\"node\"}".to_string(),
            time_param: None,
            duration_ms: 3,
            status_code: 200,
            body_size: 120,
            fingerprint: String::new(),
            label_matchers: vec![selector],
            query_type: QueryType::Instant,
            step_secs: 0.0,
            start: None,
            end: None,
            total_queryable_samples: 0,
            peak_samples: 0,
        };

        assert!(record.references_metric("up"));
        assert!(!record.references_metric("node"));
    }

    #[test]
    fn time_range_is_half_open() {
        let to = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let range = TimeRange::ending_at(to, chrono::Duration::hours(1));

        assert!(range.contains(range.from));
        assert!(range.contains(to - chrono::Duration::seconds(1)));
        assert!(!range.contains(to));
    }

    #[test]
    fn job_index_key_keeps_slashes_in_job() {
        let item = MetricJobIndexItem {
            name: "up".to_string(),
            job: "kube/node".to_string(),
            updated_at: Utc::now(),
        };
        assert_eq!(item.table_key(), "kube/node/up");
    }
}
