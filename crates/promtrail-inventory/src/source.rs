//! The upstream metrics source the syncer reads from.
//!
//! Response types mirror the Prometheus HTTP API so [`PrometheusClient`]
//! can deserialize straight into them.
//!
//! [`PrometheusClient`]: crate::PrometheusClient

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::UpstreamResult;

/// One metadata entry for a metric name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetadataInfo {
    #[serde(rename = "type")]
    pub metric_type: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub unit: String,
}

/// `[<unix seconds>, "<value>"]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SamplePair(pub f64, pub String);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    /// Absent for native-histogram samples.
    #[serde(default)]
    pub value: Option<SamplePair>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<SamplePair>,
}

/// Result of an instant query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryResult {
    Vector(Vec<Sample>),
    Matrix(Vec<Series>),
    Scalar(SamplePair),
    String(SamplePair),
}

impl QueryResult {
    /// Distinct `__name__` values of a vector or matrix result, sorted.
    /// `None` for result types that carry no series.
    pub fn metric_names(&self) -> Option<Vec<String>> {
        let labels: Vec<&BTreeMap<String, String>> = match self {
            QueryResult::Vector(samples) => samples.iter().map(|s| &s.metric).collect(),
            QueryResult::Matrix(series) => series.iter().map(|s| &s.metric).collect(),
            QueryResult::Scalar(_) | QueryResult::String(_) => return None,
        };
        let names: BTreeSet<String> = labels
            .into_iter()
            .filter_map(|m| m.get("__name__").cloned())
            .collect();
        Some(names.into_iter().collect())
    }
}

/// Read access to an upstream metrics API.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Metadata per metric name, optionally restricted to one metric and
    /// limited in the number of metrics returned.
    async fn metadata(
        &self,
        metric: Option<&str>,
        limit: Option<usize>,
    ) -> UpstreamResult<BTreeMap<String, Vec<MetadataInfo>>>;

    /// Distinct values of `label` over `[from, to]`, optionally restricted
    /// by series selectors.
    async fn label_values(
        &self,
        label: &str,
        matchers: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> UpstreamResult<Vec<String>>;

    /// Evaluate `expr` at `at`.
    async fn query(&self, expr: &str, at: DateTime<Utc>) -> UpstreamResult<QueryResult>;
}
