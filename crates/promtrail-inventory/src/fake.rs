//! Scriptable in-memory [`MetricsSource`] for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{UpstreamError, UpstreamResult};
use crate::source::{MetadataInfo, MetricsSource, QueryResult, Sample, SamplePair};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub(crate) struct FakeSource {
    metadata: Mutex<BTreeMap<String, Vec<MetadataInfo>>>,
    metadata_error: Mutex<Option<UpstreamError>>,
    jobs: Mutex<Vec<String>>,
    jobs_error: Mutex<Option<UpstreamError>>,
    failing_jobs: Mutex<HashSet<String>>,
    hanging_jobs: Mutex<HashSet<String>>,
    job_results: Mutex<HashMap<String, QueryResult>>,
    query_delay: Mutex<Option<Duration>>,
    queries: Mutex<Vec<(String, DateTime<Utc>)>>,
    label_windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    metadata_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(self, name: &str, metric_type: &str) -> Self {
        lock(&self.metadata).insert(
            name.to_string(),
            vec![MetadataInfo {
                metric_type: metric_type.to_string(),
                help: format!("{name} help"),
                unit: String::new(),
            }],
        );
        self
    }

    pub fn with_jobs(self, jobs: &[&str]) -> Self {
        *lock(&self.jobs) = jobs.iter().map(|j| j.to_string()).collect();
        self
    }

    pub fn fail_metadata(&self, error: UpstreamError) {
        *lock(&self.metadata_error) = Some(error);
    }

    pub fn fail_label_values(&self, error: UpstreamError) {
        *lock(&self.jobs_error) = Some(error);
    }

    pub fn fail_job(&self, job: &str) {
        lock(&self.failing_jobs).insert(job.to_string());
    }

    pub fn hang_job(&self, job: &str) {
        lock(&self.hanging_jobs).insert(job.to_string());
    }

    pub fn set_job_result(&self, job: &str, result: QueryResult) {
        lock(&self.job_results).insert(job.to_string(), result);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *lock(&self.query_delay) = Some(delay);
    }

    pub fn queries(&self) -> Vec<(String, DateTime<Utc>)> {
        lock(&self.queries).clone()
    }

    pub fn label_windows(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        lock(&self.label_windows).clone()
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, job: &str) -> UpstreamResult<QueryResult> {
        let delay = *lock(&self.query_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.hanging_jobs).contains(job) {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
        }
        if lock(&self.failing_jobs).contains(job) {
            return Err(UpstreamError::Status {
                status: 503,
                body: format!("job {job} unavailable"),
            });
        }
        if let Some(result) = lock(&self.job_results).get(job) {
            return Ok(result.clone());
        }
        let sample = |name: String| Sample {
            metric: BTreeMap::from([("__name__".to_string(), name)]),
            value: Some(SamplePair(0.0, "1".to_string())),
        };
        Ok(QueryResult::Vector(vec![
            sample(format!("{job}_requests_total")),
            sample(format!("{job}_up")),
        ]))
    }
}

/// Pull the job name out of `group({job="<job>", ...}) by (__name__)`.
fn job_of(expr: &str) -> String {
    expr.split_once("job=\"")
        .and_then(|(_, rest)| rest.split_once('"'))
        .map(|(job, _)| job.to_string())
        .unwrap_or_default()
}

#[async_trait]
impl MetricsSource for FakeSource {
    async fn metadata(
        &self,
        _metric: Option<&str>,
        limit: Option<usize>,
    ) -> UpstreamResult<BTreeMap<String, Vec<MetadataInfo>>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = lock(&self.metadata_error).clone() {
            return Err(e);
        }
        let metadata = lock(&self.metadata).clone();
        Ok(match limit {
            Some(limit) => metadata.into_iter().take(limit).collect(),
            None => metadata,
        })
    }

    async fn label_values(
        &self,
        _label: &str,
        _matchers: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> UpstreamResult<Vec<String>> {
        lock(&self.label_windows).push((from, to));
        if let Some(e) = lock(&self.jobs_error).clone() {
            return Err(e);
        }
        Ok(lock(&self.jobs).clone())
    }

    async fn query(&self, expr: &str, at: DateTime<Utc>) -> UpstreamResult<QueryResult> {
        lock(&self.queries).push((expr.to_string(), at));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.answer(&job_of(expr)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
