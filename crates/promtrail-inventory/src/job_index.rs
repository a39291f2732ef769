//! Job-index phase: which metric names each scrape job produces.
//!
//! Jobs are fanned out to a fixed pool of workers sharing one job channel.
//! Each worker writes its own job's `(metric, job)` rows as soon as the
//! query returns, so one job's failure never affects another's rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use promtrail_state::{MetricJobIndexItem, Provider, TimeRange};

use crate::error::{SyncError, SyncResult, UpstreamError};
use crate::source::MetricsSource;

/// Label whose values name the scrape jobs.
pub const JOB_LABEL: &str = "job";

/// Tuning for one job-index pass.
#[derive(Debug, Clone)]
pub struct JobIndexOptions {
    pub job_label_timeout: Duration,
    pub per_job_timeout: Duration,
    pub workers: usize,
    /// The pass fails when `failed > succeeded * failure_ratio`.
    pub failure_ratio: f64,
}

/// Outcome of a job-index pass that did not trip the failure threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobIndexReport {
    pub jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rows written across all jobs.
    pub rows: usize,
}

/// PromQL listing every metric name of `job`.
pub fn job_metrics_query(job: &str) -> String {
    let escaped = job.replace('\\', "\\\\").replace('"', "\\\"");
    format!("group({{{JOB_LABEL}=\"{escaped}\", __name__=~\".+\"}}) by (__name__)")
}

/// Whether `failed` outweighs `succeeded` under `ratio`.
pub fn exceeds_failure_threshold(failed: usize, succeeded: usize, ratio: f64) -> bool {
    failed as f64 > succeeded as f64 * ratio
}

/// Refresh the job index for every job seen in `window`.
pub async fn sync_job_index(
    source: Arc<dyn MetricsSource>,
    provider: Arc<dyn Provider>,
    opts: &JobIndexOptions,
    window: TimeRange,
) -> SyncResult<JobIndexReport> {
    let jobs = list_jobs(source.as_ref(), opts.job_label_timeout, window).await?;
    if jobs.is_empty() {
        debug!("no jobs in window, job index unchanged");
        return Ok(JobIndexReport::default());
    }

    let total = jobs.len();
    let (job_tx, job_rx) = mpsc::channel::<String>(total);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<(String, SyncResult<usize>)>(total);

    // Dropping the set aborts workers still running when the pass is cancelled.
    let mut pool = JoinSet::new();
    let workers = opts.workers.clamp(1, total);
    for worker in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let source = Arc::clone(&source);
        let provider = Arc::clone(&provider);
        let per_job_timeout = opts.per_job_timeout;
        let at = window.to;
        pool.spawn(async move {
            loop {
                let next = job_rx.lock().await.recv().await;
                let Some(job) = next else {
                    break;
                };
                let outcome =
                    index_job(source.as_ref(), provider.as_ref(), &job, at, per_job_timeout).await;
                if result_tx.send((job, outcome)).await.is_err() {
                    break;
                }
            }
            debug!(worker, "job index worker finished");
        });
    }
    drop(result_tx);

    for job in jobs {
        // Capacity equals the job count, so this never waits.
        if job_tx.send(job).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    let mut report = JobIndexReport {
        jobs: total,
        ..Default::default()
    };
    while let Some((job, outcome)) = result_rx.recv().await {
        match outcome {
            Ok(rows) => {
                report.succeeded += 1;
                report.rows += rows;
            }
            Err(e) => {
                warn!(%job, error = %e, "job index update failed");
            }
        }
    }
    while pool.join_next().await.is_some() {}
    // Jobs whose worker died without reporting count as failures.
    report.failed = total - report.succeeded;

    if exceeds_failure_threshold(report.failed, report.succeeded, opts.failure_ratio) {
        return Err(SyncError::PartialFailure {
            jobs: report.jobs,
            succeeded: report.succeeded,
            failed: report.failed,
        });
    }
    info!(
        jobs = report.jobs,
        failed = report.failed,
        rows = report.rows,
        "job index synced"
    );
    Ok(report)
}

async fn list_jobs(
    source: &dyn MetricsSource,
    limit: Duration,
    window: TimeRange,
) -> SyncResult<Vec<String>> {
    let fetched = tokio::time::timeout(
        limit,
        source.label_values(JOB_LABEL, &[], window.from, window.to),
    )
    .await;
    let mut jobs = match fetched {
        Ok(Ok(jobs)) => jobs,
        Ok(Err(UpstreamError::NotFound(detail))) => {
            debug!(%detail, "job label values unsupported upstream");
            return Ok(Vec::new());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(SyncError::Timeout {
                step: "job label lookup",
                after: limit,
            });
        }
    };
    jobs.retain(|j| !j.is_empty());
    jobs.sort();
    jobs.dedup();
    Ok(jobs)
}

/// Query one job's metric names and upsert them. Returns rows written.
async fn index_job(
    source: &dyn MetricsSource,
    provider: &dyn Provider,
    job: &str,
    at: DateTime<Utc>,
    limit: Duration,
) -> SyncResult<usize> {
    let work = async {
        let result = source.query(&job_metrics_query(job), at).await?;
        let Some(names) = result.metric_names() else {
            debug!(%job, "job index query returned a non-series result, skipping");
            return Ok(0);
        };
        if names.is_empty() {
            return Ok(0);
        }
        let updated_at = Utc::now();
        let items: Vec<MetricJobIndexItem> = names
            .into_iter()
            .map(|name| MetricJobIndexItem {
                name,
                job: job.to_string(),
                updated_at,
            })
            .collect();
        provider.upsert_metrics_job_index(&items).await?;
        Ok(items.len())
    };
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout {
            step: "job index query",
            after: limit,
        }),
    }
}
