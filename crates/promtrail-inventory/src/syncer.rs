//! InventorySyncer — periodic refresh of catalog, usage summary and job
//! index.
//!
//! A cycle runs catalog sync (optional), then the usage-summary refresh,
//! then the job index. A failure in either of the first two ends the cycle;
//! job-index failures are logged and counted only. Shutdown is checked
//! between phases, never inside one.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use promtrail_metrics::{Metrics, SyncStep};
use promtrail_state::{Provider, TimeRange};

use crate::catalog::expand_metadata;
use crate::error::{SyncError, SyncResult};
use crate::job_index::{JobIndexOptions, sync_job_index};
use crate::source::MetricsSource;

/// First wait between leadership checks.
pub const LEADER_POLL_INITIAL: Duration = Duration::from_secs(1);
/// Cap on the wait between leadership checks.
pub const LEADER_POLL_MAX: Duration = Duration::from_secs(10);

/// Syncer tuning.
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    /// Lookback for usage counts and job label values.
    pub time_window: Duration,
    pub interval: Duration,
    /// Bound on a whole cycle.
    pub run_timeout: Duration,
    pub metadata_timeout: Duration,
    pub summary_timeout: Duration,
    pub job_label_timeout: Duration,
    pub per_job_timeout: Duration,
    pub job_index_workers: usize,
    pub metadata_sync_enabled: bool,
    /// Maximum number of metrics requested from the metadata endpoint.
    pub metadata_limit: Option<usize>,
    /// The job-index phase fails when `failures > successes * ratio`.
    pub job_failure_ratio: f64,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            time_window: Duration::from_secs(24 * 3600),
            interval: Duration::from_secs(600),
            run_timeout: Duration::from_secs(300),
            metadata_timeout: Duration::from_secs(60),
            summary_timeout: Duration::from_secs(120),
            job_label_timeout: Duration::from_secs(30),
            per_job_timeout: Duration::from_secs(30),
            job_index_workers: 4,
            metadata_sync_enabled: true,
            metadata_limit: None,
            job_failure_ratio: 0.5,
        }
    }
}

impl SyncerConfig {
    fn validate(&self) -> SyncResult<chrono::Duration> {
        for (name, value) in [
            ("interval", self.interval),
            ("run_timeout", self.run_timeout),
            ("metadata_timeout", self.metadata_timeout),
            ("summary_timeout", self.summary_timeout),
            ("job_label_timeout", self.job_label_timeout),
            ("per_job_timeout", self.per_job_timeout),
            ("time_window", self.time_window),
        ] {
            if value.is_zero() {
                return Err(SyncError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if self.job_index_workers == 0 {
            return Err(SyncError::InvalidConfig(
                "job_index_workers must be > 0".into(),
            ));
        }
        if !(self.job_failure_ratio >= 0.0) {
            return Err(SyncError::InvalidConfig(
                "job_failure_ratio must be >= 0".into(),
            ));
        }
        chrono::Duration::from_std(self.time_window)
            .map_err(|e| SyncError::InvalidConfig(format!("time_window: {e}")))
    }
}

/// Keeps the derived inventory views fresh.
pub struct InventorySyncer {
    provider: Arc<dyn Provider>,
    source: Arc<dyn MetricsSource>,
    config: SyncerConfig,
    window: chrono::Duration,
    metrics: Arc<Metrics>,
}

impl InventorySyncer {
    pub fn new(
        provider: Arc<dyn Provider>,
        source: Arc<dyn MetricsSource>,
        config: SyncerConfig,
        metrics: Arc<Metrics>,
    ) -> SyncResult<Self> {
        let window = config.validate()?;
        Ok(Self {
            provider,
            source,
            config,
            window,
            metrics,
        })
    }

    pub fn config(&self) -> &SyncerConfig {
        &self.config
    }

    /// Run the loop unconditionally.
    pub async fn run_leaderless(&self, shutdown: watch::Receiver<bool>) {
        self.run_loop(shutdown).await;
    }

    /// Wait until `is_leader` reports true, then run the loop.
    ///
    /// Leadership is polled with exponential backoff (1s doubling to 10s,
    /// plus jitter) and checked again whenever the loop returns.
    pub async fn run_with_leader<F>(&self, mut shutdown: watch::Receiver<bool>, is_leader: F)
    where
        F: Fn() -> bool,
    {
        let mut backoff = LEADER_POLL_INITIAL;
        loop {
            if *shutdown.borrow() {
                return;
            }
            if is_leader() {
                info!("leadership held, starting inventory sync loop");
                self.run_loop(shutdown.clone()).await;
                if shutdown.has_changed().is_err() {
                    debug!("shutdown channel closed, leaving leader loop");
                    return;
                }
                backoff = LEADER_POLL_INITIAL;
                continue;
            }

            let wait = backoff + jitter(backoff / 5);
            debug!(wait_ms = wait.as_millis() as u64, "not leader, waiting");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => return,
            }
            backoff = (backoff * 2).min(LEADER_POLL_MAX);
        }
    }

    /// Run one cycle immediately, then one per `interval + jitter` until
    /// shutdown. Jitter is uniform in `[0, interval/5)`.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }
        info!(
            interval_secs = self.config.interval.as_secs(),
            window_secs = self.config.time_window.as_secs(),
            workers = self.config.job_index_workers,
            "inventory syncer started"
        );

        let _ = self.run_once(&shutdown).await;
        loop {
            let wait = self.config.interval + jitter(self.config.interval / 5);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let _ = self.run_once(&shutdown).await;
                }
                _ = shutdown.changed() => {
                    info!("inventory syncer shutting down");
                    return;
                }
            }
        }
    }

    /// One full cycle, bounded by `run_timeout`. Outcomes are logged and
    /// recorded; the result is returned for callers that care.
    pub async fn run_once(&self, shutdown: &watch::Receiver<bool>) -> SyncResult<()> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.run_timeout, self.cycle(shutdown)).await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                step: "inventory sync",
                after: self.config.run_timeout,
            }),
        };
        let elapsed = started.elapsed();
        self.metrics
            .observe_sync(SyncStep::Run, elapsed, result.is_ok());

        match &result {
            Ok(()) => info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "inventory sync completed"
            ),
            Err(SyncError::Cancelled) => info!("inventory sync interrupted by shutdown"),
            Err(e) => warn!(error = %e, elapsed_ms = elapsed.as_millis() as u64, "inventory sync failed"),
        }
        result
    }

    async fn cycle(&self, shutdown: &watch::Receiver<bool>) -> SyncResult<()> {
        let now = Utc::now();
        let window = TimeRange::ending_at(now, self.window);

        if self.config.metadata_sync_enabled {
            self.step(SyncStep::Metadata, self.config.metadata_timeout, self.sync_catalog())
                .await?;
        }
        check_shutdown(shutdown)?;

        self.step(
            SyncStep::Summary,
            self.config.summary_timeout,
            async {
                self.provider.refresh_metrics_usage_summary(window).await?;
                debug!("usage summary refreshed");
                Ok(())
            },
        )
        .await?;
        check_shutdown(shutdown)?;

        let opts = JobIndexOptions {
            job_label_timeout: self.config.job_label_timeout,
            per_job_timeout: self.config.per_job_timeout,
            workers: self.config.job_index_workers,
            failure_ratio: self.config.job_failure_ratio,
        };
        let started = Instant::now();
        let outcome = sync_job_index(
            Arc::clone(&self.source),
            Arc::clone(&self.provider),
            &opts,
            window,
        )
        .await;
        self.metrics
            .observe_sync(SyncStep::JobIndex, started.elapsed(), outcome.is_ok());
        match outcome {
            Ok(report) => {
                self.metrics
                    .record_job_index_jobs(report.succeeded as u64, report.failed as u64);
            }
            Err(e) => {
                if let SyncError::PartialFailure {
                    succeeded, failed, ..
                } = e
                {
                    self.metrics
                        .record_job_index_jobs(succeeded as u64, failed as u64);
                }
                warn!(error = %e, "job index sync failed");
            }
        }
        Ok(())
    }

    async fn sync_catalog(&self) -> SyncResult<()> {
        let metadata = self
            .source
            .metadata(None, self.config.metadata_limit)
            .await?;
        let rows = expand_metadata(&metadata, Utc::now());
        if rows.is_empty() {
            debug!("upstream returned no metadata");
            return Ok(());
        }
        self.provider.upsert_metrics_catalog(&rows).await?;
        info!(
            metrics = metadata.len(),
            rows = rows.len(),
            "metric catalog synced"
        );
        Ok(())
    }

    /// Run one step under its own timeout and record its outcome.
    async fn step<F>(&self, step: SyncStep, limit: Duration, work: F) -> SyncResult<()>
    where
        F: Future<Output = SyncResult<()>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                step: step.as_str(),
                after: limit,
            }),
        };
        self.metrics
            .observe_sync(step, started.elapsed(), result.is_ok());
        if let Err(e) = &result {
            warn!(step = step.as_str(), error = %e, "sync step failed");
        }
        result
    }
}

fn check_shutdown(shutdown: &watch::Receiver<bool>) -> SyncResult<()> {
    if *shutdown.borrow() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

/// Uniform in `[0, max)`; zero when `max` is under a millisecond.
fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}
