//! RetentionWorker — periodic deletion of query records past `max_age`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use promtrail_metrics::{Metrics, RunStatus};
use promtrail_state::{Provider, StateError};

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("invalid retention config: {0}")]
    InvalidConfig(String),

    #[error("delete failed: {0}")]
    Persist(#[from] StateError),

    #[error("delete timed out after {0:?}")]
    Timeout(Duration),
}

pub type RetentionResult<T> = Result<T, RetentionError>;

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub interval: Duration,
    /// Upper bound on one delete call.
    pub run_timeout: Duration,
    /// Records observed before `now - max_age` are deleted.
    pub max_age: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            run_timeout: Duration::from_secs(300),
            max_age: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

impl RetentionConfig {
    fn validate(&self) -> RetentionResult<chrono::Duration> {
        if self.interval.is_zero() {
            return Err(RetentionError::InvalidConfig("interval must be > 0".into()));
        }
        if self.run_timeout.is_zero() {
            return Err(RetentionError::InvalidConfig(
                "run_timeout must be > 0".into(),
            ));
        }
        if self.max_age.is_zero() {
            return Err(RetentionError::InvalidConfig("max_age must be > 0".into()));
        }
        chrono::Duration::from_std(self.max_age)
            .map_err(|e| RetentionError::InvalidConfig(format!("max_age: {e}")))
    }
}

/// Outcome of one retention pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionRun {
    pub cutoff: DateTime<Utc>,
    pub deleted: u64,
}

pub struct RetentionWorker {
    provider: Arc<dyn Provider>,
    config: RetentionConfig,
    max_age: chrono::Duration,
    metrics: Arc<Metrics>,
}

impl RetentionWorker {
    pub fn new(
        provider: Arc<dyn Provider>,
        config: RetentionConfig,
        metrics: Arc<Metrics>,
    ) -> RetentionResult<Self> {
        let max_age = config.validate()?;
        Ok(Self {
            provider,
            config,
            max_age,
            metrics,
        })
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Run once immediately, then every `interval + jitter` until shutdown.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_age_secs = self.config.max_age.as_secs(),
            "retention worker started"
        );

        let _ = self.run_once().await;
        loop {
            let wait = self.config.interval + jitter(self.config.interval / 5);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let _ = self.run_once().await;
                }
                _ = shutdown.changed() => {
                    info!("retention worker shutting down");
                    return;
                }
            }
        }
    }

    /// Delete everything older than `now - max_age`.
    ///
    /// Returns `None` when retention is disabled by a zero `max_age`.
    pub async fn run_once(&self) -> RetentionResult<Option<RetentionRun>> {
        if self.max_age.is_zero() {
            debug!("max_age is zero, skipping retention");
            return Ok(None);
        }

        let cutoff = Utc::now() - self.max_age;
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.config.run_timeout,
            self.provider.delete_queries_before(cutoff),
        )
        .await
        {
            Ok(Ok(deleted)) => Ok(deleted),
            Ok(Err(e)) => Err(RetentionError::from(e)),
            Err(_) => Err(RetentionError::Timeout(self.config.run_timeout)),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(deleted) => {
                self.metrics
                    .observe_retention(elapsed, RunStatus::Success, deleted);
                info!(
                    %cutoff,
                    deleted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "retention pass completed"
                );
                Ok(Some(RetentionRun { cutoff, deleted }))
            }
            Err(e) => {
                self.metrics.observe_retention(elapsed, RunStatus::Failure, 0);
                warn!(%cutoff, error = %e, "retention pass failed");
                Err(e)
            }
        }
    }
}

/// Uniform in `[0, base)`, with `base` floored to one millisecond.
fn jitter(base: Duration) -> Duration {
    let max_ms = (base.as_millis() as u64).max(1);
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use promtrail_state::MemoryProvider;

    fn config() -> RetentionConfig {
        RetentionConfig {
            interval: Duration::from_secs(60),
            run_timeout: Duration::from_secs(5),
            max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }

    fn worker(provider: Arc<MemoryProvider>) -> (RetentionWorker, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let worker = RetentionWorker::new(provider, config(), Arc::clone(&metrics)).unwrap();
        (worker, metrics)
    }

    #[tokio::test]
    async fn cutoff_is_now_minus_max_age() {
        let provider = Arc::new(MemoryProvider::new());
        provider.set_delete_result(12);
        let (worker, metrics) = worker(provider.clone());

        let run = worker.run_once().await.unwrap().unwrap();
        let expected = Utc::now() - chrono::Duration::days(7);
        let drift = (expected - run.cutoff).num_milliseconds().abs();
        assert!(drift < 1000, "cutoff drifted {drift}ms");
        assert_eq!(run.deleted, 12);

        assert_eq!(provider.delete_cutoffs(), vec![run.cutoff]);
        assert_eq!(metrics.retention_runs(RunStatus::Success), 1);
        assert_eq!(metrics.retention_deleted(), 12);
    }

    #[test]
    fn zero_values_are_rejected() {
        let cases = [
            RetentionConfig {
                interval: Duration::ZERO,
                ..config()
            },
            RetentionConfig {
                run_timeout: Duration::ZERO,
                ..config()
            },
            RetentionConfig {
                max_age: Duration::ZERO,
                ..config()
            },
        ];
        for cfg in cases {
            let result = RetentionWorker::new(
                Arc::new(MemoryProvider::new()),
                cfg.clone(),
                Arc::new(Metrics::new()),
            );
            assert!(
                matches!(result, Err(RetentionError::InvalidConfig(_))),
                "{cfg:?} accepted"
            );
        }
    }

    #[tokio::test]
    async fn failed_delete_is_recorded() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail_deletes(true);
        let (worker, metrics) = worker(provider.clone());

        let err = worker.run_once().await.unwrap_err();
        assert!(matches!(err, RetentionError::Persist(_)));
        assert_eq!(metrics.retention_runs(RunStatus::Failure), 1);
        assert_eq!(metrics.retention_runs(RunStatus::Success), 0);
        assert_eq!(metrics.retention_deleted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_immediately_and_on_interval() {
        let provider = Arc::new(MemoryProvider::new());
        let (worker, _metrics) = worker(provider.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run_loop(rx).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.delete_cutoffs().len(), 1);

        // interval 60s plus at most 12s of jitter
        tokio::time::sleep(Duration::from_secs(73)).await;
        assert_eq!(provider.delete_cutoffs().len(), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_failures() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail_deletes(true);
        let (worker, metrics) = worker(provider.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run_loop(rx).await });
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(metrics.retention_runs(RunStatus::Failure) >= 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_timeout_applies_to_the_redb_store() {
        use promtrail_state::{QueryRecord, QueryType, StateStore};

        let store = StateStore::open_in_memory().unwrap();
        let old = Utc::now() - chrono::Duration::days(30);
        let record = QueryRecord {
            ts: old,
            query: "up".to_string(),
            time_param: None,
            duration_ms: 1,
            status_code: 200,
            body_size: 0,
            fingerprint: String::new(),
            label_matchers: Vec::new(),
            query_type: QueryType::Instant,
            step_secs: 0.0,
            start: None,
            end: None,
            total_queryable_samples: 0,
            peak_samples: 0,
        };
        store.insert_queries(&vec![record; 20_000]).unwrap();

        let metrics = Arc::new(Metrics::new());
        let cfg = RetentionConfig {
            run_timeout: Duration::from_millis(1),
            ..config()
        };
        let worker = RetentionWorker::new(Arc::new(store), cfg, Arc::clone(&metrics)).unwrap();

        let err = worker.run_once().await.unwrap_err();
        assert!(matches!(err, RetentionError::Timeout(_)));
        assert_eq!(metrics.retention_runs(RunStatus::Failure), 1);
    }

    #[test]
    fn jitter_stays_below_base() {
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(10)) < Duration::from_millis(10));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}
