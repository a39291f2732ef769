//! QueryIngester — bounded queue, in-memory batch, periodic flush.
//!
//! Delivery is at-most-once. A failed or timed-out flush discards its
//! batch, and records still unread in the queue at shutdown are abandoned;
//! only the in-memory batch gets a final flush.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use promtrail_metrics::Metrics;
use promtrail_state::{Provider, QueryRecord};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid ingester config: {0}")]
    InvalidConfig(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Ingester tuning. Every field must be non-zero except the grace period.
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    /// Capacity of the queue between callers and the flush loop.
    pub buffer_size: usize,
    /// Records per size-triggered flush.
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Upper bound on a single `insert` call.
    pub ingest_timeout: Duration,
    /// Extra time allowed for the final flush at shutdown. Zero means the
    /// final flush is bounded only by `ingest_timeout`.
    pub shutdown_grace_period: Duration,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            ingest_timeout: Duration::from_secs(10),
            shutdown_grace_period: Duration::from_secs(5),
        }
    }
}

impl IngesterConfig {
    fn validate(&self) -> IngestResult<()> {
        if self.buffer_size == 0 {
            return Err(IngestError::InvalidConfig("buffer_size must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(IngestError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(IngestError::InvalidConfig("flush_interval must be > 0".into()));
        }
        if self.ingest_timeout.is_zero() {
            return Err(IngestError::InvalidConfig("ingest_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Cloneable, non-blocking entry point for enqueuing records.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<QueryRecord>,
    metrics: Arc<Metrics>,
}

impl IngestHandle {
    /// Queue `record` for persistence. Drops it when the queue is full.
    pub fn enqueue(&self, record: QueryRecord) {
        match self.tx.try_send(record) {
            Ok(()) => self.metrics.record_enqueued(),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.record_dropped();
                debug!("ingest queue full, dropping query record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_dropped();
                debug!("ingest queue closed, dropping query record");
            }
        }
    }
}

/// Batches query records and writes them through a [`Provider`].
pub struct QueryIngester {
    provider: Arc<dyn Provider>,
    config: IngesterConfig,
    metrics: Arc<Metrics>,
    tx: mpsc::Sender<QueryRecord>,
    rx: mpsc::Receiver<QueryRecord>,
}

impl QueryIngester {
    pub fn new(
        provider: Arc<dyn Provider>,
        config: IngesterConfig,
        metrics: Arc<Metrics>,
    ) -> IngestResult<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.buffer_size);
        Ok(Self {
            provider,
            config,
            metrics,
            tx,
            rx,
        })
    }

    pub fn handle(&self) -> IngestHandle {
        IngestHandle {
            tx: self.tx.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Run the flush loop until shutdown (or until every handle is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let QueryIngester {
            provider,
            config,
            metrics,
            tx,
            mut rx,
        } = self;
        // Only handles keep the queue open from here on.
        drop(tx);

        let flusher = Flusher {
            provider,
            metrics,
            ingest_timeout: config.ingest_timeout,
        };
        let mut batch: Vec<QueryRecord> = Vec::with_capacity(config.batch_size);
        let mut ticker = tokio::time::interval(config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(
            buffer_size = config.buffer_size,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            "query ingester started"
        );

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= config.batch_size {
                            flusher.flush(&mut batch, "size").await;
                        }
                    }
                    None => {
                        info!("ingest queue closed");
                        flusher.final_flush(&mut batch, config.shutdown_grace_period).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        flusher.flush(&mut batch, "interval").await;
                    }
                }
                _ = shutdown.changed() => {
                    info!(pending = batch.len(), "query ingester shutting down");
                    flusher.final_flush(&mut batch, config.shutdown_grace_period).await;
                    return;
                }
            }
        }
    }
}

struct Flusher {
    provider: Arc<dyn Provider>,
    metrics: Arc<Metrics>,
    ingest_timeout: Duration,
}

impl Flusher {
    async fn flush(&self, batch: &mut Vec<QueryRecord>, reason: &'static str) {
        let capacity = batch.capacity();
        let records = std::mem::replace(batch, Vec::with_capacity(capacity));
        let count = records.len();
        let started = Instant::now();

        match tokio::time::timeout(self.ingest_timeout, self.provider.insert(&records)).await {
            Ok(Ok(())) => {
                self.metrics.record_flush(count, true);
                debug!(
                    records = count,
                    reason,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "flushed query batch"
                );
            }
            Ok(Err(e)) => {
                self.metrics.record_flush(count, false);
                warn!(error = %e, records = count, reason, "query batch flush failed, discarding");
            }
            Err(_) => {
                self.metrics.record_flush(count, false);
                warn!(
                    records = count,
                    reason,
                    timeout_ms = self.ingest_timeout.as_millis() as u64,
                    "query batch flush timed out, discarding"
                );
            }
        }
    }

    /// One best-effort flush of the current batch, bounded by `grace`.
    async fn final_flush(&self, batch: &mut Vec<QueryRecord>, grace: Duration) {
        if batch.is_empty() {
            return;
        }
        if grace.is_zero() {
            self.flush(batch, "shutdown").await;
            return;
        }
        let count = batch.len();
        if tokio::time::timeout(grace, self.flush(batch, "shutdown"))
            .await
            .is_err()
        {
            self.metrics.record_flush(count, false);
            warn!(
                records = count,
                grace_ms = grace.as_millis() as u64,
                "shutdown flush exceeded grace period, discarding"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use promtrail_state::MemoryProvider;

    fn record(query: &str) -> QueryRecord {
        QueryRecord {
            ts: Utc::now(),
            query: query.to_string(),
            time_param: None,
            duration_ms: 12,
            status_code: 200,
            body_size: 512,
            fingerprint: String::new(),
            label_matchers: Vec::new(),
            query_type: Default::default(),
            step_secs: 0.0,
            start: None,
            end: None,
            total_queryable_samples: 0,
            peak_samples: 0,
        }
    }

    fn config(batch_size: usize, flush_interval: Duration) -> IngesterConfig {
        IngesterConfig {
            buffer_size: 64,
            batch_size,
            flush_interval,
            ingest_timeout: Duration::from_secs(10),
            shutdown_grace_period: Duration::from_secs(5),
        }
    }

    struct Harness {
        provider: Arc<MemoryProvider>,
        metrics: Arc<Metrics>,
        handle: IngestHandle,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(config: IngesterConfig) -> Harness {
        let provider = Arc::new(MemoryProvider::new());
        start_with(provider, config)
    }

    fn start_with(provider: Arc<MemoryProvider>, config: IngesterConfig) -> Harness {
        let metrics = Arc::new(Metrics::new());
        let ingester = QueryIngester::new(provider.clone(), config, Arc::clone(&metrics)).unwrap();
        let handle = ingester.handle();
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(ingester.run(rx));
        Harness {
            provider,
            metrics,
            handle,
            shutdown,
            task,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_flushes_without_timer() {
        let h = start(config(3, Duration::from_secs(3600)));
        for i in 0..3 {
            h.handle.enqueue(record(&format!("q{i}")));
        }
        settle().await;

        let batches = h.provider.inserted_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(h.metrics.ingest_flushed_records(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_partial_batch_once() {
        let h = start(config(100, Duration::from_secs(5)));
        h.handle.enqueue(record("a"));
        h.handle.enqueue(record("b"));
        settle().await;
        assert!(h.provider.inserted_batches().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        let batches = h.provider.inserted_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);

        // Empty batches are not flushed on later ticks.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.provider.inserted_batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_records_once() {
        let h = start(config(100, Duration::from_secs(3600)));
        for q in ["a", "b", "c"] {
            h.handle.enqueue(record(q));
        }
        settle().await;

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();

        let batches = h.provider.inserted_batches();
        assert_eq!(batches.len(), 1);
        let queries: Vec<_> = batches[0].iter().map(|r| r.query.as_str()).collect();
        assert_eq!(queries, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_grace_still_flushes() {
        let mut cfg = config(100, Duration::from_secs(3600));
        cfg.shutdown_grace_period = Duration::ZERO;
        let h = start(cfg);
        h.handle.enqueue(record("a"));
        settle().await;

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();
        assert_eq!(h.provider.inserted_batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_bounds_shutdown_flush() {
        let provider = Arc::new(MemoryProvider::new());
        provider.set_insert_delay(Duration::from_secs(3600));
        let mut cfg = config(100, Duration::from_secs(3600));
        cfg.ingest_timeout = Duration::from_secs(7200);
        cfg.shutdown_grace_period = Duration::from_secs(1);
        let h = start_with(provider, cfg);
        h.handle.enqueue(record("slow"));
        settle().await;

        let started = tokio::time::Instant::now();
        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(h.provider.inserted_batches().is_empty());
        assert_eq!(h.metrics.ingest_flush_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_discards_batch() {
        let h = start(config(2, Duration::from_secs(3600)));
        h.provider.fail_inserts(true);
        h.handle.enqueue(record("a"));
        h.handle.enqueue(record("b"));
        settle().await;
        assert_eq!(h.metrics.ingest_flush_failures(), 1);

        h.provider.fail_inserts(false);
        h.handle.enqueue(record("c"));
        h.handle.enqueue(record("d"));
        settle().await;

        let batches = h.provider.inserted_batches();
        assert_eq!(batches.len(), 2);
        let second: Vec<_> = batches[1].iter().map(|r| r.query.as_str()).collect();
        assert_eq!(second, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let metrics = Arc::new(Metrics::new());
        let mut cfg = config(10, Duration::from_secs(1));
        cfg.buffer_size = 2;
        let ingester =
            QueryIngester::new(Arc::new(MemoryProvider::new()), cfg, Arc::clone(&metrics)).unwrap();
        let handle = ingester.handle();

        for q in ["a", "b", "c", "d"] {
            handle.enqueue(record(q));
        }
        assert_eq!(metrics.ingest_enqueued(), 2);
        assert_eq!(metrics.ingest_dropped(), 2);
    }

    #[tokio::test]
    async fn handles_outliving_closed_queue_drop_records() {
        let metrics = Arc::new(Metrics::new());
        let ingester = QueryIngester::new(
            Arc::new(MemoryProvider::new()),
            config(10, Duration::from_secs(1)),
            Arc::clone(&metrics),
        )
        .unwrap();
        let handle = ingester.handle();
        drop(ingester);

        handle.enqueue(record("late"));
        assert_eq!(metrics.ingest_dropped(), 1);
    }

    #[test]
    fn rejects_zero_sizes() {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        let metrics = Arc::new(Metrics::new());
        for cfg in [
            IngesterConfig {
                buffer_size: 0,
                ..Default::default()
            },
            IngesterConfig {
                batch_size: 0,
                ..Default::default()
            },
            IngesterConfig {
                flush_interval: Duration::ZERO,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                QueryIngester::new(Arc::clone(&provider), cfg, Arc::clone(&metrics)),
                Err(IngestError::InvalidConfig(_))
            ));
        }
    }
}
