//! promtrail-metrics — instrumentation for promtrail's background work.
//!
//! # Architecture
//!
//! ```text
//! Metrics (Arc-shared)
//!   ├── observe_sync()       ← InventorySyncer, per step and per run
//!   ├── observe_retention()  ← RetentionWorker
//!   └── record_*()           ← QueryIngester enqueue / flush paths
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod prometheus;
pub mod registry;

pub use prometheus::render_prometheus;
pub use registry::{Counter, DURATION_BUCKETS, Histogram, Metrics, RunStatus, SyncStep};
