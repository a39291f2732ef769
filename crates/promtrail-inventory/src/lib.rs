//! promtrail-inventory — keeps the derived metric inventories fresh.
//!
//! # Architecture
//!
//! ```text
//! InventorySyncer::run_loop (immediate run, then interval + jitter)
//!   └── run_once (bounded by run_timeout)
//!         ├── catalog sync      MetricsSource::metadata → expand → upsert
//!         ├── usage summary     Provider::refresh_metrics_usage_summary
//!         └── job index         label_values("job") → worker pool
//!                                 └── per job: query → upsert (name, job)
//! ```
//!
//! [`PrometheusClient`] implements [`MetricsSource`] over the Prometheus
//! HTTP API.

pub mod catalog;
pub mod client;
pub mod error;
#[cfg(test)]
mod fake;
pub mod job_index;
pub mod source;
pub mod syncer;

pub use catalog::expand_metadata;
pub use client::PrometheusClient;
pub use error::{SyncError, SyncResult, UpstreamError, UpstreamResult};
pub use job_index::{JobIndexOptions, JobIndexReport, job_metrics_query, sync_job_index};
pub use source::{MetadataInfo, MetricsSource, QueryResult, Sample, SamplePair, Series};
pub use syncer::{InventorySyncer, SyncerConfig};
