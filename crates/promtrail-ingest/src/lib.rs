//! promtrail-ingest — asynchronous batched persistence of captured queries.
//!
//! The request path hands records to an [`IngestHandle`], which never
//! blocks: when the bounded queue is full the record is dropped and
//! counted. [`QueryIngester::run`] accumulates records into a batch and
//! flushes it to the [`Provider`](promtrail_state::Provider) when the
//! batch is full, when the flush timer fires, or once on shutdown.

pub mod ingester;

pub use ingester::{IngestError, IngestHandle, IngestResult, IngesterConfig, QueryIngester};
