//! promtrail-retention — bounds storage growth of captured queries.
//!
//! [`RetentionWorker::run_loop`] deletes every query record older than
//! `max_age` once at startup and then every `interval` (plus jitter).
//! Failures are logged and counted; the loop never stops on them.

pub mod worker;

pub use worker::{
    RetentionConfig, RetentionError, RetentionResult, RetentionRun, RetentionWorker,
};
