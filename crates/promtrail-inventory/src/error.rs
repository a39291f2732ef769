//! Error types for the inventory syncer and its upstream source.

use std::time::Duration;

use thiserror::Error;

use promtrail_state::StateError;

/// Result type alias for upstream calls.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failure talking to the upstream metrics source.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// The endpoint does not exist (HTTP 404). Callers treat this as
    /// "unsupported" where the data is optional.
    #[error("upstream endpoint not found: {0}")]
    NotFound(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream rejected request ({error_type}): {message}")]
    Api { error_type: String, message: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid upstream url {0:?}")]
    InvalidUrl(String),
}

/// Failure of a sync step or of a whole cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid syncer config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("storage error: {0}")]
    Persist(#[from] StateError),

    #[error("{step} timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },

    /// Too many per-job failures in the job-index phase. Upserts of the
    /// jobs that succeeded are kept.
    #[error("job index: {failed} of {jobs} jobs failed ({succeeded} succeeded)")]
    PartialFailure {
        jobs: usize,
        succeeded: usize,
        failed: usize,
    },

    #[error("sync interrupted by shutdown")]
    Cancelled,
}
