use promtrail_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaderError {
    #[error("provider does not offer advisory locks")]
    Unsupported,

    #[error("lock backend error: {0}")]
    Backend(#[from] StateError),
}

pub type LeaderResult<T> = Result<T, LeaderError>;
