//! promtrail-leader — run periodic work on exactly one replica.
//!
//! Replicas sharing a database compete for a session-scoped advisory lock.
//! [`LeadershipCoordinator::with_leadership`] runs a closure while holding
//! the lock and retries on a fixed backoff while another replica holds it.
//! Closing the session (or losing it) releases the lock.

pub mod coordinator;
pub mod error;
pub mod flag;
pub mod in_process;

pub use coordinator::{DEFAULT_RETRY_BACKOFF, LeadershipCoordinator, lock_key_for};
pub use error::{LeaderError, LeaderResult};
pub use flag::{LeaderFlag, campaign};
pub use in_process::InProcessLocks;
