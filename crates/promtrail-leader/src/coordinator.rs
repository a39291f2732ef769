//! LeadershipCoordinator — try-lock, run, release; otherwise back off.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use promtrail_state::{AdvisoryLocks, LockSession, Provider};

use crate::error::{LeaderError, LeaderResult};

/// Wait between lock attempts while another replica leads.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Stable advisory-lock key for a named job.
pub fn lock_key_for(name: &str) -> i64 {
    xxhash_rust::xxh64::xxh64(name.as_bytes(), 0) as i64
}

#[derive(Clone)]
pub struct LeadershipCoordinator {
    locks: Arc<dyn AdvisoryLocks>,
    retry_backoff: Duration,
}

impl LeadershipCoordinator {
    pub fn new(locks: Arc<dyn AdvisoryLocks>) -> Self {
        Self {
            locks,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Coordinator over the provider's advisory locks, if it has any.
    pub fn for_provider(provider: &dyn Provider) -> LeaderResult<Self> {
        provider
            .advisory_locks()
            .map(Self::new)
            .ok_or(LeaderError::Unsupported)
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Run `f` once while holding the lock for `key`.
    ///
    /// Returns `true` if `f` ran, `false` if shutdown arrived first. Backend
    /// errors while opening a session or taking the lock are logged and
    /// retried like a lost race.
    pub async fn with_leadership<F, Fut>(
        &self,
        mut shutdown: watch::Receiver<bool>,
        key: i64,
        f: F,
    ) -> bool
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            if *shutdown.borrow() {
                return false;
            }

            match self.try_acquire(key).await {
                Ok(Some(session)) => {
                    info!(key, "leadership acquired");
                    f(shutdown.clone()).await;
                    release(session, key).await;
                    info!(key, "leadership released");
                    return true;
                }
                Ok(None) => debug!(key, "lock held elsewhere, retrying"),
                Err(e) => warn!(key, error = %e, "leadership attempt failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_backoff) => {}
                _ = shutdown.changed() => return false,
            }
        }
    }

    /// Open a session and try the lock. The session is returned only when
    /// the lock was taken; otherwise it is closed here.
    async fn try_acquire(&self, key: i64) -> LeaderResult<Option<Box<dyn LockSession>>> {
        let mut session = self.locks.open_session().await?;
        match session.try_lock(key).await {
            Ok(true) => Ok(Some(session)),
            Ok(false) => {
                release(session, key).await;
                Ok(None)
            }
            Err(e) => {
                release(session, key).await;
                Err(e.into())
            }
        }
    }
}

async fn release(session: Box<dyn LockSession>, key: i64) {
    if let Err(e) = session.close().await {
        warn!(key, error = %e, "failed to close lock session");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::in_process::InProcessLocks;
    use promtrail_state::MemoryProvider;

    #[test]
    fn lock_keys_are_stable_and_distinct() {
        assert_eq!(lock_key_for("inventory"), lock_key_for("inventory"));
        assert_ne!(lock_key_for("inventory"), lock_key_for("retention"));
    }

    #[test]
    fn provider_without_locks_is_unsupported() {
        let provider = MemoryProvider::new();
        assert!(matches!(
            LeadershipCoordinator::for_provider(&provider),
            Err(LeaderError::Unsupported)
        ));

        let provider = MemoryProvider::new().with_advisory_locks(Arc::new(InProcessLocks::new()));
        assert!(LeadershipCoordinator::for_provider(&provider).is_ok());
    }

    #[tokio::test]
    async fn runs_and_releases() {
        let locks = Arc::new(InProcessLocks::new());
        let coordinator = LeadershipCoordinator::new(locks.clone());
        let (_tx, rx) = watch::channel(false);
        let runs = AtomicUsize::new(0);

        let ran = coordinator
            .with_leadership(rx, 7, |_| async {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(ran);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!locks.is_held(7));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_while_lock_is_held_elsewhere() {
        let locks = Arc::new(InProcessLocks::new());
        let mut other = locks.open_session().await.unwrap();
        assert!(other.try_lock(7).await.unwrap());

        let coordinator = LeadershipCoordinator::new(locks.clone());
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            coordinator
                .with_leadership(rx, 7, |_| async {})
                .await
        });

        // Several backoff periods pass without acquiring.
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(!task.is_finished());

        other.close().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(task.await.unwrap());
        assert!(!locks.is_held(7));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_waiting() {
        let locks = Arc::new(InProcessLocks::new());
        let mut other = locks.open_session().await.unwrap();
        assert!(other.try_lock(7).await.unwrap());

        let coordinator = LeadershipCoordinator::new(locks.clone());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            coordinator
                .with_leadership(rx, 7, |_| async { panic!("must not run"); })
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        assert!(!task.await.unwrap());
        assert!(locks.is_held(7));
    }

    #[tokio::test]
    async fn already_cancelled_returns_immediately() {
        let coordinator = LeadershipCoordinator::new(Arc::new(InProcessLocks::new()));
        let (_tx, rx) = watch::channel(true);
        assert!(!coordinator.with_leadership(rx, 1, |_| async {}).await);
    }

    #[tokio::test]
    async fn leader_sees_shutdown_signal() {
        let coordinator = LeadershipCoordinator::new(Arc::new(InProcessLocks::new()));
        let (tx, rx) = watch::channel(false);

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let task = tokio::spawn(async move {
            coordinator
                .with_leadership(rx, 1, |mut shutdown| async move {
                    let _ = started_tx.send(());
                    let _ = shutdown.changed().await;
                })
                .await
        });
        started_rx.await.unwrap();
        tx.send(true).unwrap();
        assert!(task.await.unwrap());
    }
}
