//! Process-lifetime leadership exposed as a boolean.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::info;

use crate::coordinator::LeadershipCoordinator;

/// Shared "this replica leads" flag.
#[derive(Debug, Clone, Default)]
pub struct LeaderFlag(Arc<AtomicBool>);

impl LeaderFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leader(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, leader: bool) {
        self.0.store(leader, Ordering::SeqCst);
    }
}

/// Compete for `key` and hold it until shutdown, mirroring the state
/// into `flag`.
pub async fn campaign(
    coordinator: LeadershipCoordinator,
    shutdown: watch::Receiver<bool>,
    key: i64,
    flag: LeaderFlag,
) {
    let held = flag.clone();
    coordinator
        .with_leadership(shutdown, key, |mut shutdown| async move {
            held.set(true);
            info!(key, "campaign won, holding leadership until shutdown");
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            held.set(false);
        })
        .await;
    flag.set(false);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::in_process::InProcessLocks;

    #[tokio::test(start_paused = true)]
    async fn only_one_campaign_wins() {
        let locks = Arc::new(InProcessLocks::new());
        let (tx, rx) = watch::channel(false);
        let a = LeaderFlag::new();
        let b = LeaderFlag::new();

        let ta = tokio::spawn(campaign(
            LeadershipCoordinator::new(locks.clone()),
            rx.clone(),
            42,
            a.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let tb = tokio::spawn(campaign(
            LeadershipCoordinator::new(locks.clone()),
            rx,
            42,
            b.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(a.is_leader());
        assert!(!b.is_leader());

        tx.send(true).unwrap();
        ta.await.unwrap();
        tb.await.unwrap();
        assert!(!a.is_leader());
        assert!(!locks.is_held(42));
    }
}
