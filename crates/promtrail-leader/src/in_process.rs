//! Advisory locks scoped to one process.
//!
//! Behaves like database session locks: a key is held by at most one
//! session, re-locking from the holder succeeds, and every lock a session
//! holds is released when it is closed or dropped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use promtrail_state::{AdvisoryLocks, LockSession, StateResult};

type Holders = Arc<Mutex<HashMap<i64, u64>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct InProcessLocks {
    holders: Holders,
    next_session: AtomicU64,
}

impl InProcessLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any session currently holds `key`.
    pub fn is_held(&self, key: i64) -> bool {
        lock(&self.holders).contains_key(&key)
    }
}

#[async_trait]
impl AdvisoryLocks for InProcessLocks {
    async fn open_session(&self) -> StateResult<Box<dyn LockSession>> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(Session {
            id,
            holders: Arc::clone(&self.holders),
            held: HashSet::new(),
        }))
    }
}

struct Session {
    id: u64,
    holders: Holders,
    held: HashSet<i64>,
}

impl Session {
    fn release_all(&mut self) {
        let mut holders = lock(&self.holders);
        for key in self.held.drain() {
            if holders.get(&key) == Some(&self.id) {
                holders.remove(&key);
            }
        }
    }
}

#[async_trait]
impl LockSession for Session {
    async fn try_lock(&mut self, key: i64) -> StateResult<bool> {
        let mut holders = lock(&self.holders);
        let holder = *holders.entry(key).or_insert(self.id);
        if holder == self.id {
            self.held.insert(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn close(self: Box<Self>) -> StateResult<()> {
        let mut session = self;
        session.release_all();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_holder_per_key() {
        let locks = InProcessLocks::new();
        let mut a = locks.open_session().await.unwrap();
        let mut b = locks.open_session().await.unwrap();

        assert!(a.try_lock(1).await.unwrap());
        assert!(a.try_lock(1).await.unwrap());
        assert!(!b.try_lock(1).await.unwrap());
        assert!(b.try_lock(2).await.unwrap());

        a.close().await.unwrap();
        assert!(!locks.is_held(1));
        assert!(b.try_lock(1).await.unwrap());
    }

    #[tokio::test]
    async fn dropping_a_session_releases_its_locks() {
        let locks = InProcessLocks::new();
        let mut a = locks.open_session().await.unwrap();
        assert!(a.try_lock(9).await.unwrap());
        drop(a);
        assert!(!locks.is_held(9));
    }

    #[tokio::test]
    async fn losing_session_does_not_release_winner() {
        let locks = InProcessLocks::new();
        let mut winner = locks.open_session().await.unwrap();
        let mut loser = locks.open_session().await.unwrap();
        assert!(winner.try_lock(3).await.unwrap());
        assert!(!loser.try_lock(3).await.unwrap());

        loser.close().await.unwrap();
        assert!(locks.is_held(3));
    }
}
