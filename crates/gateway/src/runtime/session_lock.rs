//! Per-thread concurrency control.
//!
//! Gives at-most-one in-flight agent run per thread. A run that arrives
//! while another is in progress waits (cooperatively) for the lock rather
//! than being rejected — this is the sole admission-control point into the
//! Agent Runtime, and it also protects thread deletion against a racing run.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Named mutex registry: one `Semaphore(1)` per thread id, created lazily.
pub struct ThreadLockTable {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for ThreadLockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadLockTable {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the run lock for a thread, blocking until it's available.
    /// The returned permit releases the lock when dropped.
    pub async fn acquire(&self, thread_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(thread_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        sem.acquire_owned()
            .await
            .expect("semaphore is never closed")
    }

    /// Number of tracked threads (for monitoring).
    pub fn thread_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop locks that currently have no holder and no waiter.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_access() {
        let map = ThreadLockTable::new();

        let permit1 = map.acquire("t1").await;
        drop(permit1);

        let permit2 = map.acquire("t1").await;
        drop(permit2);
    }

    #[tokio::test]
    async fn different_threads_concurrent() {
        let map = Arc::new(ThreadLockTable::new());

        let p1 = map.acquire("t1").await;
        let p2 = map.acquire("t2").await;

        // Both acquired simultaneously.
        assert_eq!(map.thread_count(), 2);

        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn same_thread_waits() {
        let map = Arc::new(ThreadLockTable::new());
        let map2 = map.clone();

        let p1 = map.acquire("t1").await;

        // Spawn a task that waits for the lock.
        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire("t1").await;
            42
        });

        // Give the waiter a moment to queue.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Release the first permit.
        drop(p1);

        // The waiter should now proceed.
        let result = handle.await.unwrap();
        assert_eq!(result, 42);
    }
}
