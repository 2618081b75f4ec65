//! Per-conversation turn serialization
//!
//! A conversation's record must only be mutated by the turn currently handling
//! that conversation. Each conversation id maps to a `Semaphore(1)`; a turn holds
//! the permit until it finishes, later turns for the same conversation wait, and
//! turns for other conversations run in parallel.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
#[error("turn lock for conversation {0} was closed")]
pub struct TurnLockClosed(pub String);

#[derive(Default)]
pub struct TurnLocks {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a conversation. Released when the permit drops.
    pub async fn acquire(&self, conversation_id: &str) -> Result<OwnedSemaphorePermit, TurnLockClosed> {
        let semaphore = {
            let mut locks = self.locks.lock();
            locks
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        semaphore
            .acquire_owned()
            .await
            .map_err(|_| TurnLockClosed(conversation_id.to_string()))
    }

    /// Number of tracked conversations
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// Forget locks nobody holds or waits on
    pub fn prune_idle(&self) {
        // Permits and waiters each keep a clone of the Arc
        self.locks
            .lock()
            .retain(|_, semaphore| Arc::strong_count(semaphore) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_conversation_waits() {
        let locks = Arc::new(TurnLocks::new());
        let first = locks.acquire("chat-1").await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _permit = locks.acquire("chat-1").await.unwrap();
                "second turn ran"
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert_eq!(waiter.await.unwrap(), "second turn ran");
    }

    #[tokio::test]
    async fn test_different_conversations_run_concurrently() {
        let locks = TurnLocks::new();
        let a = locks.acquire("a").await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b"))
            .await
            .expect("other conversation must not block")
            .unwrap();
        assert_eq!(locks.len(), 2);
        drop((a, b));
    }

    #[tokio::test]
    async fn test_prune_idle_keeps_held_locks() {
        let locks = TurnLocks::new();
        let held = locks.acquire("busy").await.unwrap();
        drop(locks.acquire("idle").await.unwrap());

        locks.prune_idle();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.prune_idle();
        assert!(locks.is_empty());
    }
}
