//! Per-document lock table.
//!
//! One process-scoped table backs every mutation of a document's storage
//! locations: single-flight recovery, version creation, and background
//! rehydration writes all go through here. The table is explicit state
//! created once at startup and shared via `Arc` — there is no implicit
//! cross-request sharing beyond it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct DocumentLocks {
    held: Mutex<HashSet<String>>,
}

impl DocumentLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            held: Mutex::new(HashSet::new()),
        })
    }

    /// Non-blocking acquire. Returns `None` when the document is already
    /// locked; single-flight callers map that to `AlreadyInFlight`.
    pub fn try_acquire(self: &Arc<Self>, document_id: &str) -> Option<LockGuard> {
        let mut held = self.held.lock().expect("lock table poisoned");
        if held.insert(document_id.to_string()) {
            Some(LockGuard {
                locks: Arc::clone(self),
                document_id: document_id.to_string(),
            })
        } else {
            None
        }
    }

    /// Waiting acquire for writers that must serialize rather than fail
    /// (version creation). Polls cooperatively; hold times here are short.
    pub async fn acquire(self: &Arc<Self>, document_id: &str) -> LockGuard {
        loop {
            if let Some(guard) = self.try_acquire(document_id) {
                return guard;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// RAII guard: the lock is released on drop, including on early returns
/// and panics inside a recovery attempt.
pub struct LockGuard {
    locks: Arc<DocumentLocks>,
    document_id: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().expect("lock table poisoned");
        held.remove(&self.document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected() {
        let locks = DocumentLocks::new();
        let guard = locks.try_acquire("doc-1");
        assert!(guard.is_some());
        assert!(locks.try_acquire("doc-1").is_none());
        assert!(locks.try_acquire("doc-2").is_some());
    }

    #[test]
    fn test_released_on_drop() {
        let locks = DocumentLocks::new();
        {
            let _guard = locks.try_acquire("doc-1").unwrap();
            assert!(locks.try_acquire("doc-1").is_none());
        }
        assert!(locks.try_acquire("doc-1").is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let locks = DocumentLocks::new();
        let guard = locks.try_acquire("doc-1").unwrap();

        let locks2 = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire("doc-1").await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish once the lock is released")
            .unwrap();
    }
}
