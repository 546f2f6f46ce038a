//! Request/response correlation.
//!
//! Probes and other one-off requests register their id here before sending;
//! the engine offers every inbound message to the store before looking at
//! its own handshake and discovery ids. Each registration is fulfilled at
//! most once.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Concurrent map of in-flight request ids to their waiters.
#[derive(Debug, Default)]
pub struct SessionStore {
    pending: DashMap<String, oneshot::Sender<Value>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `id`. Returns `false` and drops the sender if
    /// the id is already registered; the first registration wins.
    pub fn register(&self, id: impl Into<String>, tx: oneshot::Sender<Value>) -> bool {
        let id = id.into();
        match self.pending.entry(id) {
            dashmap::Entry::Vacant(entry) => {
                entry.insert(tx);
                true
            }
            dashmap::Entry::Occupied(_) => false,
        }
    }

    /// Fulfills and removes the waiter for `id`. Returns `false` when no
    /// waiter is registered or the waiter has already gone away.
    pub fn complete(&self, id: &str, message: Value) -> bool {
        let Some((_, tx)) = self.pending.remove(id) else {
            return false;
        };
        if tx.send(message).is_err() {
            debug!(id = %id, "waiter abandoned before completion");
            return false;
        }
        true
    }

    /// Whether a waiter is currently registered for `id`.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of in-flight registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the store has no in-flight registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops the waiter for `id` without fulfilling it. Used when a probe
    /// gives up waiting.
    pub fn abandon(&self, id: &str) {
        self.pending.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_then_complete() {
        let store = SessionStore::new();
        let (tx, rx) = oneshot::channel();
        assert!(store.register("req-1", tx));
        assert!(store.is_pending("req-1"));

        assert!(store.complete("req-1", json!({"result": 1})));
        assert!(!store.is_pending("req-1"));
        assert_eq!(rx.blocking_recv().unwrap(), json!({"result": 1}));
    }

    #[test]
    fn test_duplicate_register_ignored() {
        let store = SessionStore::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        assert!(store.register("req-1", tx1));
        assert!(!store.register("req-1", tx2));

        // The loser's sender was dropped, so its waiter sees closure.
        assert!(rx2.try_recv().is_err());

        assert!(store.complete("req-1", json!(1)));
        assert_eq!(rx1.try_recv().unwrap(), json!(1));
    }

    #[test]
    fn test_complete_unknown_id() {
        let store = SessionStore::new();
        assert!(!store.complete("ghost", json!(null)));
    }

    #[test]
    fn test_complete_twice() {
        let store = SessionStore::new();
        let (tx, _rx) = oneshot::channel();
        store.register("req-1", tx);
        assert!(store.complete("req-1", json!(1)));
        assert!(!store.complete("req-1", json!(2)));
    }

    #[test]
    fn test_complete_after_waiter_dropped() {
        let store = SessionStore::new();
        let (tx, rx) = oneshot::channel();
        store.register("req-1", tx);
        drop(rx);
        assert!(!store.complete("req-1", json!(1)));
        assert!(!store.is_pending("req-1"));
    }

    #[test]
    fn test_abandon() {
        let store = SessionStore::new();
        let (tx, _rx) = oneshot::channel();
        store.register("req-1", tx);
        store.abandon("req-1");
        assert!(!store.is_pending("req-1"));
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_complete_exactly_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = Arc::new(SessionStore::new());
        let (tx, rx) = oneshot::channel();
        store.register("req-1", tx);

        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let wins = Arc::clone(&wins);
            handles.push(tokio::spawn(async move {
                if store.complete("req-1", json!(i)) {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(rx.await.is_ok());
    }
}
