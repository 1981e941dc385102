// crates/weft-server/src/reconcile/queue.rs
// Keyed work queue for reconcilers
//
// Guarantees: a key handed to a worker is not handed out again until the
// worker calls done(); adds for an in-flight key are remembered and replayed,
// so per-key reconciliations stay totally ordered by enqueue time.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use weft_types::ObjectRef;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ObjectRef>,
    pending_set: HashSet<ObjectRef>,
    active: HashSet<ObjectRef>,
    /// Keys that changed while being processed; replayed on done().
    dirty: HashSet<ObjectRef>,
    shutdown: bool,
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueue a key. Duplicate pending adds collapse; adds for an active key
    /// are deferred until the current pass finishes.
    pub async fn add(&self, key: ObjectRef) {
        let mut state = self.state.lock().await;
        if state.shutdown {
            return;
        }
        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.pending_set.insert(key.clone()) {
            state.pending.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue a key after a delay (requeue-with-backoff path).
    pub fn add_after(self: &Arc<Self>, key: ObjectRef, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Next key to process, or None after shutdown. Marks the key active.
    pub async fn next(&self) -> Option<ObjectRef> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.pending.pop_front() {
                    state.pending_set.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
                if state.shutdown {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark a key finished; replays it if changes arrived mid-flight.
    pub async fn done(&self, key: &ObjectRef) {
        let mut state = self.state.lock().await;
        state.active.remove(key);
        if state.dirty.remove(key) && !state.shutdown && state.pending_set.insert(key.clone()) {
            state.pending.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutdown = true;
        drop(state);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectRef {
        ObjectRef::new("ns", name)
    }

    #[tokio::test]
    async fn test_duplicate_pending_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;
        queue.add(key("a")).await;
        queue.add(key("b")).await;

        assert_eq!(queue.next().await, Some(key("a")));
        assert_eq!(queue.next().await, Some(key("b")));
        queue.shutdown().await;
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn test_active_key_not_handed_out_twice() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;

        let first = queue.next().await.unwrap();
        // Re-add while active: must not become pending yet
        queue.add(key("a")).await;
        queue.shutdown().await;
        assert_eq!(queue.next().await, None);

        // After shutdown the deferred replay is dropped
        queue.done(&first).await;
    }

    #[tokio::test]
    async fn test_dirty_key_replayed_after_done() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;
        let first = queue.next().await.unwrap();
        queue.add(key("a")).await;
        queue.done(&first).await;

        assert_eq!(queue.next().await, Some(key("a")));
    }

    #[tokio::test]
    async fn test_add_after_delivers() {
        let queue = WorkQueue::new();
        queue.add_after(key("late"), Duration::from_millis(10));
        let got = tokio::time::timeout(Duration::from_secs(1), queue.next())
            .await
            .unwrap();
        assert_eq!(got, Some(key("late")));
    }
}
