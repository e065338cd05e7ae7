//! Per-key work queue.
//!
//! Serializes execution per queue key while leaving distinct keys fully
//! parallel. Each key maps to the tail of its chain of work; a new task
//! parks behind the current tail and becomes the tail itself. A failed or
//! abandoned predecessor never poisons the chain: a dropped tail sender
//! reads as "done".

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::watch;

/// Keyed FIFO executor.
#[derive(Debug, Default)]
pub struct KeyedQueue {
    tails: Mutex<HashMap<String, watch::Receiver<bool>>>,
}

impl KeyedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` after all previously enqueued work on `key` finishes.
    ///
    /// Returns `work`'s output. Distinct keys do not serialize with each
    /// other; `GLOBAL` in particular does not block `SYM:*` keys.
    pub async fn run<T, F>(&self, key: &str, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let (tx, rx) = watch::channel(false);
        let my_rx = rx.clone();

        // Swap ourselves in as the tail under the lock; whoever held the
        // slot before us is our predecessor.
        let predecessor = self.tails.lock().insert(key.to_string(), rx);

        if let Some(mut prev) = predecessor {
            // Err means the predecessor's sender dropped without signaling
            // (panic or abandoned request); treat as done.
            let _ = prev.wait_for(|done| *done).await;
        }

        let out = work.await;

        let _ = tx.send(true);

        // Drop the map entry only if nothing enqueued behind us.
        let mut tails = self.tails.lock();
        if tails.get(key).is_some_and(|tail| tail.same_channel(&my_rx)) {
            tails.remove(key);
        }

        out
    }

    /// Number of keys with live tails (for debug surfaces).
    pub fn active_keys(&self) -> usize {
        self.tails.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let queue = Arc::new(KeyedQueue::new());
        let log = Arc::new(AsyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let queue = queue.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .run("SYM:ARCUSD", async move {
                        log.lock().await.push((i, "start"));
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        log.lock().await.push((i, "end"));
                    })
                    .await;
            }));
            // Give each spawn a beat to claim its queue position in order.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Strict alternation: every start is followed by its own end.
        let log = log.lock().await;
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert_eq!(pair[0].1, "start");
            assert_eq!(pair[1].1, "end");
        }
    }

    #[tokio::test]
    async fn test_distinct_keys_run_in_parallel() {
        let queue = Arc::new(KeyedQueue::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        // Key A blocks until key B's task signals it: only possible if the
        // two keys are not serialized against each other.
        let qa = queue.clone();
        let a = tokio::spawn(async move {
            qa.run("SYM:AAA", async move {
                tokio::time::timeout(Duration::from_secs(1), rx).await.is_ok()
            })
            .await
        });

        let qb = queue.clone();
        let b = tokio::spawn(async move {
            qb.run("SYM:BBB", async move {
                let _ = tx.send(());
            })
            .await
        });

        assert!(a.await.unwrap(), "key A should observe key B's signal");
        b.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_key() {
        let queue = Arc::new(KeyedQueue::new());

        let q = queue.clone();
        let failed = tokio::spawn(async move {
            q.run("SYM:X", async {
                panic!("simulated dispatch failure");
            })
            .await
        });
        assert!(failed.await.is_err());

        let out = queue.run("SYM:X", async { 42 }).await;
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_entry_removed_when_idle() {
        let queue = KeyedQueue::new();
        queue.run("SYM:Y", async {}).await;
        assert_eq!(queue.active_keys(), 0);
    }
}
