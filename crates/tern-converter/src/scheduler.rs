//! Per-subject sharded worker pool.
//!
//! Frames for distinct subjects are processed in parallel while frames for
//! the same subject stay ordered: every item is routed to the shard
//! `hash(key) % workers`, and each shard is a single worker draining a
//! bounded queue. A full queue applies backpressure to the dispatcher.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// A pool of shard workers with bounded per-shard queues.
pub struct ShardedScheduler<T> {
    senders: Vec<mpsc::Sender<T>>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> ShardedScheduler<T> {
    /// Spawn `workers` shard workers, each with a queue of `depth` items,
    /// all running the same handler.
    pub fn new<F, Fut>(workers: usize, depth: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for shard in 0..workers {
            let (tx, mut rx) = mpsc::channel::<T>(depth.max(1));
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                while let Some(item) = rx.recv().await {
                    handler(item).await;
                }
                tracing::debug!(shard, "scheduler worker drained");
            }));
            senders.push(tx);
        }

        Self { senders, handles }
    }

    /// Route an item to its subject's shard, waiting if the queue is full.
    pub async fn dispatch(&self, key: &str, item: T) -> Result<()> {
        let shard = shard_for(key, self.senders.len());
        self.senders[shard]
            .send(item)
            .await
            .map_err(|_| Error::SchedulerStopped)
    }

    /// Close the queues and wait up to `grace` for each worker to drain.
    pub async fn shutdown(self, grace: Duration) {
        drop(self.senders);
        for handle in self.handles {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!("scheduler worker did not drain in time, abandoning");
            }
        }
    }
}

fn shard_for(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn shard_assignment_is_stable() {
        let a = shard_for("did:plc:alice", 50);
        for _ in 0..10 {
            assert_eq!(shard_for("did:plc:alice", 50), a);
        }
        assert!(a < 50);
    }

    #[tokio::test]
    async fn per_subject_order_is_preserved() {
        let seen: Arc<Mutex<Vec<(String, u64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let scheduler = ShardedScheduler::new(4, 8, move |item: (String, u64)| {
            let sink = Arc::clone(&sink);
            async move {
                // Stagger to give interleavings a chance to surface.
                tokio::time::sleep(Duration::from_millis(1)).await;
                sink.lock().unwrap().push(item);
            }
        });

        for i in 0..20u64 {
            scheduler
                .dispatch("did:plc:alice", ("did:plc:alice".to_string(), i))
                .await
                .unwrap();
            scheduler
                .dispatch("did:plc:bob", ("did:plc:bob".to_string(), i))
                .await
                .unwrap();
        }
        scheduler.shutdown(Duration::from_secs(5)).await;

        let seen = seen.lock().unwrap();
        for subject in ["did:plc:alice", "did:plc:bob"] {
            let order: Vec<u64> = seen
                .iter()
                .filter(|(s, _)| s == subject)
                .map(|(_, i)| *i)
                .collect();
            let mut sorted = order.clone();
            sorted.sort_unstable();
            assert_eq!(order, sorted, "events for {} arrived out of order", subject);
            assert_eq!(order.len(), 20);
        }
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_fails() {
        let scheduler: ShardedScheduler<u64> = ShardedScheduler::new(1, 1, |_| async {});
        let sender = scheduler.senders[0].clone();
        scheduler.shutdown(Duration::from_secs(1)).await;
        assert!(sender.send(1).await.is_err());
    }
}
