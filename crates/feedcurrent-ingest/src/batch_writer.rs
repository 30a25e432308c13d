use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use feedcurrent_db::{Database, PostInsert};
use tokio::sync::{Mutex, watch};
use tracing::{error, instrument, warn};

use crate::stats::ConsumerStats;

pub const LOG_TARGET: &str = "feedcurrent::ingest::batch_writer";

pub const DEFAULT_CAPACITY: usize = 10_000;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Bounded in-memory queue with dual size/time flush triggers.
/// Reposts never pass through here — only accepted posts from the stream
/// consumer.
pub struct BatchWriter {
    db: Arc<Database>,
    queue: Mutex<VecDeque<PostInsert>>,
    capacity: usize,
    batch_size: usize,
    flush_interval: Duration,
    stats: Arc<ConsumerStats>,
}

impl BatchWriter {
    pub fn new(db: Arc<Database>, stats: Arc<ConsumerStats>) -> Arc<Self> {
        Self::with_params(
            db,
            stats,
            DEFAULT_CAPACITY,
            DEFAULT_BATCH_SIZE,
            DEFAULT_FLUSH_INTERVAL,
        )
    }

    pub fn with_params(
        db: Arc<Database>,
        stats: Arc<ConsumerStats>,
        capacity: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            queue: Mutex::new(VecDeque::with_capacity(batch_size)),
            capacity,
            batch_size,
            flush_interval,
            stats,
        })
    }

    /// Appends one item; drops it silently if the queue is already at
    /// capacity, which is the only backpressure this system applies.
    /// Triggers a size-flush inline when the configured batch size is
    /// reached.
    #[instrument(target = "feedcurrent::ingest::batch_writer", skip_all)]
    pub async fn enqueue(self: &Arc<Self>, item: PostInsert) {
        let should_flush = {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.capacity {
                warn!(target: LOG_TARGET, "Batch queue at capacity, dropping post");
                self.stats
                    .dropped
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return;
            }
            queue.push_back(item);
            queue.len() >= self.batch_size
        };

        if should_flush {
            self.flush().await;
        }
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drains the queue under the lock, releases it, then writes the
    /// drained slice in one storage transaction. On storage failure the
    /// slice is dropped (at-most-once delivery — the firehose has no
    /// replay contract in this system) rather than re-enqueued.
    #[instrument(target = "feedcurrent::ingest::batch_writer", skip_all)]
    pub async fn flush(self: &Arc<Self>) -> usize {
        let drained: Vec<PostInsert> = {
            let mut queue = self.queue.lock().await;
            queue.drain(..).collect()
        };

        if drained.is_empty() {
            return 0;
        }

        match self.db.add_posts_batch(&drained).await {
            Ok(n) => {
                self.stats
                    .batches_flushed
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.stats
                    .posts_flushed
                    .fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
                n
            }
            Err(err) => {
                error!(target: LOG_TARGET, %err, dropped = drained.len(), "Batch flush failed, dropping batch");
                self.stats
                    .errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                0
            }
        }
    }

    /// Background flush task: ticks every `flush_interval` regardless of
    /// queue length, exits cooperatively when `shutdown` fires. Grounded
    /// on the same `tokio::select!` interval-vs-shutdown shape used
    /// elsewhere in this codebase for background polling tasks.
    pub async fn run_periodic_flush(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.flush_interval);
        interval.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush().await;
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Final flush on shutdown.
    pub async fn shutdown(self: &Arc<Self>) {
        self.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use feedcurrent_db::PostFields;

    use super::*;

    fn item(uri: &str) -> PostInsert {
        PostInsert {
            post: PostFields {
                uri: uri.to_string(),
                cid: "cid".to_string(),
                author_did: "did:plc:user".to_string(),
                text: None,
                created_at: Utc::now(),
            },
            url: "https://example.com/a".to_string(),
            host: "example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn size_trigger_flushes_at_batch_size() {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        let stats = Arc::new(ConsumerStats::default());
        let writer = BatchWriter::with_params(db.clone(), stats, 10_000, 2, Duration::from_secs(60));

        writer.enqueue(item("at://did:plc:userA/app.bsky.feed.post/a1")).await;
        assert_eq!(writer.queue_depth().await, 1);
        writer.enqueue(item("at://did:plc:userB/app.bsky.feed.post/a2")).await;
        assert_eq!(writer.queue_depth().await, 0);

        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.total_posts, 2);
    }

    #[tokio::test]
    async fn capacity_drop_does_not_panic() {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        let stats = Arc::new(ConsumerStats::default());
        let writer = BatchWriter::with_params(db, stats.clone(), 1, 100, Duration::from_secs(60));

        writer.enqueue(item("at://did:plc:userA/app.bsky.feed.post/a1")).await;
        writer.enqueue(item("at://did:plc:userB/app.bsky.feed.post/a2")).await;

        assert_eq!(writer.queue_depth().await, 1);
        assert_eq!(stats.dropped.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining_items() {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        let stats = Arc::new(ConsumerStats::default());
        let writer = BatchWriter::with_params(db.clone(), stats, 10_000, 100, Duration::from_secs(60));

        writer.enqueue(item("at://did:plc:userA/app.bsky.feed.post/a1")).await;
        writer.shutdown().await;

        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.total_posts, 1);
    }
}
