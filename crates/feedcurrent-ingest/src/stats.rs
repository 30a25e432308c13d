use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

pub const LOG_TARGET: &str = "feedcurrent::ingest::stats";

/// Running counters for the stream consumer.
/// Incremented without locks; readers accept eventual consistency, as the
/// source's concurrency model calls for.
#[derive(Default)]
pub struct ConsumerStats {
    pub posts_seen: AtomicU64,
    pub posts_with_links: AtomicU64,
    pub posts_accepted: AtomicU64,
    pub reposts_seen: AtomicU64,
    pub reposts_applied: AtomicU64,
    pub errors: AtomicU64,
    pub dropped: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub posts_flushed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StatsSnapshot {
    pub posts_seen: u64,
    pub posts_with_links: u64,
    pub posts_accepted: u64,
    pub reposts_seen: u64,
    pub reposts_applied: u64,
    pub errors: u64,
    pub dropped: u64,
    pub batches_flushed: u64,
    pub posts_flushed: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            posts_seen: self.posts_seen.load(Ordering::Relaxed),
            posts_with_links: self.posts_with_links.load(Ordering::Relaxed),
            posts_accepted: self.posts_accepted.load(Ordering::Relaxed),
            reposts_seen: self.reposts_seen.load(Ordering::Relaxed),
            reposts_applied: self.reposts_applied.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            posts_flushed: self.posts_flushed.load(Ordering::Relaxed),
        }
    }
}

/// Logs posts/min, accepted/min, acceptance rate, queue depth, and elapsed
/// batches since `started_at` or the previous summary.
pub fn log_summary(stats: &ConsumerStats, started_at: Instant, queue_depth: usize) {
    let elapsed_min = (started_at.elapsed().as_secs_f64() / 60.0).max(1.0 / 60.0);
    let snapshot = stats.snapshot();

    let posts_per_min = snapshot.posts_seen as f64 / elapsed_min;
    let accepted_per_min = snapshot.posts_accepted as f64 / elapsed_min;
    let acceptance_rate = if snapshot.posts_seen > 0 {
        snapshot.posts_accepted as f64 / snapshot.posts_seen as f64
    } else {
        0.0
    };

    info!(
        target: LOG_TARGET,
        posts_per_min,
        accepted_per_min,
        acceptance_rate,
        queue_depth,
        batches_flushed = snapshot.batches_flushed,
        "Throughput summary"
    );
}
