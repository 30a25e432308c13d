use std::sync::Arc;
use std::time::{Duration, Instant};

use feedcurrent_core::record::{PostRecord, RepostRecord};
use feedcurrent_core::{DomainFilter, normalize_record};
use feedcurrent_db::{Database, PostFields, PostInsert};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, instrument, warn};

use crate::batch_writer::BatchWriter;
use crate::source::{Action, BlockDecoder, CommitMessage, FirehoseMessage, FirehoseSource};
use feedcurrent_util_error::FmtCompact as _;

use crate::stats::{ConsumerStats, log_summary};

pub const LOG_TARGET: &str = "feedcurrent::ingest::consumer";

/// Default bound on concurrently running per-message workers. Spawning a
/// task per message unbounded would let a slow decode or storage write
/// pile up arbitrarily many tasks; this caps them with a semaphore.
pub const DEFAULT_MAX_CONCURRENT_WORKERS: usize = 512;

const SUMMARY_INTERVAL: Duration = Duration::from_secs(5 * 60);

const POST_PATH_PREFIX: &str = "app.bsky.feed.post/";
const REPOST_PATH_PREFIX: &str = "app.bsky.feed.repost/";

/// Reads decoded commit messages sequentially and, for each accepted
/// operation, dispatches a bounded worker. The reader itself never blocks
/// on decode work and never dies from a per-message error.
pub struct StreamConsumer<S, D> {
    source: S,
    decoder: Arc<D>,
    filter: Arc<DomainFilter>,
    writer: Arc<BatchWriter>,
    db: Arc<Database>,
    stats: Arc<ConsumerStats>,
    worker_slots: Arc<Semaphore>,
}

impl<S, D> StreamConsumer<S, D>
where
    S: FirehoseSource,
    D: BlockDecoder + 'static,
{
    pub fn new(
        source: S,
        decoder: Arc<D>,
        filter: Arc<DomainFilter>,
        writer: Arc<BatchWriter>,
        db: Arc<Database>,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self::with_worker_pool_size(
            source,
            decoder,
            filter,
            writer,
            db,
            stats,
            DEFAULT_MAX_CONCURRENT_WORKERS,
        )
    }

    pub fn with_worker_pool_size(
        source: S,
        decoder: Arc<D>,
        filter: Arc<DomainFilter>,
        writer: Arc<BatchWriter>,
        db: Arc<Database>,
        stats: Arc<ConsumerStats>,
        max_concurrent_workers: usize,
    ) -> Self {
        Self {
            source,
            decoder,
            filter,
            writer,
            db,
            stats,
            worker_slots: Arc::new(Semaphore::new(max_concurrent_workers)),
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Runs the read loop until `shutdown` fires. Never returns early on a
    /// per-message error.
    #[instrument(target = "feedcurrent::ingest::consumer", skip_all)]
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let started_at = Instant::now();
        let mut summary_interval = tokio::time::interval(SUMMARY_INTERVAL);
        summary_interval.tick().await;

        loop {
            tokio::select! {
                message = self.source.next_message() => {
                    match message {
                        Some(message) => self.dispatch(message).await,
                        None => break,
                    }
                }
                _ = summary_interval.tick() => {
                    log_summary(&self.stats, started_at, self.writer.queue_depth().await);
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Acquires a worker slot and spawns the per-message work, bounding
    /// concurrent in-flight decodes. Acquiring the permit is the consumer's
    /// only backpressure against its own worker count; the firehose reader
    /// still never blocks on decode work itself because the permit
    /// acquire+spawn pair returns immediately once a slot is available.
    async fn dispatch(&self, message: FirehoseMessage) {
        let FirehoseMessage::Commit(commit) = message else {
            return;
        };

        let Ok(permit) = self.worker_slots.clone().acquire_owned().await else {
            return;
        };

        let decoder = self.decoder.clone();
        let filter = self.filter.clone();
        let writer = self.writer.clone();
        let db = self.db.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let _permit = permit;
            process_commit(&commit, decoder.as_ref(), &filter, &writer, &db, &stats).await;
        });
    }
}

#[instrument(target = "feedcurrent::ingest::consumer", skip_all, fields(repo = %commit.repo))]
async fn process_commit<D: BlockDecoder>(
    commit: &CommitMessage,
    decoder: &D,
    filter: &DomainFilter,
    writer: &Arc<BatchWriter>,
    db: &Database,
    stats: &ConsumerStats,
) {
    for op in &commit.ops {
        if op.action != Action::Create {
            continue;
        }

        if op.path.starts_with(POST_PATH_PREFIX) {
            process_post_op(commit, op, decoder, filter, writer, stats).await;
        } else if op.path.starts_with(REPOST_PATH_PREFIX) {
            process_repost_op(commit, op, decoder, db, stats).await;
        }
    }
}

async fn process_post_op<D: BlockDecoder>(
    commit: &CommitMessage,
    op: &crate::source::Op,
    decoder: &D,
    filter: &DomainFilter,
    writer: &Arc<BatchWriter>,
    stats: &ConsumerStats,
) {
    use std::sync::atomic::Ordering;

    stats.posts_seen.fetch_add(1, Ordering::Relaxed);

    let value = match decoder.decode(&commit.blocks, &op.cid) {
        Ok(value) => value,
        Err(err) => {
            debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Dropping malformed post block");
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let record: PostRecord = match serde_json::from_value(value) {
        Ok(record) => record,
        Err(err) => {
            debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Dropping post record with unexpected shape");
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    if !record.has_link_indication() {
        return;
    }
    stats.posts_with_links.fetch_add(1, Ordering::Relaxed);

    let Some(normalized) = normalize_record(&record) else {
        return;
    };

    if !filter.is_allowed(&normalized.host) {
        return;
    }

    let uri = format!("at://{}/app.bsky.feed.post/{}", commit.repo, op.path.rsplit('/').next().unwrap_or_default());

    let insert = PostInsert {
        post: PostFields {
            uri,
            cid: op.cid.clone(),
            author_did: commit.repo.clone(),
            text: Some(record.text).filter(|t| !t.is_empty()),
            created_at: commit.time,
        },
        url: normalized.url,
        host: normalized.host,
    };

    stats.posts_accepted.fetch_add(1, Ordering::Relaxed);
    writer.enqueue(insert).await;
}

async fn process_repost_op<D: BlockDecoder>(
    commit: &CommitMessage,
    op: &crate::source::Op,
    decoder: &D,
    db: &Database,
    stats: &ConsumerStats,
) {
    use std::sync::atomic::Ordering;

    stats.reposts_seen.fetch_add(1, Ordering::Relaxed);

    let value = match decoder.decode(&commit.blocks, &op.cid) {
        Ok(value) => value,
        Err(err) => {
            debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Dropping malformed repost block");
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let record: RepostRecord = match serde_json::from_value(value) {
        Ok(record) => record,
        Err(err) => {
            debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Dropping repost record with unexpected shape");
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match db.increment_repost_count(&record.subject.uri).await {
        Ok(existed) => {
            if existed {
                stats.reposts_applied.fetch_add(1, Ordering::Relaxed);
            }
        }
        Err(err) => {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Repost increment failed");
            stats.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use feedcurrent_core::domain_filter::DomainsConfig;
    use serde_json::json;
    use tokio::sync::watch;

    use super::*;
    use crate::source::JsonMapBlockDecoder;

    struct FixedSource {
        messages: VecDeque<FirehoseMessage>,
    }

    #[async_trait::async_trait]
    impl FirehoseSource for FixedSource {
        async fn next_message(&mut self) -> Option<FirehoseMessage> {
            self.messages.pop_front()
        }
    }

    fn commit_with_post(repo: &str, rkey: &str, uri: &str) -> FirehoseMessage {
        let record = json!({
            "text": "",
            "embed": {
                "$type": "app.bsky.embed.external",
                "external": {"uri": uri},
            },
        });
        let blocks = json!({"c1": record}).to_string().into_bytes();
        FirehoseMessage::Commit(CommitMessage {
            repo: repo.to_string(),
            time: chrono::Utc::now(),
            blocks,
            ops: vec![Op {
                action: Action::Create,
                path: format!("app.bsky.feed.post/{rkey}"),
                cid: "c1".to_string(),
            }],
        })
    }

    fn commit_with_repost(repo: &str, subject_uri: &str) -> FirehoseMessage {
        let record = json!({"subject": {"uri": subject_uri}});
        let blocks = json!({"c1": record}).to_string().into_bytes();
        FirehoseMessage::Commit(CommitMessage {
            repo: repo.to_string(),
            time: chrono::Utc::now(),
            blocks,
            ops: vec![Op {
                action: Action::Create,
                path: "app.bsky.feed.repost/rk1".to_string(),
                cid: "c1".to_string(),
            }],
        })
    }

    #[tokio::test]
    async fn accepted_post_reaches_storage() {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        let stats = Arc::new(ConsumerStats::default());
        let writer = BatchWriter::with_params(db.clone(), stats.clone(), 10_000, 1, Duration::from_secs(60));
        let filter = Arc::new(DomainFilter::from_config(DomainsConfig {
            domains: vec!["nytimes.com".to_string()],
            match_subdomains: false,
        }));

        let source = FixedSource {
            messages: VecDeque::from([commit_with_post(
                "did:plc:userA",
                "a1",
                "https://www.nytimes.com/a",
            )]),
        };

        let mut consumer = StreamConsumer::new(
            source,
            Arc::new(JsonMapBlockDecoder),
            filter,
            writer,
            db.clone(),
            stats,
        );

        let (_tx, rx) = watch::channel(false);
        consumer.run(rx).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.total_posts, 1);
    }

    #[tokio::test]
    async fn post_on_unlisted_domain_is_dropped() {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        let stats = Arc::new(ConsumerStats::default());
        let writer = BatchWriter::with_params(db.clone(), stats.clone(), 10_000, 1, Duration::from_secs(60));
        let filter = Arc::new(DomainFilter::from_config(DomainsConfig::default()));

        let source = FixedSource {
            messages: VecDeque::from([commit_with_post(
                "did:plc:userA",
                "a1",
                "https://www.example.com/a",
            )]),
        };

        let mut consumer = StreamConsumer::new(
            source,
            Arc::new(JsonMapBlockDecoder),
            filter,
            writer,
            db.clone(),
            stats,
        );

        let (_tx, rx) = watch::channel(false);
        consumer.run(rx).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.total_posts, 0);
    }

    #[tokio::test]
    async fn repost_increments_existing_post() {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        let stats = Arc::new(ConsumerStats::default());
        let writer = BatchWriter::with_params(db.clone(), stats.clone(), 10_000, 1, Duration::from_secs(60));
        let filter = Arc::new(DomainFilter::from_config(DomainsConfig {
            domains: vec!["nytimes.com".to_string()],
            match_subdomains: false,
        }));

        let post_uri = "at://did:plc:userA/app.bsky.feed.post/a1";
        let source = FixedSource {
            messages: VecDeque::from([
                commit_with_post("did:plc:userA", "a1", "https://nytimes.com/a"),
                commit_with_repost("did:plc:userB", post_uri),
            ]),
        };

        let mut consumer = StreamConsumer::new(
            source,
            Arc::new(JsonMapBlockDecoder),
            filter,
            writer,
            db.clone(),
            stats,
        );

        let (_tx, rx) = watch::channel(false);
        consumer.run(rx).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let row = db.get_post(post_uri).await.unwrap().unwrap();
        assert_eq!(row.repost_count, 1);
    }
}
