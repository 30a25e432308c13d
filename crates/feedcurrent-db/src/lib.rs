pub mod error;
pub mod model;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
pub use error::{DbError, DbResult};
pub use model::{PostFields, PostInsert, PostProjection, RankCandidate, Stats, UrlRow};
use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub const LOG_TARGET: &str = "feedcurrent::db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    host TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    share_count INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_urls_host ON urls(host);
CREATE INDEX IF NOT EXISTS idx_urls_share_count ON urls(share_count);

CREATE TABLE IF NOT EXISTS posts (
    uri TEXT PRIMARY KEY,
    cid TEXT NOT NULL,
    author_did TEXT NOT NULL,
    text TEXT,
    created_at TEXT NOT NULL,
    indexed_at TEXT NOT NULL,
    repost_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_posts_repost_count ON posts(repost_count);
CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);

CREATE TABLE IF NOT EXISTS post_urls (
    post_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    url_id INTEGER NOT NULL REFERENCES urls(id) ON DELETE CASCADE,
    shared_at TEXT NOT NULL,
    PRIMARY KEY (post_uri, url_id)
);
CREATE INDEX IF NOT EXISTS idx_post_urls_shared_at ON post_urls(shared_at);
"#;

/// Owns the one durable store on local disk. Every public method is
/// a single atomic transaction; callers never see a partially-applied
/// write.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if absent) the SQLite file at `path`, applies the
    /// concurrency pragmas, and runs the idempotent schema migration.
    #[instrument(target = "feedcurrent::db", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .context(error::OpenSnafu {
                path: path.display().to_string(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context(error::OpenSnafu {
                path: path.display().to_string(),
            })?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// An isolated in-memory instance, one per call, so tests never share
    /// state with each other.
    pub async fn new_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context(error::OpenSnafu {
                path: ":memory:".to_string(),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context(error::OpenSnafu {
                path: ":memory:".to_string(),
            })?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    #[instrument(target = "feedcurrent::db", skip_all)]
    async fn initialize(&self) -> DbResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context(error::MigrateSnafu)?;
        Ok(())
    }

    /// Finds the URL row id for `url` without mutating it. The caller
    /// increments or creates it only once a new Post has actually been
    /// confirmed, so a duplicate sighting of an already-stored post never
    /// inflates `share_count`.
    async fn find_url_id(
        tx: &mut sqlx::SqliteConnection,
        url: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query("SELECT id FROM urls WHERE url = ?")
            .bind(url)
            .fetch_optional(&mut *tx)
            .await?;
        row.map(|row| row.try_get("id")).transpose()
    }

    /// Increments an existing URL's share_count, or creates it with
    /// share_count 1. Only called once a Link is actually about to be
    /// created.
    async fn touch_url(
        tx: &mut sqlx::SqliteConnection,
        existing_id: Option<i64>,
        url: &str,
        host: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        if let Some(id) = existing_id {
            sqlx::query("UPDATE urls SET share_count = share_count + 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            return Ok(id);
        }

        let result = sqlx::query(
            "INSERT INTO urls (url, host, first_seen, share_count) VALUES (?, ?, ?, 1)",
        )
        .bind(url)
        .bind(host)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn try_insert_post(
        tx: &mut sqlx::SqliteConnection,
        fields: &PostFields,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO posts (uri, cid, author_did, text, created_at, indexed_at, repost_count) \
             VALUES (?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&fields.uri)
        .bind(&fields.cid)
        .bind(&fields.author_did)
        .bind(&fields.text)
        .bind(fields.created_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        Ok(inserted.rows_affected() > 0)
    }

    /// Upsert-by-URL, insert-Post, insert-Link in one transaction.
    /// Returns `true` if the Post is new, `false` if it already existed
    /// (duplicate sightings are silently rejected).
    #[instrument(target = "feedcurrent::db", skip_all, fields(uri = %item.post.uri))]
    pub async fn add_post(&self, item: &PostInsert) -> DbResult<bool> {
        let mut tx = self.pool.begin().await.context(error::QuerySnafu)?;
        let now = Utc::now();

        let existing_id = Self::find_url_id(&mut tx, &item.url)
            .await
            .context(error::QuerySnafu)?;

        let is_new = Self::try_insert_post(&mut tx, &item.post, now)
            .await
            .context(error::QuerySnafu)?;

        if is_new {
            let url_id = Self::touch_url(&mut tx, existing_id, &item.url, &item.host, now)
                .await
                .context(error::QuerySnafu)?;

            sqlx::query("INSERT INTO post_urls (post_uri, url_id, shared_at) VALUES (?, ?, ?)")
                .bind(&item.post.uri)
                .bind(url_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context(error::QuerySnafu)?;
        }

        tx.commit().await.context(error::QuerySnafu)?;
        Ok(is_new)
    }

    /// Same semantics as `add_post`, per element, in one transaction.
    /// Duplicates are skipped without aborting the batch; any other
    /// failure aborts the whole batch.
    #[instrument(target = "feedcurrent::db", skip_all, fields(n = items.len()))]
    pub async fn add_posts_batch(&self, items: &[PostInsert]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await.context(error::QuerySnafu)?;
        let mut inserted_count = 0usize;

        for item in items {
            let now = Utc::now();

            let existing_id = Self::find_url_id(&mut tx, &item.url)
                .await
                .context(error::QuerySnafu)?;

            let is_new = Self::try_insert_post(&mut tx, &item.post, now)
                .await
                .context(error::QuerySnafu)?;

            if is_new {
                let url_id = Self::touch_url(&mut tx, existing_id, &item.url, &item.host, now)
                    .await
                    .context(error::QuerySnafu)?;

                sqlx::query(
                    "INSERT INTO post_urls (post_uri, url_id, shared_at) VALUES (?, ?, ?)",
                )
                .bind(&item.post.uri)
                .bind(url_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context(error::QuerySnafu)?;
                inserted_count += 1;
            }
        }

        tx.commit().await.context(error::QuerySnafu)?;
        Ok(inserted_count)
    }

    /// Best-effort increment; no-op if the Post does not exist.
    #[instrument(target = "feedcurrent::db", skip_all, fields(uri))]
    pub async fn increment_repost_count(&self, uri: &str) -> DbResult<bool> {
        let result = sqlx::query("UPDATE posts SET repost_count = repost_count + 1 WHERE uri = ?")
            .bind(uri)
            .execute(&self.pool)
            .await
            .context(error::QuerySnafu)?;
        Ok(result.rows_affected() > 0)
    }

    /// Half-open window delete on `created_at`; cascades to Links via the
    /// foreign key, never touches URLs.
    pub async fn delete_posts_in_period(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> DbResult<u64> {
        if start.is_none() && end.is_none() {
            return Ok(0);
        }

        let result = match (start, end) {
            (Some(start), Some(end)) => {
                sqlx::query("DELETE FROM posts WHERE created_at >= ? AND created_at < ?")
                    .bind(start)
                    .bind(end)
                    .execute(&self.pool)
                    .await
            }
            (Some(start), None) => {
                sqlx::query("DELETE FROM posts WHERE created_at >= ?")
                    .bind(start)
                    .execute(&self.pool)
                    .await
            }
            (None, Some(end)) => {
                sqlx::query("DELETE FROM posts WHERE created_at < ?")
                    .bind(end)
                    .execute(&self.pool)
                    .await
            }
            (None, None) => unreachable!(),
        }
        .context(error::QuerySnafu)?;

        Ok(result.rows_affected())
    }

    /// Convenience for `delete_posts_in_period(end = now - days)`.
    pub async fn delete_old_posts(&self, days: i64) -> DbResult<u64> {
        let end = Utc::now() - chrono::Duration::days(days);
        self.delete_posts_in_period(None, Some(end)).await
    }

    /// Deletes URLs with no remaining Link.
    pub async fn cleanup_orphaned_urls(&self) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM urls WHERE id NOT IN (SELECT DISTINCT url_id FROM post_urls)",
        )
        .execute(&self.pool)
        .await
        .context(error::QuerySnafu)?;
        Ok(result.rows_affected())
    }

    pub async fn get_post(&self, uri: &str) -> DbResult<Option<PostProjection>> {
        let row = sqlx::query_as::<_, PostProjection>(PROJECTION_SELECT_BY_URI)
            .bind(uri)
            .fetch_optional(&self.pool)
            .await
            .context(error::QuerySnafu)?;
        Ok(row)
    }

    pub async fn get_url(&self, url: &str) -> DbResult<Option<UrlRow>> {
        let row = sqlx::query_as::<_, UrlRow>(
            "SELECT id, url, host, first_seen, share_count FROM urls WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .context(error::QuerySnafu)?;
        Ok(row)
    }

    pub async fn get_url_share_count(&self, url: &str) -> DbResult<Option<i64>> {
        Ok(self.get_url(url).await?.map(|row| row.share_count))
    }

    pub async fn get_posts_by_domain(
        &self,
        host: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<PostProjection>> {
        let rows = sqlx::query_as::<_, PostProjection>(&format!(
            "{PROJECTION_SELECT_BASE} WHERE u.host = ? ORDER BY p.created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(host)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context(error::QuerySnafu)?;
        Ok(rows)
    }

    pub async fn get_recent_posts(&self, hours: i64, limit: i64) -> DbResult<Vec<PostProjection>> {
        let since = Utc::now() - chrono::Duration::hours(hours);
        let rows = sqlx::query_as::<_, PostProjection>(&format!(
            "{PROJECTION_SELECT_BASE} WHERE p.created_at >= ? ORDER BY p.created_at DESC LIMIT ?"
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context(error::QuerySnafu)?;
        Ok(rows)
    }

    pub async fn get_stats(&self) -> DbResult<Stats> {
        let row = sqlx::query(
            "SELECT \
                (SELECT COUNT(*) FROM posts) AS total_posts, \
                (SELECT COUNT(*) FROM urls) AS total_urls, \
                (SELECT COALESCE(SUM(share_count), 0) FROM urls) AS total_shares",
        )
        .fetch_one(&self.pool)
        .await
        .context(error::QuerySnafu)?;

        Ok(Stats {
            total_posts: row.try_get("total_posts").context(error::QuerySnafu)?,
            total_urls: row.try_get("total_urls").context(error::QuerySnafu)?,
            total_shares: row.try_get("total_shares").context(error::QuerySnafu)?,
        })
    }

    /// Candidate rows for the ranking engine's recent-window query, over-read
    /// by the caller's chosen multiple of the result limit, ordered by URL
    /// recency.
    pub async fn fetch_rank_candidates(&self, fetch_limit: i64) -> DbResult<Vec<RankCandidate>> {
        let rows = sqlx::query_as::<_, RankCandidate>(
            "SELECT p.uri AS post_uri, p.repost_count, u.url, u.share_count, u.first_seen AS url_first_seen \
             FROM posts p \
             JOIN post_urls pu ON pu.post_uri = p.uri \
             JOIN urls u ON u.id = pu.url_id \
             ORDER BY u.first_seen DESC \
             LIMIT ?",
        )
        .bind(fetch_limit)
        .fetch_all(&self.pool)
        .await
        .context(error::QuerySnafu)?;
        Ok(rows)
    }

    /// As `fetch_rank_candidates`, scoped to a single host.
    pub async fn fetch_rank_candidates_by_host(
        &self,
        host: &str,
        fetch_limit: i64,
    ) -> DbResult<Vec<RankCandidate>> {
        let rows = sqlx::query_as::<_, RankCandidate>(
            "SELECT p.uri AS post_uri, p.repost_count, u.url, u.share_count, u.first_seen AS url_first_seen \
             FROM posts p \
             JOIN post_urls pu ON pu.post_uri = p.uri \
             JOIN urls u ON u.id = pu.url_id \
             WHERE u.host = ? \
             ORDER BY u.first_seen DESC \
             LIMIT ?",
        )
        .bind(host)
        .bind(fetch_limit)
        .fetch_all(&self.pool)
        .await
        .context(error::QuerySnafu)?;
        Ok(rows)
    }
}

const PROJECTION_SELECT_BASE: &str = "SELECT p.uri, p.cid, p.author_did, p.text, p.created_at, \
     p.indexed_at, p.repost_count, u.url, u.host, u.share_count, \
     u.first_seen AS url_first_seen, pu.shared_at \
     FROM posts p \
     JOIN post_urls pu ON pu.post_uri = p.uri \
     JOIN urls u ON u.id = pu.url_id";

const PROJECTION_SELECT_BY_URI: &str = "SELECT p.uri, p.cid, p.author_did, p.text, p.created_at, \
     p.indexed_at, p.repost_count, u.url, u.host, u.share_count, \
     u.first_seen AS url_first_seen, pu.shared_at \
     FROM posts p \
     JOIN post_urls pu ON pu.post_uri = p.uri \
     JOIN urls u ON u.id = pu.url_id \
     WHERE p.uri = ?";

#[cfg(test)]
mod tests {
    use super::*;

    fn post(uri: &str) -> PostInsert {
        PostInsert {
            post: PostFields {
                uri: uri.to_string(),
                cid: "cid".to_string(),
                author_did: "did:plc:user".to_string(),
                text: Some("hello".to_string()),
                created_at: Utc::now(),
            },
            url: "https://nytimes.com/a".to_string(),
            host: "nytimes.com".to_string(),
        }
    }

    #[tokio::test]
    async fn add_post_then_duplicate_is_idempotent() {
        let db = Database::new_in_memory().await.unwrap();
        let item = post("at://did:plc:userA/app.bsky.feed.post/a1");

        assert!(db.add_post(&item).await.unwrap());
        assert!(!db.add_post(&item).await.unwrap());

        let url = db.get_url(&item.url).await.unwrap().unwrap();
        assert_eq!(url.share_count, 1);
    }

    #[tokio::test]
    async fn two_posts_same_url_increments_share_count() {
        let db = Database::new_in_memory().await.unwrap();
        let mut a = post("at://did:plc:userA/app.bsky.feed.post/a1");
        let mut b = post("at://did:plc:userB/app.bsky.feed.post/a2");
        a.post.author_did = "did:plc:userA".to_string();
        b.post.author_did = "did:plc:userB".to_string();

        assert!(db.add_post(&a).await.unwrap());
        assert!(db.add_post(&b).await.unwrap());

        let url = db.get_url(&a.url).await.unwrap().unwrap();
        assert_eq!(url.share_count, 2);
    }

    #[tokio::test]
    async fn batch_insert_skips_duplicates_without_overcounting_share() {
        let db = Database::new_in_memory().await.unwrap();
        let item = post("at://did:plc:userA/app.bsky.feed.post/a1");
        let items = vec![item.clone(), item.clone()];

        let n = db.add_posts_batch(&items).await.unwrap();
        assert_eq!(n, 1);

        let url = db.get_url(&item.url).await.unwrap().unwrap();
        assert_eq!(url.share_count, 1);
    }

    #[tokio::test]
    async fn repost_increment_is_best_effort() {
        let db = Database::new_in_memory().await.unwrap();
        let item = post("at://did:plc:userA/app.bsky.feed.post/a1");
        db.add_post(&item).await.unwrap();

        assert!(db.increment_repost_count(&item.post.uri).await.unwrap());
        assert!(
            !db.increment_repost_count("at://did:plc:userZ/app.bsky.feed.post/missing")
                .await
                .unwrap()
        );

        let row = db.get_post(&item.post.uri).await.unwrap().unwrap();
        assert_eq!(row.repost_count, 1);
    }

    #[tokio::test]
    async fn window_delete_then_orphan_sweep() {
        let db = Database::new_in_memory().await.unwrap();
        let now = Utc::now();

        let mut old = post("at://did:plc:userA/app.bsky.feed.post/old");
        old.post.created_at = now - chrono::Duration::days(30);
        old.url = "https://nytimes.com/old".to_string();

        let mut recent = post("at://did:plc:userB/app.bsky.feed.post/recent");
        recent.post.created_at = now - chrono::Duration::days(1);

        db.add_post(&old).await.unwrap();
        db.add_post(&recent).await.unwrap();

        let deleted = db.delete_old_posts(7).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_post(&old.post.uri).await.unwrap().is_none());

        assert!(db.get_url(&old.url).await.unwrap().is_some());
        let swept = db.cleanup_orphaned_urls().await.unwrap();
        assert_eq!(swept, 1);
        assert!(db.get_url(&old.url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_reflect_inserts() {
        let db = Database::new_in_memory().await.unwrap();
        db.add_post(&post("at://did:plc:userA/app.bsky.feed.post/a1"))
            .await
            .unwrap();

        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.total_posts, 1);
        assert_eq!(stats.total_urls, 1);
        assert_eq!(stats.total_shares, 1);
    }
}
