use chrono::{DateTime, Utc};

/// Input to `add_post`/`add_posts_batch`: everything Storage needs to
/// create a Post row, independent of the URL it links to.
#[derive(Debug, Clone)]
pub struct PostFields {
    pub uri: String,
    pub cid: String,
    pub author_did: String,
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One item submitted to the batch writer / `add_posts_batch`: a post plus
/// the single normalized URL it carries and that URL's registrable host.
#[derive(Debug, Clone)]
pub struct PostInsert {
    pub post: PostFields,
    pub url: String,
    pub host: String,
}

/// Flat read projection joining Post with its single URL.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostProjection {
    pub uri: String,
    pub cid: String,
    pub author_did: String,
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub repost_count: i64,
    pub url: String,
    pub host: String,
    pub share_count: i64,
    pub url_first_seen: DateTime<Utc>,
    pub shared_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UrlRow {
    pub id: i64,
    pub url: String,
    pub host: String,
    pub first_seen: DateTime<Utc>,
    pub share_count: i64,
}

/// A single row handed to the ranking engine: enough of Post+URL to score
/// and paginate without a second query per candidate.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RankCandidate {
    pub post_uri: String,
    pub repost_count: i64,
    pub url: String,
    pub share_count: i64,
    pub url_first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Stats {
    pub total_posts: i64,
    pub total_urls: i64,
    pub total_shares: i64,
}
