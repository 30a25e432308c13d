use std::path::PathBuf;
use std::sync::Arc;

use feedcurrent_db::{Database, RankCandidate};
use snafu::{ResultExt, Snafu};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::config::RankingConfig;
use crate::cursor::Cursor;

pub const LOG_TARGET: &str = "feedcurrent::rank";

#[derive(Debug, Snafu)]
pub enum RankError {
    #[snafu(transparent)]
    Storage { source: feedcurrent_db::DbError },
}

pub type RankResult<T> = std::result::Result<T, RankError>;

/// A scored, ranked post, ready to be returned to a feed client.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPost {
    pub uri: String,
    pub score: f64,
}

/// A single page of the ranked feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub posts: Vec<RankedPost>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RankingStats {
    pub candidate_count: usize,
    pub top_score: f64,
    pub average_score: f64,
}

/// Stateless per call; `reload_config` atomically swaps the configuration.
pub struct RankingEngine {
    db: Arc<Database>,
    config: RwLock<RankingConfig>,
    config_path: Option<PathBuf>,
}

/// Over-read multiplier applied to `results_limit` before filtering.
const OVER_READ_FACTOR: i64 = 5;
/// Tolerance for "same score" comparisons in cursor matching.
const SCORE_EPSILON: f64 = 1e-4;

impl RankingEngine {
    pub fn new(db: Arc<Database>, config: RankingConfig) -> Self {
        Self {
            db,
            config: RwLock::new(config),
            config_path: None,
        }
    }

    pub fn with_config_path(db: Arc<Database>, config_path: PathBuf) -> Self {
        let config = RankingConfig::load(&config_path);
        Self {
            db,
            config: RwLock::new(config),
            config_path: Some(config_path),
        }
    }

    pub async fn config(&self) -> RankingConfig {
        self.config.read().await.clone()
    }

    /// Re-reads the backing config file and swaps it in atomically. Keeps
    /// the old value (with a logged warning, from `RankingConfig::load`)
    /// on any I/O or parse failure.
    pub async fn reload_config(&self) {
        let Some(path) = self.config_path.as_ref() else {
            return;
        };
        let fresh = RankingConfig::load(path);
        *self.config.write().await = fresh;
    }

    /// `score = max(1, repost_count)^repost_weight * share_count *
    /// exp(-decay_rate * url_age_hours)`.
    pub fn calculate_score(
        repost_count: i64,
        share_count: i64,
        url_age_hours: f64,
        config: &RankingConfig,
    ) -> f64 {
        let effective_repost_count = repost_count.max(1) as f64;
        let weighted = effective_repost_count.powf(config.repost_weight);
        weighted * share_count as f64 * (-config.decay_rate * url_age_hours).exp()
    }

    #[instrument(target = "feedcurrent::rank", skip(self))]
    pub async fn rank_posts(&self, host: Option<&str>) -> RankResult<Vec<RankedPost>> {
        let config = self.config().await;
        let fetch_limit = config.results_limit as i64 * OVER_READ_FACTOR;

        let candidates = match host {
            Some(host) => {
                self.db
                    .fetch_rank_candidates_by_host(host, fetch_limit)
                    .await?
            }
            None => self.db.fetch_rank_candidates(fetch_limit).await?,
        };

        Ok(self.score_and_sort(candidates, &config))
    }

    fn score_and_sort(&self, candidates: Vec<RankCandidate>, config: &RankingConfig) -> Vec<RankedPost> {
        let now = chrono::Utc::now();

        let mut scored: Vec<RankedPost> = candidates
            .into_iter()
            .filter_map(|c| {
                if c.share_count < config.min_share_count || c.repost_count < config.min_repost_count {
                    return None;
                }

                let age_hours =
                    (now - c.url_first_seen).num_milliseconds() as f64 / 3_600_000.0;
                if age_hours > config.max_age_hours {
                    return None;
                }

                let score = Self::calculate_score(c.repost_count, c.share_count, age_hours, config);
                Some((RankedPost { uri: c.post_uri, score }, c.url))
            })
            .collect();

        // Sort by score desc, tie-broken by URI ascending for a stable order.
        scored.sort_by(|(a, _), (b, _)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.uri.cmp(&b.uri))
        });

        let scored = apply_max_per_url(scored, config.max_posts_per_url);

        scored.into_iter().map(|(post, _)| post).collect()
    }

    /// Computes the full ranked list (no pagination), applies the cursor
    /// protocol, and returns one page.
    #[instrument(target = "feedcurrent::rank", skip(self))]
    pub async fn get_feed_skeleton(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> RankResult<FeedPage> {
        let ranked = self.rank_posts(None).await?;
        let decoded_cursor = cursor.and_then(Cursor::decode);

        let start_index = match decoded_cursor {
            None => 0,
            Some(cursor) => match identity_match_index(&ranked, &cursor) {
                Some(index) => index + 1,
                None => score_lexicographic_skip_index(&ranked, &cursor),
            },
        };

        let remaining = &ranked[start_index.min(ranked.len())..];
        let page: Vec<RankedPost> = remaining.iter().take(limit).cloned().collect();
        let has_more = remaining.len() > page.len();

        let next_cursor = if has_more {
            page.last().map(|last| {
                Cursor {
                    score: last.score,
                    uri: last.uri.clone(),
                }
                .encode()
            })
        } else {
            None
        };

        Ok(FeedPage {
            posts: page,
            cursor: next_cursor,
        })
    }

    #[instrument(target = "feedcurrent::rank", skip(self))]
    pub async fn get_ranking_stats(&self) -> RankResult<RankingStats> {
        let ranked = self.rank_posts(None).await?;
        if ranked.is_empty() {
            return Ok(RankingStats::default());
        }

        let top_score = ranked.iter().map(|p| p.score).fold(f64::MIN, f64::max);
        let average_score = ranked.iter().map(|p| p.score).sum::<f64>() / ranked.len() as f64;

        Ok(RankingStats {
            candidate_count: ranked.len(),
            top_score,
            average_score,
        })
    }
}

fn identity_match_index(ranked: &[RankedPost], cursor: &Cursor) -> Option<usize> {
    ranked
        .iter()
        .position(|p| p.uri == cursor.uri && (p.score - cursor.score).abs() < SCORE_EPSILON)
}

fn score_lexicographic_skip_index(ranked: &[RankedPost], cursor: &Cursor) -> usize {
    ranked
        .iter()
        .position(|p| {
            p.score < cursor.score - SCORE_EPSILON
                || ((p.score - cursor.score).abs() < SCORE_EPSILON && p.uri > cursor.uri)
        })
        .unwrap_or(ranked.len())
}

/// Walks the sorted list keeping at most `max` entries per URL, preserving
/// order otherwise. `None` means unlimited.
fn apply_max_per_url(
    scored: Vec<(RankedPost, String)>,
    max: Option<usize>,
) -> Vec<(RankedPost, String)> {
    let Some(max) = max else { return scored };

    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    scored
        .into_iter()
        .filter(|(_, url)| {
            let count = counts.entry(url.clone()).or_insert(0);
            *count += 1;
            *count <= max
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RankingConfig {
        RankingConfig::default()
    }

    #[test]
    fn zero_reposts_clamp_to_one() {
        let c = config();
        let score_zero = RankingEngine::calculate_score(0, 5, 1.0, &c);
        let score_one = RankingEngine::calculate_score(1, 5, 1.0, &c);
        assert_eq!(score_zero, score_one);
    }

    #[test]
    fn score_strictly_decreasing_in_age() {
        let c = config();
        let near = RankingEngine::calculate_score(1, 5, 1.0, &c);
        let far = RankingEngine::calculate_score(1, 5, 24.0, &c);
        assert!(far < near);
    }

    #[test]
    fn recency_can_beat_share_count() {
        // A 24h-old post with share_count=10 loses to a 1h-old post with
        // share_count=5: recency can outweigh raw share count.
        let c = config();
        let score_x = RankingEngine::calculate_score(0, 10, 24.0, &c);
        let score_y = RankingEngine::calculate_score(0, 5, 1.0, &c);
        assert!(score_y > score_x);
        assert!((score_x - 3.01).abs() < 0.01);
        assert!((score_y - 4.76).abs() < 0.01);
    }

    #[test]
    fn max_per_url_caps_entries() {
        let scored = vec![
            (RankedPost { uri: "a".into(), score: 3.0 }, "u1".to_string()),
            (RankedPost { uri: "b".into(), score: 2.0 }, "u1".to_string()),
            (RankedPost { uri: "c".into(), score: 1.0 }, "u1".to_string()),
            (RankedPost { uri: "d".into(), score: 0.5 }, "u2".to_string()),
        ];
        let capped = apply_max_per_url(scored, Some(2));
        assert_eq!(capped.len(), 3);
        assert_eq!(capped[0].0.uri, "a");
        assert_eq!(capped[1].0.uri, "b");
        assert_eq!(capped[2].0.uri, "d");
    }

    #[test]
    fn identity_match_advances_past_matched_item() {
        let ranked = vec![
            RankedPost { uri: "a".into(), score: 3.0 },
            RankedPost { uri: "b".into(), score: 2.0 },
            RankedPost { uri: "c".into(), score: 1.0 },
        ];
        let cursor = Cursor { score: 2.0, uri: "b".into() };
        assert_eq!(identity_match_index(&ranked, &cursor), Some(1));
    }

    #[test]
    fn stale_cursor_falls_back_to_score_lexicographic_skip() {
        let ranked = vec![
            RankedPost { uri: "a".into(), score: 3.0 },
            RankedPost { uri: "b".into(), score: 1.5 },
            RankedPost { uri: "c".into(), score: 1.0 },
        ];
        // "b" with score 2.0 no longer exists at that score (stale).
        let cursor = Cursor { score: 2.0, uri: "x".into() };
        assert_eq!(identity_match_index(&ranked, &cursor), None);
        let index = score_lexicographic_skip_index(&ranked, &cursor);
        assert_eq!(index, 1); // first entry with score < 2.0
    }
}
