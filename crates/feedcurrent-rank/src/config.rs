use std::path::Path;

use feedcurrent_core::config::load_json_config;
use serde::{Deserialize, Serialize};

/// Ranking parameters and their defaults. Loaded once at startup and
/// swappable at runtime via `RankingEngine::reload_config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    pub decay_rate: f64,
    pub max_age_hours: f64,
    pub min_share_count: i64,
    pub min_repost_count: i64,
    pub repost_weight: f64,
    pub results_limit: usize,
    pub max_posts_per_url: Option<usize>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.05,
            max_age_hours: 72.0,
            min_share_count: 1,
            min_repost_count: 0,
            repost_weight: 1.0,
            results_limit: 50,
            max_posts_per_url: Some(2),
        }
    }
}

impl RankingConfig {
    /// Loads from `path`; a missing or malformed file soft-fails to
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Self {
        load_json_config(path).unwrap_or_default()
    }
}
