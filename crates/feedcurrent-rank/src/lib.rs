pub mod config;
pub mod cursor;
pub mod engine;

pub use config::RankingConfig;
pub use cursor::Cursor;
pub use engine::{FeedPage, RankError, RankResult, RankedPost, RankingEngine, RankingStats};
