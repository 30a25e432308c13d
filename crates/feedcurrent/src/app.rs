use std::sync::Arc;

use feedcurrent_core::DomainFilter;
use feedcurrent_db::Database;
use feedcurrent_ingest::BatchWriter;
use feedcurrent_rank::RankingEngine;
use snafu::{ResultExt, Snafu};
use tracing::info;

use crate::cli::GlobalOpts;

pub const LOG_TARGET: &str = "feedcurrent::app";

#[derive(Debug, Snafu)]
pub enum InitError {
    #[snafu(display("Failed to open database at {path}: {source}"))]
    Database { path: String, source: feedcurrent_db::DbError },
}

pub type InitResult<T> = std::result::Result<T, InitError>;

/// Holds every shared handle the operational modes need: one struct,
/// cloned `Arc`s handed to whichever background tasks need them, instead
/// of module-level globals.
pub struct App {
    pub db: Arc<Database>,
    pub domain_filter: Arc<DomainFilter>,
    pub batch_writer: Arc<BatchWriter>,
    pub ranking: Arc<RankingEngine>,
    pub stats: Arc<feedcurrent_ingest::ConsumerStats>,
}

impl App {
    pub async fn init(opts: &GlobalOpts) -> InitResult<Self> {
        let db_path = opts.database_path();
        if let Some(parent) = db_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let db = Arc::new(Database::open(&db_path).await.context(DatabaseSnafu {
            path: db_path.display().to_string(),
        })?);
        info!(target: LOG_TARGET, path = %db_path.display(), "Database opened");

        let domain_filter = Arc::new(DomainFilter::load(opts.domains_config()));
        info!(target: LOG_TARGET, domains = domain_filter.len(), "Domain filter loaded");

        let stats = Arc::new(feedcurrent_ingest::ConsumerStats::default());
        let batch_writer = BatchWriter::new(db.clone(), stats.clone());

        let ranking = Arc::new(RankingEngine::with_config_path(
            db.clone(),
            opts.ranking_config(),
        ));

        Ok(Self {
            db,
            domain_filter,
            batch_writer,
            ranking,
            stats,
        })
    }
}
