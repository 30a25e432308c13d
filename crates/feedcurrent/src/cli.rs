use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub mode: Mode,
}

/// Options shared by every mode: database path, domain allow-list, and
/// ranking config, with a data directory fallback for an unspecified
/// database path.
#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the SQLite database file.
    #[arg(long, env = "FEEDCURRENT_DB")]
    pub db: Option<PathBuf>,

    /// Path to the domains allow-list JSON file.
    #[arg(long, env = "FEEDCURRENT_DOMAINS", default_value = "config/domains.json")]
    pub domains: PathBuf,

    /// Path to the ranking config JSON file.
    #[arg(long, env = "FEEDCURRENT_RANKING", default_value = "config/ranking.json")]
    pub ranking: PathBuf,
}

static PROJECT_DIRS: LazyLock<directories::ProjectDirs> = LazyLock::new(|| {
    directories::ProjectDirs::from("org", "feedcurrent", "feedcurrent")
        .expect("Unable to determine project's data dir")
});

impl GlobalOpts {
    pub fn database_path(&self) -> PathBuf {
        self.db.clone().unwrap_or_else(|| {
            PROJECT_DIRS.data_local_dir().join("feed.db")
        })
    }

    pub fn domains_config(&self) -> &Path {
        &self.domains
    }

    pub fn ranking_config(&self) -> PathBuf {
        self.ranking.clone()
    }
}

#[derive(Debug, Subcommand)]
pub enum Mode {
    /// Listen to the firehose and store posts from whitelisted domains.
    Firehose,
    /// Serve the ranked feed over HTTP.
    Server(ServerOpts),
    /// Run the firehose listener and feed server concurrently.
    Both(ServerOpts),
    /// Delete posts in a time window, optionally sweeping orphaned URLs.
    Clear(ClearOpts),
}

#[derive(Debug, Args)]
pub struct ServerOpts {
    /// Address to listen on.
    #[arg(long, env = "FEEDCURRENT_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: std::net::SocketAddr,

    /// Public hostname advertised in the service descriptor and DID document.
    #[arg(long, env = "FEEDCURRENT_HOSTNAME", default_value = "http://localhost:8000")]
    pub hostname: String,

    /// Feed name this server accepts in `getFeedSkeleton`.
    #[arg(long, env = "FEEDCURRENT_FEED_NAME", default_value = "trending-news")]
    pub feed_name: String,
}

#[derive(Debug, Args)]
pub struct ClearOpts {
    /// Delete posts on or after this ISO-8601 date (YYYY-MM-DD or full timestamp).
    #[arg(long, value_parser = parse_date)]
    pub start_date: Option<DateTime<Utc>>,

    /// Delete posts strictly before this ISO-8601 date.
    #[arg(long, value_parser = parse_date)]
    pub end_date: Option<DateTime<Utc>>,

    /// Delete posts older than this many days (alternative to a date range).
    #[arg(long, conflicts_with_all = ["start_date", "end_date"])]
    pub days: Option<i64>,

    /// Also sweep URLs left with no remaining post after the delete.
    #[arg(long)]
    pub cleanup_urls: bool,
}

fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc())
        .map_err(|_| format!("invalid date {value}, expected YYYY-MM-DD or RFC 3339"))
}
