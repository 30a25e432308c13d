mod app;
mod cli;

use std::io;
use std::sync::Arc;

use app::App;
use clap::Parser;
use cli::{ClearOpts, Mode, Opts, ServerOpts};
use feedcurrent_ingest::{JsonMapBlockDecoder, NullFirehoseSource, StreamConsumer};
use feedcurrent_web::{Server as WebServer, ServiceConfig};
use snafu::{ResultExt, Snafu};
use tokio::sync::watch;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

pub const LOG_TARGET: &str = "feedcurrent::cli";

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(transparent)]
    Init { source: app::InitError },
    #[snafu(display("Web server error: {source}"))]
    WebServer { source: feedcurrent_web::WebServerError },
    #[snafu(display("Storage error: {source}"))]
    Database { source: feedcurrent_db::DbError },
    #[snafu(display("Logging initialization failed"))]
    Logging,
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    init_logging().map_err(|_| CliError::Logging)?;

    let opts = Opts::parse();
    let app = Arc::new(App::init(&opts.global).await?);

    match opts.mode {
        Mode::Firehose => run_firehose(app).await,
        Mode::Server(server_opts) => run_server(app, server_opts).await,
        Mode::Both(server_opts) => run_both(app, server_opts).await,
        Mode::Clear(clear_opts) => run_clear(app, clear_opts).await,
    }
}

async fn run_firehose(app: Arc<App>) -> CliResult<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush_task = tokio::spawn(
        app.batch_writer
            .clone()
            .run_periodic_flush(shutdown_rx.clone()),
    );

    let mut consumer = StreamConsumer::new(
        NullFirehoseSource,
        Arc::new(JsonMapBlockDecoder),
        app.domain_filter.clone(),
        app.batch_writer.clone(),
        app.db.clone(),
        app.stats.clone(),
    );

    info!(target: LOG_TARGET, "Starting firehose listener");
    consumer.run(shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    let _ = flush_task.await;
    app.batch_writer.shutdown().await;
    Ok(())
}

async fn run_server(app: Arc<App>, opts: ServerOpts) -> CliResult<()> {
    let config = ServiceConfig::new(opts.hostname.clone(), opts.feed_name.clone());
    info!(target: LOG_TARGET, hostname = %opts.hostname, "Starting feed server");

    let server = WebServer::bind(opts.listen, app.db.clone(), app.ranking.clone(), config)
        .await
        .context(WebServerSnafu)?;

    server.run().await.context(WebServerSnafu)
}

async fn run_both(app: Arc<App>, server_opts: ServerOpts) -> CliResult<()> {
    let app_for_firehose = app.clone();
    let firehose_task = tokio::spawn(async move { run_firehose(app_for_firehose).await });
    let server_result = run_server(app, server_opts).await;

    match firehose_task.await {
        Ok(result) => result.and(server_result),
        Err(_) => server_result,
    }
}

async fn run_clear(app: Arc<App>, opts: ClearOpts) -> CliResult<()> {
    let (start, end) = match opts.days {
        Some(days) => (None, Some(chrono::Utc::now() - chrono::Duration::days(days))),
        None => (opts.start_date, opts.end_date),
    };

    let deleted = app
        .db
        .delete_posts_in_period(start, end)
        .await
        .context(DatabaseSnafu)?;
    info!(target: LOG_TARGET, deleted, "Deleted posts in period");

    if opts.cleanup_urls {
        let swept = app.db.cleanup_orphaned_urls().await.context(DatabaseSnafu)?;
        info!(target: LOG_TARGET, swept, "Swept orphaned URLs");
    }

    Ok(())
}

pub fn init_logging() -> Result<(), ()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| ())
}
