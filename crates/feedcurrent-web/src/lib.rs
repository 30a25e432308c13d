mod config;
mod error;
mod routes;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use feedcurrent_db::Database;
use feedcurrent_rank::RankingEngine;
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::ServiceConfig;
pub use error::{RequestError, RequestResult};

pub const LOG_TARGET: &str = "feedcurrent::web";

pub struct AppState {
    pub db: Arc<Database>,
    pub ranking: Arc<RankingEngine>,
    pub config: ServiceConfig,
}

#[derive(Debug, Snafu)]
pub enum WebServerError {
    #[snafu(transparent)]
    Io { source: io::Error },
}

pub type WebServerResult<T> = std::result::Result<T, WebServerError>;

/// Binds the listener and serves the feed skeleton endpoints until a
/// shutdown signal arrives.
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    pub async fn bind(
        listen: SocketAddr,
        db: Arc<Database>,
        ranking: Arc<RankingEngine>,
        config: ServiceConfig,
    ) -> WebServerResult<Self> {
        let listener = TcpListener::bind(listen).await.context(IoSnafu)?;
        info!(target: LOG_TARGET, addr = %listener.local_addr()?, "Listening");

        Ok(Self {
            listener,
            state: Arc::new(AppState { db, ranking, config }),
        })
    }

    pub fn addr(&self) -> WebServerResult<SocketAddr> {
        Ok(self.listener.local_addr().context(IoSnafu)?)
    }

    pub fn router(&self) -> axum::Router {
        routes::router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> WebServerResult<()> {
        let router = self.router();
        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context(IoSnafu)?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use feedcurrent_db::Database;
    use feedcurrent_rank::{RankingConfig, RankingEngine};
    use tower::ServiceExt;

    use super::*;

    async fn test_state() -> Arc<AppState> {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        let ranking = Arc::new(RankingEngine::new(db.clone(), RankingConfig::default()));
        Arc::new(AppState {
            db,
            ranking,
            config: ServiceConfig::new("feed.example.com".into(), "trending-news".into()),
        })
    }

    #[tokio::test]
    async fn root_describes_service() {
        let router = routes::router(test_state().await);
        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn feed_skeleton_rejects_unknown_feed() {
        let router = routes::router(test_state().await);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/xrpc/app.bsky.feed.getFeedSkeleton?feed=at://did:plc:x/app.bsky.feed.generator/other")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn feed_skeleton_accepts_matching_feed() {
        let router = routes::router(test_state().await);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/xrpc/app.bsky.feed.getFeedSkeleton?feed=at://did:plc:x/app.bsky.feed.generator/trending-news")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_healthy_on_empty_db() {
        let router = routes::router(test_state().await);
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stats_reports_aggregated_counters() {
        let router = routes::router(test_state().await);
        let response = router
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
