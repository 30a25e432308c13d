use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use crate::error::{RequestResult, UnknownFeedSnafu};
use crate::AppState;

pub const LOG_TARGET: &str = "feedcurrent::web";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/.well-known/did.json", get(did_document))
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(describe_feed_generator),
        )
        .route("/xrpc/app.bsky.feed.getFeedSkeleton", get(get_feed_skeleton))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": "feedcurrent",
        "description": "A custom feed displaying posts from whitelisted news domains",
        "service_did": state.config.service_did(),
        "feed_name": state.config.feed_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn did_document(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": state.config.service_did(),
        "service": [
            {
                "id": "#bsky_fg",
                "type": "BskyFeedGenerator",
                "serviceEndpoint": state.config.hostname,
            }
        ]
    }))
}

async fn describe_feed_generator(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "did": state.config.service_did(),
        "feeds": [],
    }))
}

#[derive(Debug, Deserialize)]
struct FeedSkeletonQuery {
    feed: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    cursor: Option<String>,
}

const MIN_LIMIT: usize = 1;
const MAX_LIMIT: usize = 100;
const DEFAULT_LIMIT: usize = 50;

#[instrument(target = "feedcurrent::web", skip(state))]
async fn get_feed_skeleton(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedSkeletonQuery>,
) -> RequestResult<Json<Value>> {
    if !state.config.accepts_feed(&query.feed) {
        return UnknownFeedSnafu { feed: query.feed }.fail();
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(MIN_LIMIT, MAX_LIMIT);

    let page = state
        .ranking
        .get_feed_skeleton(limit, query.cursor.as_deref())
        .await?;

    let feed: Vec<Value> = page
        .posts
        .iter()
        .map(|post| json!({"post": post.uri}))
        .collect();

    Ok(Json(json!({
        "feed": feed,
        "cursor": page.cursor,
    })))
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: String,
    components: HealthComponents,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_stats: Option<feedcurrent_db::Stats>,
}

#[derive(Serialize)]
struct HealthComponents {
    database: String,
    ranking_engine: &'static str,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut status = "healthy";
    let (database, database_stats) = match state.db.get_stats().await {
        Ok(stats) => ("healthy".to_string(), Some(stats)),
        Err(err) => {
            status = "degraded";
            (format!("unhealthy: {err}"), None)
        }
    };

    let body = HealthBody {
        status,
        timestamp: Utc::now().to_rfc3339(),
        components: HealthComponents {
            database,
            ranking_engine: "healthy",
        },
        database_stats,
    };

    let code = if status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(body))
}

async fn stats(State(state): State<Arc<AppState>>) -> RequestResult<Json<Value>> {
    let db_stats = state.db.get_stats().await?;
    let ranking_stats = state.ranking.get_ranking_stats().await?;

    Ok(Json(json!({
        "database": db_stats,
        "ranking": {
            "candidate_count": ranking_stats.candidate_count,
            "top_score": ranking_stats.top_score,
            "average_score": ranking_stats.average_score,
        },
        "service_did": state.config.service_did(),
        "feed_name": state.config.feed_name,
    })))
}
