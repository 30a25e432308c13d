use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use snafu::Snafu;
use tracing::info;

#[derive(Debug, Snafu)]
pub enum RequestError {
    #[snafu(display("Unknown feed: {feed}"))]
    UnknownFeed { feed: String },
    #[snafu(transparent)]
    Ranking { source: feedcurrent_rank::RankError },
    #[snafu(transparent)]
    Storage { source: feedcurrent_db::DbError },
}

pub type RequestResult<T> = std::result::Result<T, RequestError>;

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        info!(err = %self, "Request error");
        let detail = self.to_string();

        let status = match self {
            RequestError::UnknownFeed { .. } => StatusCode::BAD_REQUEST,
            RequestError::Ranking { .. } | RequestError::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}
