use axum::{
    Json,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

use super::error_responses::ErrorResponse;

/// Fallback for both servers; answers in the same shape as use-case errors.
pub async fn not_found(uri: Uri) -> Response {
    debug!(path = %uri.path(), "router: no route matched");
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            code: StatusCode::NOT_FOUND.as_u16(),
            message: format!("no route for {}", uri.path()),
        }),
    )
        .into_response()
}

pub async fn health_check() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}
