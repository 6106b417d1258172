//! HTTP route handlers.

pub mod conversations;
pub mod messages;

use axum::http::StatusCode;
use axum::Json;
use charla_core::CharlaError;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Map a core error to an HTTP response.
pub(crate) fn error_response(e: CharlaError) -> (StatusCode, String) {
    let status = match &e {
        CharlaError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        CharlaError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        CharlaError::EmptyMessage => StatusCode::BAD_REQUEST,
        CharlaError::SequenceContention(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
