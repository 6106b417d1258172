//! User identity extraction.
//!
//! Authentication itself is delegated to the hosted auth provider sitting
//! in front of this server; by the time a request arrives here the
//! provider has resolved the session and forwards the user id in the
//! `X-User-Id` header. Requests without one are rejected immediately.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use charla_core::CharlaError;
use uuid::Uuid;

/// Header carrying the authenticated user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or((
                StatusCode::UNAUTHORIZED,
                CharlaError::AuthenticationRequired.to_string(),
            ))?;

        let user_id = Uuid::parse_str(header).map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                format!("Invalid user id: {}", header),
            )
        })?;

        Ok(UserId(user_id))
    }
}
