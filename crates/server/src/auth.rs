//! Credential check applied to every route except `/health`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::failure_response;
use crate::state::AppState;

/// Header used by legacy clients.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Pull the caller's credential from `X-API-Key` or `Authorization: Bearer`.
pub fn credential(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    match state.auth.authorize(credential(request.headers())) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::warn!(path = %request.uri().path(), reason = %err.message(), "rejected request");
            failure_response(err).into_response()
        }
    }
}
