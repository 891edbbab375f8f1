//! HTTP router construction.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{api, auth, legacy};

/// Request bodies are parameter objects; nothing legitimate comes close.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/tools", get(api::list_tools))
        .route("/tools/{name}", post(api::call_tool))
        .route("/mcp", post(api::mcp))
        // Legacy compatibility
        .route("/docker_command", post(legacy::docker_command))
        .route("/system_command", post(legacy::system_command))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(api::health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
