//! REST and JSON-RPC endpoints.
//!
//! Shared failure → status mapping lives here in mod.rs.

mod health;
mod mcp;
mod tools;

use axum::http::StatusCode;
use axum::Json;
use hostgate_core::{ErrorKind, GatewayError};
use hostgate_tool_runtime::ToolResult;

/// HTTP status for a classified failure.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal | ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Envelope plus status for a dispatch outcome.
pub fn result_response(result: ToolResult) -> (StatusCode, Json<ToolResult>) {
    let status = match &result {
        ToolResult::Success(_) => StatusCode::OK,
        ToolResult::Failure(err) => status_for(err.kind()),
    };
    (status, Json(result))
}

pub fn failure_response(err: GatewayError) -> (StatusCode, Json<ToolResult>) {
    result_response(ToolResult::Failure(err))
}

// ── Re-exports ───────────────────────────────────────────────────

pub use health::health;
pub use mcp::mcp;
pub use tools::{call_tool, list_tools};
