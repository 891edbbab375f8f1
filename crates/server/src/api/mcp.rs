//! `POST /mcp`: one JSON-RPC message per request.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hostgate_mcp::{JsonRpcResponse, McpError, McpServer, RpcId};
use serde_json::Value;

use crate::state::AppState;

/// The auth middleware has already run, so each request gets a
/// pre-authenticated session. Notifications are acknowledged with 202.
pub async fn mcp(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let resp = JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: RpcId::Number(0),
                result: None,
                error: Some(McpError::JsonParse(e).to_rpc_error()),
            };
            return Json(resp).into_response();
        }
    };

    let mut session = McpServer::pre_authenticated(state.dispatcher.clone());
    match session.handle_message(raw).await {
        Some(resp) => Json(resp).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
