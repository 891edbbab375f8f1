//! `GET /tools` and `POST /tools/{name}`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use hostgate_core::GatewayError;
use hostgate_tool_runtime::{ToolRequest, ToolResult};
use serde::Serialize;
use serde_json::Value;

use super::{failure_response, result_response};
use crate::state::AppState;

#[derive(Serialize)]
pub struct ToolListing {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<ToolListing>,
}

pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ToolsResponse> {
    let tools = state
        .dispatcher
        .definitions()
        .into_iter()
        .map(|def| ToolListing {
            input_schema: def.input_schema(),
            name: def.name,
            description: def.description,
        })
        .collect();
    Json(ToolsResponse { tools })
}

/// Body is the parameter object; an empty body means no parameters.
pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<ToolResult>) {
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(v) => v,
            Err(e) => {
                return failure_response(GatewayError::validation(format!(
                    "request body is not valid JSON: {e}"
                )))
            }
        }
    };

    result_response(state.dispatcher.dispatch(ToolRequest::new(name, params)).await)
}
