//! Routes kept for clients of the previous gateway API.
//!
//! Parameters arrive in the query string, successes return the bare
//! payload and failures return `{"detail": …}` with the mapped status.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hostgate_core::GatewayError;
use hostgate_tool_runtime::ToolRequest;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::status_for;
use crate::state::AppState;

/// Lines returned by `get_container_logs`.
pub const LEGACY_LOG_TAIL: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct DockerCommandQuery {
    pub action: String,
    pub container_name: Option<String>,
    pub image_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SystemCommandQuery {
    #[serde(default)]
    pub command: String,
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

fn failure(err: GatewayError) -> Response {
    detail(status_for(err.kind()), err.message())
}

fn require<'a>(value: &'a Option<String>, field: &str, purpose: &str) -> Result<&'a str, Response> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(detail(
            StatusCode::BAD_REQUEST,
            format!("{field} is required to {purpose}"),
        )),
    }
}

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Name for an unnamed run: `<image stem>-<unix millis>-<seq>`.
fn generated_name(image: &str) -> String {
    let stem = image.rsplit('/').next().unwrap_or(image);
    let stem = stem.split([':', '@']).next().unwrap_or(stem);
    let mut stem: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .take(64)
        .collect();
    if !stem.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        stem = "container".to_string();
    }
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{stem}-{millis}-{seq}")
}

/// Lifecycle outcome in the legacy `{id, name, status}` shape.
fn lifecycle(data: &Value, status: &str) -> Value {
    json!({ "id": data["id"], "name": data["name"], "status": status })
}

pub async fn docker_command(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DockerCommandQuery>,
) -> Response {
    match run_docker_action(&state, &query).await {
        Ok(value) => Json(value).into_response(),
        Err(response) => response,
    }
}

async fn run_docker_action(state: &AppState, query: &DockerCommandQuery) -> Result<Value, Response> {
    let (tool, params) = match query.action.as_str() {
        "list_containers" => ("list_containers", json!({ "include_stopped": false })),
        "list_images" => ("list_images", json!({})),
        "run_container" => {
            let image = require(&query.image_name, "image_name", "run a container")?;
            let name = match query.container_name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => generated_name(image),
            };
            ("create_container", json!({ "image": image, "name": name, "detach": true }))
        }
        "stop_container" => {
            let name = require(&query.container_name, "container_name", "stop a container")?;
            ("stop_container", json!({ "name": name }))
        }
        "remove_container" => {
            let name = require(&query.container_name, "container_name", "remove a container")?;
            ("delete_container", json!({ "name": name, "force": false }))
        }
        "inspect_container" => {
            let name = require(&query.container_name, "container_name", "inspect a container")?;
            ("inspect_container", json!({ "name": name }))
        }
        "get_container_logs" => {
            let name = require(&query.container_name, "container_name", "get container logs")?;
            ("container_logs", json!({ "name": name, "tail": LEGACY_LOG_TAIL }))
        }
        other => {
            return Err(detail(
                StatusCode::BAD_REQUEST,
                format!("Unsupported Docker action: {other}"),
            ))
        }
    };

    let data = state
        .dispatcher
        .dispatch(ToolRequest::new(tool, params))
        .await
        .into_result()
        .map_err(failure)?;

    Ok(match query.action.as_str() {
        "list_containers" => data["containers"].clone(),
        "list_images" => data["images"].clone(),
        "run_container" => lifecycle(&data, "started"),
        "stop_container" => lifecycle(&data, "stopped"),
        "remove_container" => lifecycle(&data, "removed"),
        "inspect_container" => data["attributes"].clone(),
        "get_container_logs" => json!({ "logs": data["logs"] }),
        _ => data,
    })
}

pub async fn system_command(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SystemCommandQuery>,
) -> Response {
    if query.command.trim().is_empty() {
        return detail(StatusCode::BAD_REQUEST, "Command cannot be empty.");
    }
    let request = ToolRequest::new("execute_system_command", json!({ "command": query.command }));
    match state.dispatcher.dispatch(request).await.into_result() {
        Ok(value) => Json(value).into_response(),
        Err(err) => failure(err),
    }
}
