//! HTTP contract tests: drive the router in-process with `oneshot`
//! against the in-memory container runtime and schedule store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use hostgate_core::{AuthGate, Config};
use hostgate_server::{build_router, AppState};
use hostgate_tool_runtime::containers::ContainerStatus;
use hostgate_tool_runtime::testing::{test_services, FakeContainerRuntime, MemoryScheduleStore};
use hostgate_tool_runtime::build_dispatcher;

const KEY: &str = "integration-key";

struct Harness {
    app: Router,
    fake: Arc<FakeContainerRuntime>,
    store: Arc<MemoryScheduleStore>,
}

fn harness() -> Harness {
    let config = Config::with_api_key(KEY).unwrap();
    let (services, fake, store) = test_services(&config);
    let dispatcher = build_dispatcher(&services).unwrap();
    let state = Arc::new(AppState::new(dispatcher, AuthGate::new(KEY).unwrap()));
    Harness {
        app: build_router(state),
        fake,
        store,
    }
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-api-key", KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-api-key", KEY)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

// ── Health & auth ─────────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_credential() {
    let h = harness();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tools"], 17);
}

#[tokio::test]
async fn missing_credential_is_forbidden() {
    let h = harness();
    let req = Request::builder().uri("/tools").body(Body::empty()).unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["kind"], "auth");
}

#[tokio::test]
async fn wrong_credential_is_forbidden_and_not_echoed() {
    let h = harness();
    let req = Request::builder()
        .uri("/tools")
        .header("x-api-key", "guess-123")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let text = body.to_string();
    assert!(!text.contains("guess-123"));
    assert!(!text.contains(KEY));
}

#[tokio::test]
async fn bearer_credential_is_accepted() {
    let h = harness();
    let req = Request::builder()
        .uri("/tools")
        .header("authorization", format!("Bearer {KEY}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
    let tools = body["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 17);
    assert!(tools.iter().any(|t| t["name"] == "execute_system_command"));
    assert!(tools[0]["input_schema"].is_object());
}

// ── Tool routes ───────────────────────────────────────────────────

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let h = harness();
    let (status, body) = send(&h.app, post("/tools/format_disk", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn missing_parameter_is_bad_request() {
    let h = harness();
    let (status, body) = send(&h.app, post("/tools/stop_container", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation");
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let h = harness();
    let req = Request::builder()
        .method("POST")
        .uri("/tools/list_containers")
        .header("x-api-key", KEY)
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation");
}

#[tokio::test]
async fn empty_body_means_no_parameters() {
    let h = harness();
    h.fake.add_container("web", "nginx", ContainerStatus::Running);
    let (status, body) = send(&h.app, post_empty("/tools/list_containers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["containers"][0]["name"], "web");
}

#[tokio::test]
async fn container_round_trip() {
    let h = harness();
    h.fake.add_image("nginx:latest");

    let (status, _) = send(
        &h.app,
        post("/tools/create_container", json!({"image": "nginx:latest", "name": "web"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h.app, post("/tools/inspect_container", json!({"name": "web"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "web");

    let (status, _) = send(
        &h.app,
        post("/tools/delete_container", json!({"name": "web", "force": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&h.app, post("/tools/list_containers", json!({}))).await;
    assert_eq!(body["data"]["containers"], json!([]));
}

#[tokio::test]
async fn inspect_missing_container_is_not_found() {
    let h = harness();
    let (status, body) = send(&h.app, post("/tools/inspect_container", json!({"name": "ghost"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn unreachable_runtime_is_bad_gateway() {
    let h = harness();
    h.fake.set_unreachable(true);
    let (status, body) = send(&h.app, post("/tools/list_images", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "upstream");
}

#[tokio::test]
async fn scheduled_task_is_appended() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        post(
            "/tools/create_scheduled_task",
            json!({"schedule": "0 3 * * *", "command": "/usr/local/bin/backup"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["entry"], "0 3 * * * /usr/local/bin/backup");
    assert!(h.store.table().contains("0 3 * * * /usr/local/bin/backup"));
}

// ── MCP over HTTP ─────────────────────────────────────────────────

#[tokio::test]
async fn mcp_lists_and_calls_tools() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        post("/mcp", json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 17);

    h.fake.add_container("db", "postgres", ContainerStatus::Stopped);
    let (_, body) = send(
        &h.app,
        post(
            "/mcp",
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {"name": "start_container", "arguments": {"name": "db"}}
            }),
        ),
    )
    .await;
    assert!(body["result"].get("isError").is_none());
    assert_eq!(body["result"]["structuredContent"]["changed"], true);
}

#[tokio::test]
async fn mcp_tool_failure_is_flagged() {
    let h = harness();
    let (_, body) = send(
        &h.app,
        post(
            "/mcp",
            json!({
                "jsonrpc": "2.0",
                "id": "x",
                "method": "tools/call",
                "params": {"name": "stop_container", "arguments": {"name": "ghost"}}
            }),
        ),
    )
    .await;
    assert_eq!(body["id"], "x");
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(body["result"]["structuredContent"]["kind"], "not_found");
}

#[tokio::test]
async fn mcp_notification_is_accepted_without_body() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        post("/mcp", json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn mcp_requires_credential() {
    let h = harness();
    let req = Request::builder()
        .method("POST")
        .uri("/mcp")
        .body(Body::from(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}).to_string()))
        .unwrap();
    let (status, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ── Legacy routes ─────────────────────────────────────────────────

#[tokio::test]
async fn legacy_list_containers_returns_running_only() {
    let h = harness();
    h.fake.add_container("web", "nginx", ContainerStatus::Running);
    h.fake.add_container("old", "nginx", ContainerStatus::Stopped);
    let (status, body) = send(&h.app, post_empty("/docker_command?action=list_containers")).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body.as_array().unwrap().iter().map(|c| c["name"].clone()).collect();
    assert_eq!(names, vec![json!("web")]);
}

#[tokio::test]
async fn legacy_stop_and_logs() {
    let h = harness();
    h.fake.add_container("web", "nginx", ContainerStatus::Running);
    h.fake.set_logs("web", b"line one\nline two\n".to_vec());

    let (status, body) = send(
        &h.app,
        post_empty("/docker_command?action=get_container_logs&container_name=web"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["logs"].as_str().unwrap().contains("line two"));

    let (status, body) = send(
        &h.app,
        post_empty("/docker_command?action=stop_container&container_name=web"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "web");
    assert_eq!(body["status"], "stopped");
    assert_eq!(h.fake.status_of("web"), Some(ContainerStatus::Stopped));
}

#[tokio::test]
async fn legacy_requires_container_name() {
    let h = harness();
    let (status, body) = send(&h.app, post_empty("/docker_command?action=inspect_container")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "container_name is required to inspect a container");
}

#[tokio::test]
async fn legacy_run_without_name_generates_one() {
    let h = harness();
    h.fake.add_image("nginx:latest");
    let (status, body) = send(
        &h.app,
        post_empty("/docker_command?action=run_container&image_name=nginx:latest"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    let name = body["name"].as_str().unwrap().to_string();
    assert!(name.starts_with("nginx-"));
    assert_eq!(h.fake.status_of(&name), Some(ContainerStatus::Running));
}

#[tokio::test]
async fn legacy_unsupported_action() {
    let h = harness();
    let (status, body) = send(&h.app, post_empty("/docker_command?action=prune")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Unsupported Docker action: prune");
}

#[tokio::test]
async fn legacy_system_command() {
    let h = harness();
    let (status, body) = send(&h.app, post_empty("/system_command?command=echo%20hi")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"output": "hi"}));

    let (status, body) = send(&h.app, post_empty("/system_command?command=")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Command cannot be empty.");
}
