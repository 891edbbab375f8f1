//! MCP server implementation.
//!
//! Bridges a `Dispatcher` to MCP clients. A session must authenticate
//! before tools are listed or called: on stdio the client sends `apiKey`
//! in `initialize`; over HTTP the route authenticates first and hands the
//! server a pre-authenticated session.

use std::collections::HashMap;

use hostgate_core::AuthGate;
use hostgate_tool_runtime::{Dispatcher, ToolRequest, ToolResult};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::McpError;
use crate::transport::McpTransport;
use crate::types::*;

/// One MCP session over a dispatcher.
pub struct McpServer {
    dispatcher: Dispatcher,
    auth: Option<AuthGate>,
    authenticated: bool,
    server_name: String,
    server_version: String,
}

impl McpServer {
    /// Session that must present `apiKey` in `initialize`.
    pub fn new(dispatcher: Dispatcher, auth: AuthGate) -> Self {
        Self {
            dispatcher,
            auth: Some(auth),
            authenticated: false,
            server_name: "hostgate".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Session whose caller was already authenticated by the transport.
    pub fn pre_authenticated(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            auth: None,
            authenticated: true,
            server_name: "hostgate".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Run the session loop until the transport closes.
    ///
    /// `tools/call` requests run as their own tasks so a slow command does
    /// not hold up the session, and `notifications/cancelled` aborts them.
    /// Aborting drops the call, which kills any process it started.
    pub async fn run<T: McpTransport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, "MCP session starting");

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, JsonRpcResponse)>();
        let mut in_flight: HashMap<String, AbortHandle> = HashMap::new();

        loop {
            let line = tokio::select! {
                received = transport.receive() => match received {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        tracing::info!("transport closed, ending session");
                        break;
                    }
                    Err(McpError::MessageTooLarge(size)) => {
                        tracing::warn!(size, "dropping oversized message");
                        let resp = parse_failure(McpError::MessageTooLarge(size));
                        transport.send(&serde_json::to_string(&resp)?).await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                Some((key, response)) = done_rx.recv() => {
                    in_flight.remove(&key);
                    transport.send(&serde_json::to_string(&response)?).await?;
                    continue;
                }
            };

            let raw: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse JSON");
                    let resp = parse_failure(McpError::JsonParse(e));
                    transport.send(&serde_json::to_string(&resp)?).await?;
                    continue;
                }
            };

            if let Some(key) = cancelled_request(&raw) {
                match in_flight.remove(&key) {
                    Some(handle) => {
                        handle.abort();
                        tracing::info!(request = %key, "tool call cancelled by client");
                    }
                    None => tracing::debug!(request = %key, "cancel for a request not in flight"),
                }
                continue;
            }

            if self.authenticated && raw.get("method").and_then(Value::as_str) == Some("tools/call") {
                if let Ok(request) = serde_json::from_value::<JsonRpcRequest>(raw.clone()) {
                    let key = request_key(&raw["id"]);
                    if in_flight.contains_key(&key) {
                        let resp = JsonRpcResponse::error(
                            request.id,
                            error_codes::INVALID_REQUEST,
                            format!("request id {key} is already in flight"),
                        );
                        transport.send(&serde_json::to_string(&resp)?).await?;
                        continue;
                    }
                    let dispatcher = self.dispatcher.clone();
                    let done = done_tx.clone();
                    let task_key = key.clone();
                    let task = tokio::spawn(async move {
                        let response = call_tool(&dispatcher, request.id, &request.params).await;
                        let _ = done.send((task_key, response));
                    });
                    in_flight.insert(key, task.abort_handle());
                    continue;
                }
            }

            if let Some(response) = self.handle_message(raw).await {
                transport.send(&serde_json::to_string(&response)?).await?;
            }
        }

        for (key, handle) in in_flight.drain() {
            tracing::debug!(request = %key, "aborting tool call, session closed");
            handle.abort();
        }
        Ok(())
    }

    /// Handle one decoded message. Notifications produce no response.
    pub async fn handle_message(&mut self, raw: Value) -> Option<JsonRpcResponse> {
        if raw.get("id").is_none() {
            if let Ok(notif) = serde_json::from_value::<JsonRpcNotification>(raw) {
                self.handle_notification(&notif);
            }
            return None;
        }

        match serde_json::from_value::<JsonRpcRequest>(raw) {
            Ok(request) => Some(self.handle_request(&request).await),
            Err(e) => {
                tracing::warn!(error = %e, "malformed JSON-RPC request");
                Some(parse_failure(McpError::JsonParse(e)))
            }
        }
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        // Params are never logged: initialize carries the credential.
        tracing::debug!(method = %request.method, "handling request");

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, &request.params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" | "tools/call" if !self.authenticated => error_response(
                id,
                McpError::Unauthorized("session is not authenticated; send apiKey in initialize".to_string()),
            ),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => call_tool(&self.dispatcher, id, &request.params).await,
            method => {
                tracing::warn!(method = %method, "unknown method");
                error_response(id, McpError::MethodNotFound(method.to_string()))
            }
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => tracing::info!("client confirmed initialization"),
            "notifications/cancelled" => tracing::debug!("cancel for a request that already finished"),
            method => tracing::debug!(method = %method, "unknown notification, ignoring"),
        }
    }

    fn handle_initialize(&mut self, id: RpcId, params: &Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = match params {
            Some(p) => match serde_json::from_value(p.clone()) {
                Ok(p) => p,
                Err(e) => return error_response(id, McpError::InvalidParams(e.to_string())),
            },
            None => InitializeParams::default(),
        };

        if let Some(gate) = &self.auth {
            if let Err(err) = gate.authorize(params.api_key.as_deref()) {
                tracing::warn!(reason = %err.message(), "MCP session rejected");
                return error_response(id, McpError::Unauthorized(err.message().to_string()));
            }
            self.authenticated = true;
        }

        let client = params.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("unknown");
        tracing::info!(client, "MCP session initialized");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
        };
        to_response(id, result)
    }

    fn handle_list_tools(&self, id: RpcId) -> JsonRpcResponse {
        let tools: Vec<ToolInfo> = self
            .dispatcher
            .definitions()
            .into_iter()
            .map(ToolInfo::from)
            .collect();
        to_response(id, ListToolsResult { tools })
    }
}

/// Run one `tools/call` through the dispatcher. Unknown tools come back as
/// a `not_found` tool failure, the same as over HTTP.
async fn call_tool(dispatcher: &Dispatcher, id: RpcId, params: &Option<Value>) -> JsonRpcResponse {
    let Some(params) = params else {
        return error_response(id, McpError::InvalidParams("missing params".to_string()));
    };

    let call_params: CallToolParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(e) => return error_response(id, McpError::InvalidParams(e.to_string())),
    };

    let request = ToolRequest::new(call_params.name, call_params.arguments);
    let result = match dispatcher.dispatch(request).await {
        ToolResult::Success(value) => CallToolResult {
            content: vec![ToolContent::Text {
                text: serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            }],
            structured_content: Some(value),
            is_error: false,
        },
        ToolResult::Failure(err) => CallToolResult {
            content: vec![ToolContent::Text { text: err.to_string() }],
            structured_content: Some(json!({
                "kind": err.kind(),
                "message": err.message(),
            })),
            is_error: true,
        },
    };
    to_response(id, result)
}

/// Map key for an in-flight request id (its JSON form, so `7` and `"7"` differ).
fn request_key(id: &Value) -> String {
    id.to_string()
}

/// The `requestId` of a `notifications/cancelled` message.
fn cancelled_request(raw: &Value) -> Option<String> {
    if raw.get("id").is_some() || raw.get("method").and_then(Value::as_str) != Some("notifications/cancelled") {
        return None;
    }
    raw.get("params")
        .and_then(|p| p.get("requestId"))
        .map(request_key)
}

fn error_response(id: RpcId, err: McpError) -> JsonRpcResponse {
    JsonRpcResponse::error(id, err.to_rpc_error().code, err.to_string())
}

/// Response for input that never became a request, so has no usable id.
fn parse_failure(err: McpError) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id: RpcId::Number(0),
        result: None,
        error: Some(err.to_rpc_error()),
    }
}

fn to_response(id: RpcId, result: impl serde::Serialize) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(val) => JsonRpcResponse::success(id, val),
        Err(e) => error_response(id, McpError::JsonParse(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use hostgate_core::GatewayError;
    use hostgate_tool_runtime::testing::EchoTool;
    use hostgate_tool_runtime::{Tool, ToolDefinition, ToolParams, ToolRegistry};

    const KEY: &str = "test-key";

    fn test_dispatcher() -> Dispatcher {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool).unwrap();
        Dispatcher::new(reg)
    }

    fn session() -> McpServer {
        McpServer::new(test_dispatcher(), AuthGate::new(KEY).unwrap())
    }

    fn initialize(id: i64, key: Option<&str>) -> JsonRpcRequest {
        let mut params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "test-client"}
        });
        if let Some(key) = key {
            params["apiKey"] = json!(key);
        }
        JsonRpcRequest::new(RpcId::Number(id), "initialize", Some(params))
    }

    fn call(id: i64, name: &str, arguments: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(
            RpcId::Number(id),
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
    }

    #[tokio::test]
    async fn test_initialize_with_key() {
        let mut server = session();
        let resp = server.handle_request(&initialize(1, Some(KEY))).await;
        assert!(resp.error.is_none());
        let result: InitializeResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(result.server_info.name, "hostgate");
        assert!(server.is_authenticated());
    }

    #[tokio::test]
    async fn test_initialize_rejects_missing_and_wrong_key() {
        let mut server = session();
        let resp = server.handle_request(&initialize(1, None)).await;
        assert_eq!(resp.error.unwrap().code, error_codes::UNAUTHORIZED);

        let resp = server.handle_request(&initialize(2, Some("wrong"))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::UNAUTHORIZED);
        assert!(!err.message.contains("wrong"));
        assert!(!err.message.contains(KEY));
        assert!(!server.is_authenticated());
    }

    #[tokio::test]
    async fn test_tools_require_authentication() {
        let mut server = session();
        let list = JsonRpcRequest::new(RpcId::Number(2), "tools/list", None);
        assert_eq!(
            server.handle_request(&list).await.error.unwrap().code,
            error_codes::UNAUTHORIZED
        );
        let resp = server.handle_request(&call(3, "echo", json!({"message": "hi"}))).await;
        assert_eq!(resp.error.unwrap().code, error_codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ping_needs_no_session() {
        let mut server = session();
        let resp = server
            .handle_request(&JsonRpcRequest::new(RpcId::String("p".into()), "ping", None))
            .await;
        assert_eq!(resp.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_handle_list_tools() {
        let mut server = McpServer::pre_authenticated(test_dispatcher());
        let req = JsonRpcRequest::new(RpcId::Number(2), "tools/list", None);

        let resp = server.handle_request(&req).await;
        assert!(resp.error.is_none());
        let result: ListToolsResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "echo");
        assert_eq!(result.tools[0].input_schema["required"], json!(["message"]));
    }

    #[tokio::test]
    async fn test_handle_call_tool() {
        let mut server = McpServer::pre_authenticated(test_dispatcher());
        let resp = server.handle_request(&call(3, "echo", json!({"message": "hello mcp"}))).await;
        assert!(resp.error.is_none());
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.structured_content, Some(json!({"echo": "hello mcp"})));
        match &result.content[0] {
            ToolContent::Text { text } => assert!(text.contains("hello mcp")),
        }
    }

    #[tokio::test]
    async fn test_tool_failure_is_structured() {
        let mut server = McpServer::pre_authenticated(test_dispatcher());
        let resp = server.handle_request(&call(4, "echo", json!({}))).await;
        assert!(resp.error.is_none());
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(result.is_error);
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["kind"], "validation");
        assert!(structured["message"].as_str().unwrap().contains("message"));
    }

    #[tokio::test]
    async fn test_handle_call_tool_not_found() {
        let mut server = McpServer::pre_authenticated(test_dispatcher());
        let resp = server.handle_request(&call(4, "nonexistent", json!({}))).await;
        assert!(resp.error.is_none());
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(result.is_error);
        assert_eq!(result.structured_content.unwrap()["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_handle_unknown_method() {
        let mut server = McpServer::pre_authenticated(test_dispatcher());
        let req = JsonRpcRequest::new(RpcId::Number(5), "unknown/method", None);
        let resp = server.handle_request(&req).await;
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let mut server = session();
        let notif = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(server.handle_message(notif).await.is_none());
    }

    /// Never finishes; records when its call is dropped.
    struct StuckTool {
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Tool for StuckTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("stuck", "Wait forever", vec![])
        }

        async fn execute(&self, _params: ToolParams) -> Result<Value, GatewayError> {
            let _flag = SetOnDrop(self.dropped.clone());
            std::future::pending::<()>().await;
            Ok(Value::Null)
        }
    }

    async fn next_response(client: &mut ChannelTransport) -> JsonRpcResponse {
        let line = tokio::time::timeout(Duration::from_secs(5), client.receive())
            .await
            .expect("no response in time")
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_and_can_be_cancelled() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool).unwrap();
        reg.register(StuckTool { dropped: dropped.clone() }).unwrap();
        let mut server = McpServer::pre_authenticated(Dispatcher::new(reg));

        let (mut client, mut server_side) = ChannelTransport::pair();
        let server_handle = tokio::spawn(async move { server.run(&mut server_side).await });

        client
            .send(&serde_json::to_string(&call(10, "stuck", json!({}))).unwrap())
            .await
            .unwrap();
        client
            .send(&serde_json::to_string(&call(11, "echo", json!({"message": "meanwhile"}))).unwrap())
            .await
            .unwrap();
        let resp = next_response(&mut client).await;
        assert_eq!(resp.id, RpcId::Number(11));

        let cancel = json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": {"requestId": 10, "reason": "user abort"}
        });
        client.send(&cancel.to_string()).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !dropped.load(Ordering::SeqCst) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dropped.load(Ordering::SeqCst));

        // The cancelled call never answers; the next response is the ping.
        let ping = JsonRpcRequest::new(RpcId::Number(12), "ping", None);
        client.send(&serde_json::to_string(&ping).unwrap()).await.unwrap();
        let resp = next_response(&mut client).await;
        assert_eq!(resp.id, RpcId::Number(12));

        drop(client);
        server_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_run_with_channel_transport() {
        let (mut client_side, mut server_side) = ChannelTransport::pair();
        let mut server = session();

        let server_handle = tokio::spawn(async move { server.run(&mut server_side).await });

        client_side
            .send(&serde_json::to_string(&initialize(1, Some(KEY))).unwrap())
            .await
            .unwrap();
        let resp: JsonRpcResponse =
            serde_json::from_str(&client_side.receive().await.unwrap().unwrap()).unwrap();
        assert!(resp.error.is_none());

        client_side.send("{not json").await.unwrap();
        let resp: JsonRpcResponse =
            serde_json::from_str(&client_side.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);

        client_side
            .send(&serde_json::to_string(&call(2, "echo", json!({"message": "via transport"}))).unwrap())
            .await
            .unwrap();
        let resp: JsonRpcResponse =
            serde_json::from_str(&client_side.receive().await.unwrap().unwrap()).unwrap();
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.structured_content, Some(json!({"echo": "via transport"})));

        drop(client_side);
        server_handle.await.unwrap().unwrap();
    }
}
