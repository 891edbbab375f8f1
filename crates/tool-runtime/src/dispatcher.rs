//! Name → handler dispatch with up-front parameter validation.
//!
//! Flow: request → lookup → validate → execute → classify → `ToolResult`.
//! Every transport (HTTP, MCP, legacy routes) goes through here.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use hostgate_core::GatewayError;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::registry::ToolRegistry;
use crate::tool::{ToolDefinition, ToolParams, ToolRequest, ToolResult};

/// Routes tool requests to registered handlers. Performs no retries.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.list()
    }

    /// Dispatch a single request. Never panics and never returns an
    /// unclassified failure.
    pub async fn dispatch(&self, request: ToolRequest) -> ToolResult {
        let started = Instant::now();
        let tool_name = request.tool;

        let Some(entry) = self.registry.get(&tool_name) else {
            warn!(tool = %tool_name, "unknown tool requested");
            return ToolResult::Failure(GatewayError::not_found(format!(
                "unknown tool: {tool_name}"
            )));
        };

        let params = match validate_params(&entry.definition, request.params) {
            Ok(p) => p,
            Err(err) => {
                warn!(tool = %tool_name, error = %err, "rejected invalid parameters");
                return ToolResult::Failure(err);
            }
        };

        debug!(tool = %tool_name, "invoking tool");
        let outcome = AssertUnwindSafe(entry.handler.execute(params))
            .catch_unwind()
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(value)) => {
                info!(tool = %tool_name, elapsed_ms, "tool succeeded");
                ToolResult::Success(value)
            }
            Ok(Err(err)) => {
                warn!(tool = %tool_name, kind = %err.kind(), elapsed_ms, error = %err.message(), "tool failed");
                ToolResult::Failure(err)
            }
            Err(_panic) => {
                error!(tool = %tool_name, elapsed_ms, "tool handler panicked");
                ToolResult::Failure(GatewayError::internal(format!(
                    "tool '{tool_name}' failed unexpectedly"
                )))
            }
        }
    }
}

/// Check presence and type of declared parameters before any handler runs.
/// Undeclared keys are passed through untouched.
fn validate_params(definition: &ToolDefinition, raw: Value) -> Result<ToolParams, GatewayError> {
    let map = match raw {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => {
            return Err(GatewayError::validation(
                "parameters must be a JSON object",
            ))
        }
    };

    for spec in &definition.params {
        match map.get(&spec.name) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(GatewayError::validation(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
            }
            Some(value) => {
                if !spec.kind.matches(value) {
                    return Err(GatewayError::validation(format!(
                        "parameter '{}' must be of type {}",
                        spec.name,
                        spec.kind.json_type()
                    )));
                }
            }
        }
    }

    Ok(ToolParams::new(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoTool;
    use crate::tool::{ParamSpec, ParamType, Tool};
    use async_trait::async_trait;
    use hostgate_core::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(
                "counting",
                "Counts invocations",
                vec![
                    ParamSpec::required("port", ParamType::Integer, "port"),
                    ParamSpec::optional("force", ParamType::Boolean, "force"),
                ],
            )
        }

        async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"port": params.i64("port")?}))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("panics", "Always panics", vec![])
        }

        async fn execute(&self, _params: ToolParams) -> Result<Value, GatewayError> {
            panic!("handler bug");
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("fails", "Always upstream error", vec![])
        }

        async fn execute(&self, _params: ToolParams) -> Result<Value, GatewayError> {
            Err(GatewayError::upstream("runtime said no"))
        }
    }

    fn dispatcher(calls: Arc<AtomicUsize>) -> Dispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(CountingTool { calls }).unwrap();
        registry.register(PanickingTool).unwrap();
        registry.register(FailingTool).unwrap();
        Dispatcher::new(registry)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let d = dispatcher(Arc::default());
        let result = d.dispatch(ToolRequest::new("nope", json!({}))).await;
        let err = result.error().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.message().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_missing_required_param_never_invokes_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(calls.clone());
        let result = d.dispatch(ToolRequest::new("counting", json!({}))).await;
        let err = result.error().unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("port"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_type_rejected_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(calls.clone());
        let result = d
            .dispatch(ToolRequest::new("counting", json!({"port": "8080"})))
            .await;
        assert_eq!(result.error().unwrap().kind(), ErrorKind::Validation);

        let result = d
            .dispatch(ToolRequest::new("counting", json!({"port": 1, "force": "yes"})))
            .await;
        assert!(result.error().unwrap().message().contains("force"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_object_params_rejected() {
        let d = dispatcher(Arc::default());
        let result = d.dispatch(ToolRequest::new("echo", json!([1, 2]))).await;
        assert_eq!(result.error().unwrap().kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_valid_call_succeeds_with_extra_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(calls.clone());
        let result = d
            .dispatch(ToolRequest::new("counting", json!({"port": 8080, "extra": true})))
            .await;
        assert_eq!(result, ToolResult::Success(json!({"port": 8080})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_null_params_treated_as_empty() {
        let d = dispatcher(Arc::default());
        let result = d.dispatch(ToolRequest::new("panics", Value::Null)).await;
        assert_eq!(result.error().unwrap().kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let d = dispatcher(Arc::default());
        let result = d.dispatch(ToolRequest::new("panics", json!({}))).await;
        let err = result.error().unwrap();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.message().contains("handler bug"));
    }

    #[tokio::test]
    async fn test_classified_error_passes_through() {
        let d = dispatcher(Arc::default());
        let result = d.dispatch(ToolRequest::new("fails", json!({}))).await;
        assert_eq!(
            result,
            ToolResult::Failure(GatewayError::upstream("runtime said no"))
        );
    }
}
