use async_trait::async_trait;
use hostgate_core::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Semantic type of a tool parameter, checked before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    Object,
}

impl ParamType {
    /// JSON Schema type name.
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        }
    }
}

/// Describes a tool's interface: unique name, description, ordered parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "list_containers")
    pub name: String,
    /// Human-readable description for the calling agent
    pub description: String,
    /// Ordered parameter list
    pub params: Vec<ParamSpec>,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, params: Vec<ParamSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
        }
    }

    /// JSON Schema for the parameter object, as advertised over MCP.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.kind.json_type(),
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// A single invocation: tool name plus parameter object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
        }
    }
}

/// Outcome of a dispatch. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ResultEnvelope", try_from = "ResultEnvelope")]
pub enum ToolResult {
    Success(Value),
    Failure(GatewayError),
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success(_))
    }

    pub fn error(&self) -> Option<&GatewayError> {
        match self {
            ToolResult::Failure(err) => Some(err),
            ToolResult::Success(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Value, GatewayError> {
        match self {
            ToolResult::Success(value) => Ok(value),
            ToolResult::Failure(err) => Err(err),
        }
    }
}

impl From<Result<Value, GatewayError>> for ToolResult {
    fn from(result: Result<Value, GatewayError>) -> Self {
        match result {
            Ok(value) => ToolResult::Success(value),
            Err(err) => ToolResult::Failure(err),
        }
    }
}

/// Wire shape: `{"ok":true,"data":…}` or `{"ok":false,"error":{"kind":…,"message":…}}`.
#[derive(Serialize, Deserialize)]
struct ResultEnvelope {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<GatewayError>,
}

impl From<ToolResult> for ResultEnvelope {
    fn from(result: ToolResult) -> Self {
        match result {
            ToolResult::Success(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            ToolResult::Failure(error) => Self {
                ok: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

impl TryFrom<ResultEnvelope> for ToolResult {
    type Error = String;

    fn try_from(envelope: ResultEnvelope) -> Result<Self, Self::Error> {
        match (envelope.ok, envelope.data, envelope.error) {
            (true, data, None) => Ok(ToolResult::Success(data.unwrap_or(Value::Null))),
            (false, None, Some(error)) => Ok(ToolResult::Failure(error)),
            _ => Err("result envelope must carry exactly one of data or error".to_string()),
        }
    }
}

/// Validated parameters handed to a tool. Explicit `null` counts as absent.
#[derive(Debug, Clone, Default)]
pub struct ToolParams {
    values: Map<String, Value>,
}

impl ToolParams {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Result<&str, GatewayError> {
        self.opt_str(name)?
            .ok_or_else(|| GatewayError::validation(format!("missing required parameter '{name}'")))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>, GatewayError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(type_error(name, "a string")),
        }
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str, GatewayError> {
        Ok(self.opt_str(name)?.unwrap_or(default))
    }

    pub fn i64(&self, name: &str) -> Result<i64, GatewayError> {
        self.opt_i64(name)?
            .ok_or_else(|| GatewayError::validation(format!("missing required parameter '{name}'")))
    }

    pub fn opt_i64(&self, name: &str) -> Result<Option<i64>, GatewayError> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| type_error(name, "an integer")),
        }
    }

    pub fn i64_or(&self, name: &str, default: i64) -> Result<i64, GatewayError> {
        Ok(self.opt_i64(name)?.unwrap_or(default))
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, GatewayError> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(type_error(name, "a boolean")),
        }
    }

    pub fn opt_object(&self, name: &str) -> Result<Option<&Map<String, Value>>, GatewayError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => Err(type_error(name, "an object")),
        }
    }
}

fn type_error(name: &str, expected: &str) -> GatewayError {
    GatewayError::validation(format!("parameter '{name}' must be {expected}"))
}

/// The primary extension point: every privileged operation implements this trait.
///
/// Tools are object-safe, Send + Sync, and async. Handlers return a classified
/// `GatewayError`; the dispatcher takes care of envelopes and panics.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, parameters).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with parameters already checked against `definition()`.
    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError>;
}
