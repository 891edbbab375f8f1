use crate::tool::{Tool, ToolDefinition};
use hostgate_core::GatewayError;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered tool with its definition captured at registration time.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn Tool>,
}

/// Manages available tools, their schemas, and lookup.
///
/// Built once at startup; the dispatcher only ever holds it behind an `Arc`,
/// so the set of descriptors is immutable while requests are served.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Returns error if name already registered.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let definition = tool.definition();
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName(definition.name));
        }
        tracing::debug!(tool = %definition.name, "registered tool");
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler: Arc::new(tool),
            },
        );
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// All registered tool definitions, sorted by name.
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool with name '{0}' is already registered")]
    DuplicateName(String),
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        GatewayError::config(err.to_string())
    }
}
