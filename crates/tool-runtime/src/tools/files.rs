use std::path::PathBuf;

use async_trait::async_trait;
use hostgate_core::GatewayError;
use serde_json::{json, Value};

use crate::files::list_files;
use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolParams};

pub struct ListFilesTool {
    default_folder: PathBuf,
}

impl ListFilesTool {
    pub fn new(default_folder: impl Into<PathBuf>) -> Self {
        Self {
            default_folder: default_folder.into(),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "list_files",
            "List entry names in a folder, sorted.",
            vec![ParamSpec::optional(
                "folder",
                ParamType::String,
                "Folder to list (defaults to the configured media folder)",
            )],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let folder = match params.opt_str("folder")? {
            Some(f) if f.trim().is_empty() => {
                return Err(GatewayError::validation("parameter 'folder' must not be empty"))
            }
            Some(f) => PathBuf::from(f),
            None => self.default_folder.clone(),
        };
        let files = list_files(&folder).await?;
        Ok(json!({ "folder": folder.display().to_string(), "files": files }))
    }
}
