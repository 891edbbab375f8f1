//! Container lifecycle tools. Thin adapters over `ContainerManager`.

use std::sync::Arc;

use async_trait::async_trait;
use hostgate_core::GatewayError;
use serde_json::{json, Value};

use super::to_json;
use crate::containers::ContainerManager;
use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolParams};

pub const DEFAULT_LOG_TAIL: i64 = 100;
pub const DEFAULT_STOP_TIMEOUT: i64 = 10;

fn name_param() -> ParamSpec {
    ParamSpec::required("name", ParamType::String, "Container name or id")
}

macro_rules! container_tool {
    ($ty:ident) => {
        pub struct $ty {
            containers: Arc<ContainerManager>,
        }

        impl $ty {
            pub fn new(containers: Arc<ContainerManager>) -> Self {
                Self { containers }
            }
        }
    };
}

container_tool!(ListContainersTool);
container_tool!(ListImagesTool);
container_tool!(ContainerLogsTool);
container_tool!(CreateContainerTool);
container_tool!(StartContainerTool);
container_tool!(StopContainerTool);
container_tool!(RestartContainerTool);
container_tool!(DeleteContainerTool);
container_tool!(InspectContainerTool);

#[async_trait]
impl Tool for ListContainersTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "list_containers",
            "List containers with id, name, status and image.",
            vec![ParamSpec::optional(
                "include_stopped",
                ParamType::Boolean,
                "Include stopped containers (default true)",
            )],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let include_stopped = params.bool_or("include_stopped", true)?;
        let containers = self.containers.list(include_stopped).await?;
        Ok(json!({ "containers": to_json(&containers)? }))
    }
}

#[async_trait]
impl Tool for ListImagesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("list_images", "List locally available images and their tags.", vec![])
    }

    async fn execute(&self, _params: ToolParams) -> Result<Value, GatewayError> {
        let images = self.containers.list_images().await?;
        Ok(json!({ "images": to_json(&images)? }))
    }
}

#[async_trait]
impl Tool for ContainerLogsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "container_logs",
            "Fetch the last lines of a container's combined output.",
            vec![
                name_param(),
                ParamSpec::optional("tail", ParamType::Integer, "Number of lines (default 100)"),
            ],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let name = params.str("name")?;
        let tail = params.i64_or("tail", DEFAULT_LOG_TAIL)?;
        let logs = self.containers.logs(name, tail).await?;
        Ok(json!({ "name": name, "tail": tail, "logs": logs }))
    }
}

#[async_trait]
impl Tool for CreateContainerTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "create_container",
            "Create and start a container from an image. With detach=false, waits for it to exit and returns exit code and logs.",
            vec![
                ParamSpec::required("image", ParamType::String, "Image reference, e.g. nginx:latest"),
                ParamSpec::required("name", ParamType::String, "Name for the new container"),
                ParamSpec::optional("command", ParamType::String, "Command line to run instead of the image default"),
                ParamSpec::optional("detach", ParamType::Boolean, "Return immediately (default true)"),
            ],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let outcome = self
            .containers
            .create(
                params.str("image")?,
                params.str("name")?,
                params.opt_str("command")?,
                params.bool_or("detach", true)?,
            )
            .await?;
        to_json(&outcome)
    }
}

#[async_trait]
impl Tool for StartContainerTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "start_container",
            "Start a stopped container. No-op if already running.",
            vec![name_param()],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        to_json(&self.containers.start(params.str("name")?).await?)
    }
}

#[async_trait]
impl Tool for StopContainerTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "stop_container",
            "Stop a running container. No-op if already stopped.",
            vec![
                name_param(),
                ParamSpec::optional("timeout", ParamType::Integer, "Seconds to wait before killing (default 10)"),
            ],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let timeout = params.i64_or("timeout", DEFAULT_STOP_TIMEOUT)?;
        to_json(&self.containers.stop(params.str("name")?, timeout).await?)
    }
}

#[async_trait]
impl Tool for RestartContainerTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("restart_container", "Restart a container.", vec![name_param()])
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        to_json(&self.containers.restart(params.str("name")?).await?)
    }
}

#[async_trait]
impl Tool for DeleteContainerTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "delete_container",
            "Remove a container. Running containers need force=true.",
            vec![
                name_param(),
                ParamSpec::optional("force", ParamType::Boolean, "Kill and remove if running (default true)"),
            ],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let force = params.bool_or("force", true)?;
        to_json(&self.containers.remove(params.str("name")?, force).await?)
    }
}

#[async_trait]
impl Tool for InspectContainerTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "inspect_container",
            "Full attribute snapshot of a container as reported by the runtime.",
            vec![name_param()],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        let inspect = self.containers.inspect(params.str("name")?).await?;
        Ok(json!({
            "name": inspect.container.name,
            "attributes": inspect.attributes,
        }))
    }
}
