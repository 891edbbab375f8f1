//! Built-in tool implementations.
//!
//! - **Telemetry** (`system`): CPU and memory
//! - **Containers** (`containers`): lifecycle, logs, inspect, images
//! - **Host mutation** (`network`, `schedule`): firewall, virtual IPs, ping, crontab
//! - **Host access** (`files`, `command`): directory listing and command execution

pub mod command;
pub mod containers;
pub mod files;
pub mod network;
pub mod schedule;
pub mod system;

pub use command::{CommandPolicy, ExecuteSystemCommandTool};
pub use containers::{
    ContainerLogsTool, CreateContainerTool, DeleteContainerTool, InspectContainerTool,
    ListContainersTool, ListImagesTool, RestartContainerTool, StartContainerTool,
    StopContainerTool,
};
pub use files::ListFilesTool;
pub use network::{CreateVirtualIpTool, FirewallRuleTool, NetworkTestTool};
pub use schedule::CreateScheduledTaskTool;
pub use system::{CpuUsageTool, MemoryUsageTool};

use hostgate_core::GatewayError;
use serde::Serialize;
use serde_json::Value;

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::internal(format!("failed to encode result: {e}")))
}
