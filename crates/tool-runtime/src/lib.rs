pub mod allowlist;
pub mod catalog;
pub mod containers;
pub mod dispatcher;
pub mod executor;
pub mod files;
pub mod network;
pub mod registry;
pub mod schedule;
pub mod system;
pub mod tool;
pub mod tools;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use catalog::{build_dispatcher, build_registry, Services};
pub use containers::{ContainerManager, ContainerRuntime, DockerRuntime};
pub use dispatcher::Dispatcher;
pub use executor::{CommandExecutor, CommandOutput, CommandSpec};
pub use network::NetworkMutator;
pub use registry::{RegistryError, ToolRegistry};
pub use schedule::{ScheduleManager, ScheduleStore};
pub use system::SystemInfoProbe;
pub use tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolParams, ToolRequest, ToolResult};
