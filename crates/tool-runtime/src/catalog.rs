//! Wiring: config → managers → the fixed tool catalog.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hostgate_core::config::CommandMode;
use hostgate_core::{Config, ConfigError};
use tracing::info;

use crate::allowlist::CommandAllowlist;
use crate::containers::{ContainerManager, ContainerRuntime, DockerRuntime};
use crate::dispatcher::Dispatcher;
use crate::executor::CommandExecutor;
use crate::network::NetworkMutator;
use crate::registry::{RegistryError, ToolRegistry};
use crate::schedule::{CrontabStore, ScheduleManager, ScheduleStore};
use crate::system::SystemInfoProbe;
use crate::tools::*;

/// Long-lived managers shared by every tool. Built once at startup.
pub struct Services {
    pub executor: Arc<CommandExecutor>,
    pub containers: Arc<ContainerManager>,
    pub network: Arc<NetworkMutator>,
    pub schedule: Arc<ScheduleManager>,
    pub system: Arc<SystemInfoProbe>,
    pub command_policy: CommandPolicy,
    pub files_default: PathBuf,
}

impl Services {
    /// Production wiring: Docker via bollard, the real crontab.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let runtime = DockerRuntime::connect(config.docker.host.as_deref()).map_err(|e| {
            ConfigError::InvalidValue {
                key: "DOCKER_HOST".to_string(),
                reason: e.to_string(),
            }
        })?;
        let executor = CommandExecutor::from_config(&config.command);
        let store = CrontabStore::new(executor.clone(), config.schedule.crontab_bin.clone());
        Self::new(config, Arc::new(runtime), Arc::new(store))
    }

    /// Wire with caller-supplied runtime and schedule store.
    pub fn new(
        config: &Config,
        runtime: Arc<dyn ContainerRuntime>,
        schedule_store: Arc<dyn ScheduleStore>,
    ) -> Result<Self, ConfigError> {
        let executor = CommandExecutor::from_config(&config.command);
        let command_policy = match config.command.mode {
            CommandMode::Open => CommandPolicy::Open,
            CommandMode::Allowlist => CommandPolicy::Allowlist(match &config.command.allowlist_file {
                Some(path) => CommandAllowlist::load(path)?,
                None => CommandAllowlist::builtin(),
            }),
        };

        Ok(Self {
            containers: Arc::new(ContainerManager::new(
                runtime,
                Duration::from_secs(config.docker.wait_timeout_secs),
            )),
            network: Arc::new(NetworkMutator::new(executor.clone(), config.network.clone())),
            schedule: Arc::new(ScheduleManager::new(schedule_store, config.schedule.strict)),
            system: Arc::new(SystemInfoProbe::new(Duration::from_millis(
                config.system.cpu_sample_ms,
            ))),
            executor: Arc::new(executor),
            command_policy,
            files_default: config.files.default_folder.clone(),
        })
    }
}

/// Register every built-in tool.
pub fn build_registry(services: &Services) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();

    // Telemetry
    registry.register(CpuUsageTool::new(services.system.clone()))?;
    registry.register(MemoryUsageTool::new(services.system.clone()))?;

    // Containers
    let containers = &services.containers;
    registry.register(ListContainersTool::new(containers.clone()))?;
    registry.register(ListImagesTool::new(containers.clone()))?;
    registry.register(ContainerLogsTool::new(containers.clone()))?;
    registry.register(CreateContainerTool::new(containers.clone()))?;
    registry.register(StartContainerTool::new(containers.clone()))?;
    registry.register(StopContainerTool::new(containers.clone()))?;
    registry.register(RestartContainerTool::new(containers.clone()))?;
    registry.register(DeleteContainerTool::new(containers.clone()))?;
    registry.register(InspectContainerTool::new(containers.clone()))?;

    // Host
    registry.register(CreateScheduledTaskTool::new(services.schedule.clone()))?;
    registry.register(ListFilesTool::new(services.files_default.clone()))?;
    registry.register(NetworkTestTool::new(services.network.clone()))?;
    registry.register(CreateVirtualIpTool::new(services.network.clone()))?;
    registry.register(FirewallRuleTool::new(services.network.clone()))?;
    registry.register(ExecuteSystemCommandTool::new(
        services.executor.clone(),
        services.command_policy.clone(),
    ))?;

    info!(tools = registry.len(), "tool catalog ready");
    Ok(registry)
}

/// Convenience: services straight to a dispatcher.
pub fn build_dispatcher(services: &Services) -> Result<Dispatcher, RegistryError> {
    Ok(Dispatcher::new(build_registry(services)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_services;
    use crate::tool::ToolRequest;
    use serde_json::json;

    #[test]
    fn test_catalog_names() {
        let (services, _fake, _store) = test_services(&Config::with_api_key("k").unwrap());
        let registry = build_registry(&services).unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "container_logs",
                "create_container",
                "create_scheduled_task",
                "create_virtual_ip",
                "delete_container",
                "execute_system_command",
                "firewall_rule",
                "get_cpu_usage",
                "get_memory_usage",
                "inspect_container",
                "list_containers",
                "list_files",
                "list_images",
                "network_test",
                "restart_container",
                "start_container",
                "stop_container",
            ]
        );
    }

    #[test]
    fn test_allowlist_mode_uses_builtin_set() {
        let mut config = Config::with_api_key("k").unwrap();
        config.command.mode = CommandMode::Allowlist;
        let (services, _fake, _store) = test_services(&config);
        assert!(matches!(services.command_policy, CommandPolicy::Allowlist(_)));
    }

    #[test]
    fn test_missing_allowlist_file_fails_startup() {
        let mut config = Config::with_api_key("k").unwrap();
        config.command.mode = CommandMode::Allowlist;
        config.command.allowlist_file = Some(PathBuf::from("/nonexistent/allow.yaml"));
        let fake = Arc::new(crate::testing::FakeContainerRuntime::new());
        let store = Arc::new(crate::testing::MemoryScheduleStore::default());
        assert!(Services::new(&config, fake, store).is_err());
    }

    #[tokio::test]
    async fn test_stop_twice_through_dispatcher() {
        let (services, fake, _store) = test_services(&Config::with_api_key("k").unwrap());
        fake.add_container("web", "nginx", crate::containers::ContainerStatus::Running);
        let dispatcher = build_dispatcher(&services).unwrap();

        for expected_changed in [true, false] {
            let result = dispatcher
                .dispatch(ToolRequest::new("stop_container", json!({"name": "web"})))
                .await
                .into_result()
                .unwrap();
            assert_eq!(result["changed"], expected_changed);
        }
    }

    #[tokio::test]
    async fn test_empty_command_never_reaches_executor() {
        let (services, _fake, _store) = test_services(&Config::with_api_key("k").unwrap());
        let dispatcher = build_dispatcher(&services).unwrap();
        let result = dispatcher
            .dispatch(ToolRequest::new("execute_system_command", json!({"command": ""})))
            .await;
        assert_eq!(result.error().unwrap().kind(), hostgate_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_scheduled_task_round_trip() {
        let (services, _fake, store) = test_services(&Config::with_api_key("k").unwrap());
        let dispatcher = build_dispatcher(&services).unwrap();
        let result = dispatcher
            .dispatch(ToolRequest::new(
                "create_scheduled_task",
                json!({"schedule": "0 4 * * *", "command": "/usr/bin/cleanup"}),
            ))
            .await
            .into_result()
            .unwrap();
        assert_eq!(result, json!({"entry": "0 4 * * * /usr/bin/cleanup"}));
        assert_eq!(store.table(), "0 4 * * * /usr/bin/cleanup\n");
    }
}
