//! In-memory stand-ins for the host and container runtime.
//!
//! The fakes reproduce the runtime's status semantics (304 on no-op
//! start/stop, 409 on name clash or unforced removal of a running
//! container) so manager logic is exercised as it would be against Docker.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hostgate_core::{Config, GatewayError};
use serde_json::{json, Value};

use crate::catalog::Services;
use crate::containers::{
    ContainerInspect, ContainerRef, ContainerRuntime, ContainerStatus, CreateSpec, ImageRef,
    RuntimeError,
};
use crate::schedule::ScheduleStore;
use crate::tool::{ParamSpec, ParamType, Tool, ToolDefinition, ToolParams};

/// Returns `{"echo": message}`.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "echo",
            "Echo the message back",
            vec![ParamSpec::required("message", ParamType::String, "Text to echo")],
        )
    }

    async fn execute(&self, params: ToolParams) -> Result<Value, GatewayError> {
        Ok(json!({ "echo": params.str("message")? }))
    }
}

struct FakeContainer {
    id: String,
    image: String,
    status: ContainerStatus,
    command: Option<Vec<String>>,
    logs: Vec<u8>,
    exit_code: i64,
}

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    images: BTreeSet<String>,
    unreachable: bool,
    next_id: u64,
}

#[derive(Default)]
pub struct FakeContainerRuntime {
    state: Mutex<FakeState>,
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, image: &str) {
        self.state.lock().unwrap().images.insert(image.to_string());
    }

    pub fn add_container(&self, name: &str, image: &str, status: ContainerStatus) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id,
                image: image.to_string(),
                status,
                command: None,
                logs: Vec::new(),
                exit_code: 0,
            },
        );
    }

    pub fn set_logs(&self, name: &str, logs: Vec<u8>) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(name) {
            c.logs = logs;
        }
    }

    pub fn set_exit_code(&self, name: &str, code: i64) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(name) {
            c.exit_code = code;
        }
    }

    /// Make every call fail as if the daemon socket were gone.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn command_of(&self, name: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .and_then(|c| c.command.clone())
    }

    pub fn status_of(&self, name: &str) -> Option<ContainerStatus> {
        self.state.lock().unwrap().containers.get(name).map(|c| c.status)
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut FakeState) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(RuntimeError::Transport(
                "connection refused (/var/run/docker.sock)".to_string(),
            ));
        }
        f(&mut state)
    }
}

fn no_such(name: &str) -> RuntimeError {
    RuntimeError::NotFound(format!("No such container: {name}"))
}

fn to_ref(name: &str, c: &FakeContainer) -> ContainerRef {
    ContainerRef {
        id: c.id.clone(),
        name: name.to_string(),
        status: c.status,
        image: c.image.clone(),
    }
}

fn runtime_state(status: ContainerStatus) -> &'static str {
    match status {
        ContainerStatus::Created => "created",
        ContainerStatus::Running => "running",
        ContainerStatus::Stopped => "exited",
        ContainerStatus::Unknown => "dead",
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn list(&self, include_stopped: bool) -> Result<Vec<ContainerRef>, RuntimeError> {
        self.with_state(|s| {
            Ok(s.containers
                .iter()
                .filter(|(_, c)| include_stopped || c.status.is_running())
                .map(|(name, c)| to_ref(name, c))
                .collect())
        })
    }

    async fn list_images(&self) -> Result<Vec<ImageRef>, RuntimeError> {
        self.with_state(|s| {
            Ok(s.images
                .iter()
                .enumerate()
                .map(|(i, tag)| ImageRef {
                    id: format!("sha256:{i:064x}"),
                    tags: vec![tag.clone()],
                })
                .collect())
        })
    }

    async fn create(&self, spec: &CreateSpec) -> Result<String, RuntimeError> {
        self.with_state(|s| {
            if !s.images.contains(&spec.image) {
                return Err(RuntimeError::NotFound(format!("No such image: {}", spec.image)));
            }
            if s.containers.contains_key(&spec.name) {
                return Err(RuntimeError::Conflict(format!(
                    "The container name \"/{}\" is already in use",
                    spec.name
                )));
            }
            s.next_id += 1;
            let id = format!("{:064x}", s.next_id);
            s.containers.insert(
                spec.name.clone(),
                FakeContainer {
                    id: id.clone(),
                    image: spec.image.clone(),
                    status: ContainerStatus::Created,
                    command: spec.command.clone(),
                    logs: Vec::new(),
                    exit_code: 0,
                },
            );
            Ok(id)
        })
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.with_state(|s| {
            let c = s.containers.get_mut(name).ok_or_else(|| no_such(name))?;
            if c.status.is_running() {
                return Err(RuntimeError::NotModified);
            }
            c.status = ContainerStatus::Running;
            Ok(())
        })
    }

    async fn stop(&self, name: &str, _timeout_secs: u32) -> Result<(), RuntimeError> {
        self.with_state(|s| {
            let c = s.containers.get_mut(name).ok_or_else(|| no_such(name))?;
            if !c.status.is_running() {
                return Err(RuntimeError::NotModified);
            }
            c.status = ContainerStatus::Stopped;
            Ok(())
        })
    }

    async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        self.with_state(|s| {
            let c = s.containers.get_mut(name).ok_or_else(|| no_such(name))?;
            c.status = ContainerStatus::Running;
            Ok(())
        })
    }

    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        self.with_state(|s| {
            let c = s.containers.get(name).ok_or_else(|| no_such(name))?;
            if c.status.is_running() && !force {
                return Err(RuntimeError::Conflict(format!(
                    "You cannot remove a running container {}",
                    c.id
                )));
            }
            s.containers.remove(name);
            Ok(())
        })
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInspect, RuntimeError> {
        self.with_state(|s| {
            let c = s.containers.get(name).ok_or_else(|| no_such(name))?;
            Ok(ContainerInspect {
                container: to_ref(name, c),
                attributes: json!({
                    "Id": c.id,
                    "Name": format!("/{name}"),
                    "Config": { "Image": c.image, "Cmd": c.command },
                    "State": {
                        "Status": runtime_state(c.status),
                        "Running": c.status.is_running(),
                        "ExitCode": c.exit_code,
                    },
                }),
            })
        })
    }

    async fn logs(&self, name: &str, tail: Option<u64>) -> Result<Vec<u8>, RuntimeError> {
        self.with_state(|s| {
            let c = s.containers.get(name).ok_or_else(|| no_such(name))?;
            let lines: Vec<&[u8]> = c.logs.split_inclusive(|b| *b == b'\n').collect();
            let skip = match tail {
                Some(n) => lines.len().saturating_sub(n as usize),
                None => 0,
            };
            Ok(lines[skip..].concat())
        })
    }

    async fn wait(&self, name: &str) -> Result<i64, RuntimeError> {
        self.with_state(|s| {
            let c = s.containers.get_mut(name).ok_or_else(|| no_such(name))?;
            c.status = ContainerStatus::Stopped;
            Ok(c.exit_code)
        })
    }
}

/// Crontab held in memory. Yields between read and write so unguarded
/// read-modify-write cycles would interleave.
#[derive(Default)]
pub struct MemoryScheduleStore {
    table: Mutex<String>,
}

impl MemoryScheduleStore {
    pub fn with_table(table: &str) -> Self {
        Self {
            table: Mutex::new(table.to_string()),
        }
    }

    pub fn table(&self) -> String {
        self.table.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn read_table(&self) -> Result<String, GatewayError> {
        let table = self.table.lock().unwrap().clone();
        tokio::task::yield_now().await;
        Ok(table)
    }

    async fn write_table(&self, table: &str) -> Result<(), GatewayError> {
        tokio::task::yield_now().await;
        *self.table.lock().unwrap() = table.to_string();
        Ok(())
    }
}

/// Services wired to fakes, plus handles to drive them.
pub fn test_services(
    config: &Config,
) -> (Services, Arc<FakeContainerRuntime>, Arc<MemoryScheduleStore>) {
    let fake = Arc::new(FakeContainerRuntime::new());
    let store = Arc::new(MemoryScheduleStore::default());
    let services = Services::new(config, fake.clone(), store.clone()).unwrap();
    (services, fake, store)
}
