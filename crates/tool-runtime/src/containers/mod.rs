//! Container lifecycle behind a runtime-agnostic seam.
//!
//! `ContainerRuntime` speaks the runtime's language (status codes, raw
//! bytes). `ContainerManager` layers validation, idempotence and error
//! classification on top. Nothing is cached: every call re-reads the runtime.

pub mod docker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostgate_core::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use docker::DockerRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
    Unknown,
}

impl ContainerStatus {
    /// Map a runtime state string (`running`, `exited`, …) onto our enum.
    pub fn from_runtime_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" | "restarting" | "paused" => ContainerStatus::Running,
            "exited" | "dead" | "removing" => ContainerStatus::Stopped,
            _ => ContainerStatus::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

/// Point-in-time snapshot of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub image: String,
    pub name: String,
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerInspect {
    pub container: ContainerRef,
    /// Everything the runtime reported, unfiltered.
    pub attributes: Value,
}

/// Failures as the runtime reports them, before classification.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),
    /// Target already in the requested state (HTTP 304 from Docker).
    #[error("not modified")]
    NotModified,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("container runtime unreachable: {0}")]
    Transport(String),
    #[error("container runtime error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Operations the manager needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list(&self, include_stopped: bool) -> Result<Vec<ContainerRef>, RuntimeError>;
    async fn list_images(&self) -> Result<Vec<ImageRef>, RuntimeError>;
    /// Create without starting. Returns the runtime-assigned id.
    async fn create(&self, spec: &CreateSpec) -> Result<String, RuntimeError>;
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;
    async fn stop(&self, name: &str, timeout_secs: u32) -> Result<(), RuntimeError>;
    async fn restart(&self, name: &str) -> Result<(), RuntimeError>;
    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError>;
    async fn inspect(&self, name: &str) -> Result<ContainerInspect, RuntimeError>;
    /// Raw combined stdout/stderr. `None` means every line.
    async fn logs(&self, name: &str, tail: Option<u64>) -> Result<Vec<u8>, RuntimeError>;
    /// Block until the container exits; returns its exit code.
    async fn wait(&self, name: &str) -> Result<i64, RuntimeError>;
}

/// Result of start/stop/restart/remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleOutcome {
    pub name: String,
    pub id: String,
    pub action: &'static str,
    /// `false` when the container was already in the target state.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateOutcome {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

pub const MAX_STOP_TIMEOUT_SECS: i64 = 600;

pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    wait_timeout: Duration,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, wait_timeout: Duration) -> Self {
        Self {
            runtime,
            wait_timeout,
        }
    }

    /// Containers sorted by name. Stopped ones only when asked for.
    pub async fn list(&self, include_stopped: bool) -> Result<Vec<ContainerRef>, GatewayError> {
        let mut containers = self
            .runtime
            .list(include_stopped)
            .await
            .map_err(|e| classify(e, "list containers"))?;
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    pub async fn list_images(&self) -> Result<Vec<ImageRef>, GatewayError> {
        self.runtime
            .list_images()
            .await
            .map_err(|e| classify(e, "list images"))
    }

    /// Create and start a container, like `docker run`.
    ///
    /// With `detach = false` the call waits for the container to exit (bounded
    /// by the configured wait timeout) and returns its exit code and logs.
    pub async fn create(
        &self,
        image: &str,
        name: &str,
        command: Option<&str>,
        detach: bool,
    ) -> Result<CreateOutcome, GatewayError> {
        validate_image(image)?;
        validate_name(name)?;
        let command = command
            .map(split_command)
            .transpose()?
            .filter(|argv| !argv.is_empty());

        let spec = CreateSpec {
            image: image.to_string(),
            name: name.to_string(),
            command,
        };
        let id = self.runtime.create(&spec).await.map_err(|e| match e {
            RuntimeError::NotFound(_) => GatewayError::not_found(format!("image not found: {image}")),
            RuntimeError::Conflict(msg) => {
                GatewayError::upstream(format!("container name '{name}' is already in use: {msg}"))
            }
            other => classify(other, "create container"),
        })?;
        info!(container = name, image, id = %short_id(&id), "container created");

        self.runtime
            .start(name)
            .await
            .or_else(ignore_not_modified)
            .map_err(|e| classify_for(e, name, "start container"))?;

        if detach {
            return Ok(CreateOutcome {
                id,
                name: name.to_string(),
                status: ContainerStatus::Running,
                exit_code: None,
                logs: None,
            });
        }

        let exit_code = tokio::time::timeout(self.wait_timeout, self.runtime.wait(name))
            .await
            .map_err(|_| {
                warn!(container = name, "container did not exit before wait timeout");
                GatewayError::timeout(format!(
                    "container '{name}' did not exit within {}s",
                    self.wait_timeout.as_secs()
                ))
            })?
            .map_err(|e| classify_for(e, name, "wait for container"))?;
        let logs = self
            .runtime
            .logs(name, None)
            .await
            .map_err(|e| classify_for(e, name, "read container logs"))?;

        Ok(CreateOutcome {
            id,
            name: name.to_string(),
            status: ContainerStatus::Stopped,
            exit_code: Some(exit_code),
            logs: Some(String::from_utf8_lossy(&logs).into_owned()),
        })
    }

    /// Idempotent: an already-running container is reported with `changed: false`.
    pub async fn start(&self, name: &str) -> Result<LifecycleOutcome, GatewayError> {
        validate_name(name)?;
        let current = self.current(name).await?;
        if current.status.is_running() {
            debug!(container = name, "already running");
            return Ok(outcome(&current, "start", false));
        }
        let changed = self
            .runtime
            .start(name)
            .await
            .map(|_| true)
            .or_else(|e| not_modified_as(e, false))
            .map_err(|e| classify_for(e, name, "start container"))?;
        info!(container = name, changed, "container started");
        Ok(outcome(&current, "start", changed))
    }

    /// Idempotent: an already-stopped container is reported with `changed: false`.
    pub async fn stop(&self, name: &str, timeout_secs: i64) -> Result<LifecycleOutcome, GatewayError> {
        validate_name(name)?;
        let timeout_secs = validate_stop_timeout(timeout_secs)?;
        let current = self.current(name).await?;
        if !current.status.is_running() {
            debug!(container = name, "already stopped");
            return Ok(outcome(&current, "stop", false));
        }
        let changed = self
            .runtime
            .stop(name, timeout_secs)
            .await
            .map(|_| true)
            .or_else(|e| not_modified_as(e, false))
            .map_err(|e| classify_for(e, name, "stop container"))?;
        info!(container = name, changed, "container stopped");
        Ok(outcome(&current, "stop", changed))
    }

    pub async fn restart(&self, name: &str) -> Result<LifecycleOutcome, GatewayError> {
        validate_name(name)?;
        let current = self.current(name).await?;
        self.runtime
            .restart(name)
            .await
            .map_err(|e| classify_for(e, name, "restart container"))?;
        info!(container = name, "container restarted");
        Ok(outcome(&current, "restart", true))
    }

    /// Removing a running container needs `force`; otherwise `Upstream`.
    pub async fn remove(&self, name: &str, force: bool) -> Result<LifecycleOutcome, GatewayError> {
        validate_name(name)?;
        let current = self.current(name).await?;
        if current.status.is_running() && !force {
            return Err(running_without_force(name));
        }
        self.runtime.remove(name, force).await.map_err(|e| match e {
            RuntimeError::Conflict(_) if !force => running_without_force(name),
            other => classify_for(other, name, "remove container"),
        })?;
        info!(container = name, force, "container removed");
        Ok(outcome(&current, "remove", true))
    }

    pub async fn inspect(&self, name: &str) -> Result<ContainerInspect, GatewayError> {
        validate_name(name)?;
        self.runtime
            .inspect(name)
            .await
            .map_err(|e| classify_for(e, name, "inspect container"))
    }

    /// Last `tail` log lines, undecodable bytes replaced.
    pub async fn logs(&self, name: &str, tail: i64) -> Result<String, GatewayError> {
        validate_name(name)?;
        if tail < 1 {
            return Err(GatewayError::validation("parameter 'tail' must be at least 1"));
        }
        let bytes = self
            .runtime
            .logs(name, Some(tail as u64))
            .await
            .map_err(|e| classify_for(e, name, "read container logs"))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn current(&self, name: &str) -> Result<ContainerRef, GatewayError> {
        self.runtime
            .inspect(name)
            .await
            .map(|i| i.container)
            .map_err(|e| classify_for(e, name, "inspect container"))
    }
}

fn outcome(container: &ContainerRef, action: &'static str, changed: bool) -> LifecycleOutcome {
    LifecycleOutcome {
        name: container.name.clone(),
        id: container.id.clone(),
        action,
        changed,
    }
}

fn running_without_force(name: &str) -> GatewayError {
    GatewayError::upstream(format!(
        "container '{name}' is running; stop it first or pass force=true"
    ))
}

fn ignore_not_modified(err: RuntimeError) -> Result<(), RuntimeError> {
    not_modified_as(err, ())
}

fn not_modified_as<T>(err: RuntimeError, value: T) -> Result<T, RuntimeError> {
    match err {
        RuntimeError::NotModified => Ok(value),
        other => Err(other),
    }
}

/// Classify a failure that concerns a named container.
fn classify_for(err: RuntimeError, name: &str, action: &str) -> GatewayError {
    match err {
        RuntimeError::NotFound(_) => GatewayError::not_found(format!("container not found: {name}")),
        other => classify(other, action),
    }
}

fn classify(err: RuntimeError, action: &str) -> GatewayError {
    match err {
        RuntimeError::NotFound(msg) => GatewayError::not_found(msg),
        RuntimeError::NotModified => GatewayError::internal(format!("{action}: unexpected not-modified")),
        RuntimeError::Conflict(msg) => GatewayError::upstream(format!("{action}: {msg}")),
        RuntimeError::Transport(msg) => {
            GatewayError::upstream(format!("{action}: container runtime unreachable: {msg}"))
        }
        RuntimeError::Api { status, message } => {
            GatewayError::upstream(format!("{action}: runtime returned {status}: {message}"))
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Names follow the runtime's own rule: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
pub fn validate_name(name: &str) -> Result<(), GatewayError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        _ => false,
    };
    if valid && name.len() <= 128 {
        Ok(())
    } else {
        Err(GatewayError::validation(format!(
            "invalid container name '{name}': expected [a-zA-Z0-9][a-zA-Z0-9_.-]*"
        )))
    }
}

fn validate_image(image: &str) -> Result<(), GatewayError> {
    if image.is_empty() || image.starts_with('-') || image.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(GatewayError::validation(format!("invalid image reference '{image}'")));
    }
    Ok(())
}

fn validate_stop_timeout(timeout_secs: i64) -> Result<u32, GatewayError> {
    if (0..=MAX_STOP_TIMEOUT_SECS).contains(&timeout_secs) {
        Ok(timeout_secs as u32)
    } else {
        Err(GatewayError::validation(format!(
            "parameter 'timeout' must be between 0 and {MAX_STOP_TIMEOUT_SECS}"
        )))
    }
}

/// Split a command line into argv, honouring single quotes, double quotes
/// and backslash escapes. No expansion of any kind.
pub fn split_command(line: &str) -> Result<Vec<String>, GatewayError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), c) => current.push(c),
            (Some('"'), '"') => quote = None,
            (Some('"'), '\\') => match chars.next() {
                Some(next @ ('"' | '\\')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err(GatewayError::validation("unterminated quote in 'command'"));
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}
