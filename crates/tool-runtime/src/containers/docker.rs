//! Docker Engine implementation of `ContainerRuntime` via bollard.

use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, ListContainersOptionsBuilder,
    ListImagesOptionsBuilder, LogsOptions, RemoveContainerOptionsBuilder,
    RestartContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
    WaitContainerOptions,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use super::{ContainerInspect, ContainerRef, ContainerRuntime, ContainerStatus, CreateSpec, ImageRef, RuntimeError};

const CONNECT_TIMEOUT_SECS: u64 = 120;
const RESTART_GRACE_SECS: i32 = 10;

/// One pooled client shared by every request.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect lazily. `host` may be `unix:///path`, `tcp://…` or `http://…`;
    /// `None` uses the client's local defaults.
    pub fn connect(host: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match host {
            None => Docker::connect_with_local_defaults(),
            Some(h) if h.starts_with("unix://") => {
                Docker::connect_with_socket(h, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(h) => Docker::connect_with_http(h, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION),
        }
        .map_err(|e| RuntimeError::Transport(e.to_string()))?;
        Ok(Self { docker })
    }
}

impl From<BollardError> for RuntimeError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => match status_code {
                404 => RuntimeError::NotFound(message),
                304 => RuntimeError::NotModified,
                409 => RuntimeError::Conflict(message),
                status => RuntimeError::Api { status, message },
            },
            other => RuntimeError::Transport(other.to_string()),
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn trim_slash(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

/// Build a ref from a list summary (`Id`, `Names`, `Image`, `State`).
fn ref_from_summary(summary: &Value) -> ContainerRef {
    let name = summary
        .get("Names")
        .and_then(Value::as_array)
        .and_then(|names| names.first())
        .and_then(Value::as_str)
        .map(trim_slash)
        .unwrap_or_default();
    ContainerRef {
        id: str_field(summary, "Id").to_string(),
        name,
        status: ContainerStatus::from_runtime_state(str_field(summary, "State")),
        image: str_field(summary, "Image").to_string(),
    }
}

/// Build a ref from an inspect response (`Name`, `State.Status`, `Config.Image`).
fn ref_from_inspect(attributes: &Value) -> ContainerRef {
    let state = attributes
        .get("State")
        .map(|s| str_field(s, "Status"))
        .unwrap_or_default();
    let image = attributes
        .get("Config")
        .map(|c| str_field(c, "Image"))
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| str_field(attributes, "Image"));
    ContainerRef {
        id: str_field(attributes, "Id").to_string(),
        name: trim_slash(str_field(attributes, "Name")),
        status: ContainerStatus::from_runtime_state(state),
        image: image.to_string(),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, RuntimeError> {
    serde_json::to_value(value).map_err(|e| RuntimeError::Api {
        status: 500,
        message: format!("unreadable runtime response: {e}"),
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list(&self, include_stopped: bool) -> Result<Vec<ContainerRef>, RuntimeError> {
        let options = ListContainersOptionsBuilder::new().all(include_stopped).build();
        let summaries = self.docker.list_containers(Some(options)).await?;
        summaries
            .iter()
            .map(|s| to_json(s).map(|v| ref_from_summary(&v)))
            .collect()
    }

    async fn list_images(&self) -> Result<Vec<ImageRef>, RuntimeError> {
        let options = ListImagesOptionsBuilder::new().all(false).build();
        let images = self.docker.list_images(Some(options)).await?;
        images
            .iter()
            .map(|img| {
                let v = to_json(img)?;
                let tags = v
                    .get("RepoTags")
                    .and_then(Value::as_array)
                    .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                Ok(ImageRef {
                    id: str_field(&v, "Id").to_string(),
                    tags,
                })
            })
            .collect()
    }

    async fn create(&self, spec: &CreateSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptionsBuilder::new().name(&spec.name).build();
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            ..ContainerCreateBody::default()
        };
        let response = self.docker.create_container(Some(options), body).await?;
        for warning in &response.warnings {
            debug!(container = %spec.name, warning = %warning, "runtime warning on create");
        }
        Ok(response.id)
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn stop(&self, name: &str, timeout_secs: u32) -> Result<(), RuntimeError> {
        let t = i32::try_from(timeout_secs).unwrap_or(i32::MAX);
        let options = StopContainerOptionsBuilder::new().t(t).build();
        self.docker.stop_container(name, Some(options)).await?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        let options = RestartContainerOptionsBuilder::new().t(RESTART_GRACE_SECS).build();
        self.docker.restart_container(name, Some(options)).await?;
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::new().force(force).build();
        self.docker.remove_container(name, Some(options)).await?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInspect, RuntimeError> {
        let response = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await?;
        let attributes = to_json(&response)?;
        Ok(ContainerInspect {
            container: ref_from_inspect(&attributes),
            attributes,
        })
    }

    async fn logs(&self, name: &str, tail: Option<u64>) -> Result<Vec<u8>, RuntimeError> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            tail: tail.map_or_else(|| "all".to_string(), |n| n.to_string()),
            ..Default::default()
        };
        let mut stream = self.docker.logs(name, Some(options));
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?.into_bytes());
        }
        Ok(out)
    }

    async fn wait(&self, name: &str) -> Result<i64, RuntimeError> {
        let mut stream = self.docker.wait_container(name, None::<WaitContainerOptions>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits arrive as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(RuntimeError::Transport(
                "wait stream ended without a status".to_string(),
            )),
        }
    }
}
