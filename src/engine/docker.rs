use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, ContainerStateStatusEnum, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, KillContainerOptions,
    RemoveContainerOptions, StartContainerOptions, StatsOptionsBuilder,
};
use bollard::Docker;
use futures_util::StreamExt;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::{ContainerSpec, ContainerSummary, Engine, PullEvent, PullStream};
use crate::container_management::types::ContainerStatus;
use crate::error_handling::types::EngineError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Docker Engine API client over the platform's local control socket.
///
/// Connecting does not contact the daemon; reachability is established by
/// [`Engine::version`], which is bounded by a short timeout so that status
/// polling never hangs on a stalled daemon.
pub struct DockerEngine {
    docker: Docker,
    handshake_timeout: Duration,
}

impl DockerEngine {
    /// Uses `DOCKER_HOST` when set, otherwise the platform default socket or pipe.
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;
        info!("Docker client configured");
        Ok(Self {
            docker,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// A server error means the daemon answered; anything else means we never got through.
fn map_error(e: bollard::errors::Error) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError { message, .. } => EngineError::Api(message),
        other => EngineError::Unreachable(other.to_string()),
    }
}

fn map_status(status: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerStatus::Paused,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerStatus::Exited,
        Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Dead,
        _ => ContainerStatus::Unknown,
    }
}

type ExposedPorts = HashMap<String, HashMap<(), ()>>;

fn host_config(spec: &ContainerSpec) -> (HostConfig, ExposedPorts) {
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports = ExposedPorts::new();
    for port in &spec.ports {
        let key = format!("{}/tcp", port.container_port);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: port.host_ip.clone(),
                host_port: Some(port.host_port.to_string()),
            }]),
        );
    }

    let config = HostConfig {
        binds: Some(spec.binds.clone()),
        port_bindings: Some(port_bindings),
        ..Default::default()
    };
    (config, exposed_ports)
}

#[async_trait]
impl Engine for DockerEngine {
    async fn version(&self) -> Result<String, EngineError> {
        match tokio::time::timeout(self.handshake_timeout, self.docker.version()).await {
            Ok(Ok(version)) => Ok(version.version.unwrap_or_default()),
            Ok(Err(e)) => Err(EngineError::Unreachable(e.to_string())),
            Err(_) => Err(EngineError::Unreachable(format!(
                "no answer within {}s",
                self.handshake_timeout.as_secs()
            ))),
        }
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        debug!("Checking if image exists: {}", reference);
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn inspect_container(
        &self,
        name: &str,
    ) -> Result<Option<ContainerSummary>, EngineError> {
        let details = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => details,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(map_error(e)),
        };

        let status = map_status(details.state.and_then(|s| s.status));
        debug!("Container {} reported as {}", name, status);

        Ok(Some(ContainerSummary {
            id: details.id.unwrap_or_default(),
            image: details
                .config
                .and_then(|c| c.image)
                .unwrap_or_default(),
            status,
            args: details.args.unwrap_or_default(),
        }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let (host_config, exposed_ports) = host_config(spec);
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        debug!("Creating container {} from {}", spec.name, spec.image);
        let response = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    EngineError::ImageNotFound(format!("No such image: {} ({})", spec.image, e))
                } else {
                    map_error(e)
                }
            })?;
        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        debug!("Starting container {}", name);
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(map_error)
    }

    async fn kill_container(&self, name: &str) -> Result<(), EngineError> {
        debug!("Killing container {}", name);
        match self
            .docker
            .kill_container(name, None::<KillContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Err(EngineError::ContainerNotFound(name.to_string())),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn container_stats(&self, name: &str) -> Result<Option<Value>, EngineError> {
        let options = StatsOptionsBuilder::new().stream(false).one_shot(true).build();
        let mut stream = self.docker.stats(name, Some(options));
        match stream.next().await {
            Some(Ok(stats)) => Ok(serde_json::to_value(stats).ok()),
            Some(Err(e)) if is_not_found(&e) => Ok(None),
            Some(Err(e)) => Err(map_error(e)),
            None => Ok(None),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        debug!("Removing container {}", name);
        let options = RemoveContainerOptions {
            force: false,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!("Container {} already removed", name);
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    fn pull_image(&self, image: &str, tag: &str) -> PullStream<'_> {
        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .map(|item| {
                item.map(|info| PullEvent {
                    status: info.status,
                    id: info.id,
                    current: info
                        .progress_detail
                        .and_then(|detail| detail.current)
                        .and_then(|current| u64::try_from(current).ok()),
                })
                .map_err(|e| EngineError::Api(e.to_string()))
            })
            .boxed()
    }
}
