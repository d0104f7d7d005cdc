//! Container engine abstraction.
//!
//! The launcher only needs a handful of engine capabilities: a version
//! handshake, image presence checks, a streamed pull, and create/start/
//! inspect/stats/kill/remove of one named container. [`Engine`] captures exactly
//! that surface so the controller, puller and poller can be exercised against
//! an in-memory engine in tests.
//!
//! Re-exports:
//! - [`DockerEngine`]: implementation over the local Docker control socket.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::container_management::types::ContainerStatus;
use crate::error_handling::types::EngineError;

pub mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerEngine;

/// Host port published by the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// `None` binds on all interfaces.
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
}

/// Everything needed to create the server container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// Bind mounts in `source:target:mode` form.
    pub binds: Vec<String>,
    pub ports: Vec<PortMapping>,
}

/// What the engine reports about an existing container.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    pub status: ContainerStatus,
    pub args: Vec<String>,
}

/// One event of a streamed image pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullEvent {
    pub status: Option<String>,
    /// Layer identifier, when the event concerns a layer.
    pub id: Option<String>,
    /// Cumulative bytes transferred for this layer.
    pub current: Option<u64>,
}

pub type PullStream<'a> = BoxStream<'a, Result<PullEvent, EngineError>>;

#[async_trait]
pub trait Engine: Send + Sync {
    /// Fast handshake; fails with [`EngineError::Unreachable`] when the daemon cannot be reached.
    async fn version(&self) -> Result<String, EngineError>;

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError>;

    /// `Ok(None)` when no container has this name.
    async fn inspect_container(&self, name: &str)
        -> Result<Option<ContainerSummary>, EngineError>;

    /// Creates the container without starting it and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, name: &str) -> Result<(), EngineError>;

    /// One-shot resource usage snapshot; `Ok(None)` when the container is gone.
    async fn container_stats(&self, name: &str) -> Result<Option<serde_json::Value>, EngineError>;

    async fn kill_container(&self, name: &str) -> Result<(), EngineError>;

    /// Removing an absent container succeeds.
    async fn remove_container(&self, name: &str) -> Result<(), EngineError>;

    fn pull_image(&self, image: &str, tag: &str) -> PullStream<'_>;
}
