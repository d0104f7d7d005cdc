//! Core types used by the container management subsystem.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Status of the named server container as last reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// No container with the configured name exists.
    Inactive,
    Created,
    Running,
    Exited,
    Paused,
    Dead,
    /// The engine could not be reached.
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Inactive => "inactive",
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Unknown => "unknown",
        }
    }

    /// A container exists but is not serving.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            ContainerStatus::Created
                | ContainerStatus::Exited
                | ContainerStatus::Paused
                | ContainerStatus::Dead
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User input for a start attempt, before validation.
///
/// The port is kept as entered so that non-numeric input can be reported
/// together with every other violated constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub mount: PathBuf,
    pub token: String,
    pub port: String,
}

impl StartRequest {
    pub fn new(mount: impl Into<PathBuf>, token: impl Into<String>, port: impl ToString) -> Self {
        Self {
            mount: mount.into(),
            token: token.into(),
            port: port.to_string(),
        }
    }
}

/// A start request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedStart {
    pub mount: PathBuf,
    pub token: String,
    pub port: u16,
}

/// Constraints applied to start requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationPolicy {
    pub min_token_length: usize,
    pub require_unprivileged_port: bool,
    pub aux_port: u16,
}
