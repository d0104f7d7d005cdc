use log::{debug, error, info, warn};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::Mutex;

use crate::configuration::types::LaunchConfig;
use crate::container_management::types::{
    ContainerStatus, StartRequest, ValidatedStart, ValidationPolicy,
};
use crate::container_management::validation::validate;
use crate::engine::{ContainerSpec, ContainerSummary, Engine, PortMapping};
use crate::error_handling::types::{
    ControllerError, EngineError, FailureKind, StartFailure,
};

const LOCALHOST: &str = "127.0.0.1";

/// Manages the lifecycle of the single named notebook server container.
///
/// The controller never caches container state: every status is recomputed
/// from what the engine reports. Mutating operations are serialised by an
/// internal lock so that overlapping start/stop requests cannot interleave.
///
/// Design notes:
/// - Any existing container with the configured name is killed (if running)
///   and removed before a new one is created.
/// - A failed start is classified and retained until the next start attempt.
pub struct ContainerController {
    engine: Arc<dyn Engine>,
    name: String,
    image_name: String,
    data_bind: String,
    base_cmd: String,
    extra_flags: String,
    host_only: bool,
    aux_port: u16,
    policy: ValidationPolicy,
    op_lock: Mutex<()>,
    last_failure: RwLock<Option<StartFailure>>,
    final_stats: RwLock<Option<Value>>,
}

impl ContainerController {
    pub fn new(engine: Arc<dyn Engine>, config: &LaunchConfig) -> Self {
        Self {
            engine,
            name: config.server_name.clone(),
            image_name: config.image_name.clone(),
            data_bind: config.data_bind.clone(),
            base_cmd: config.container_cmd.clone(),
            extra_flags: config.extra_flags.clone(),
            host_only: config.host_only,
            aux_port: config.aux_port,
            policy: ValidationPolicy {
                min_token_length: config.min_token_length,
                require_unprivileged_port: config.require_unprivileged_port,
                aux_port: config.aux_port,
            },
            op_lock: Mutex::new(()),
            last_failure: RwLock::new(None),
            final_stats: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version handshake; `false` when the engine cannot be reached.
    pub async fn engine_available(&self) -> bool {
        match self.engine.version().await {
            Ok(version) => {
                debug!("Engine reachable, version {}", version);
                true
            }
            Err(e) => {
                debug!("Engine not reachable: {}", e);
                false
            }
        }
    }

    pub async fn container(&self) -> Result<Option<ContainerSummary>, EngineError> {
        self.engine.inspect_container(&self.name).await
    }

    pub async fn status(&self) -> ContainerStatus {
        match self.container().await {
            Ok(Some(summary)) => summary.status,
            Ok(None) => ContainerStatus::Inactive,
            Err(EngineError::Unreachable(_)) => ContainerStatus::Unknown,
            Err(e) => {
                warn!("Could not inspect container {}: {}", self.name, e);
                ContainerStatus::Unknown
            }
        }
    }

    /// `http://localhost:<port>?token=<token>` of the running server, if any.
    pub async fn server_address(&self) -> Option<String> {
        match self.container().await {
            Ok(Some(summary)) if summary.status == ContainerStatus::Running => {
                server_address(&summary.args)
            }
            _ => None,
        }
    }

    pub fn last_failure(&self) -> Option<StartFailure> {
        self.last_failure.read().ok().and_then(|f| f.clone())
    }

    /// Usage snapshot taken just before the last running container was killed.
    pub fn take_final_stats(&self) -> Option<Value> {
        self.final_stats.write().ok().and_then(|mut s| s.take())
    }

    fn set_last_failure(&self, failure: Option<StartFailure>) {
        if let Ok(mut slot) = self.last_failure.write() {
            *slot = failure;
        }
    }

    pub fn validate_request(&self, request: &StartRequest) -> Result<ValidatedStart, ControllerError> {
        validate(request, &self.policy).map_err(|errors| {
            warn!("Start request rejected: {} violation(s)", errors.len());
            ControllerError::InvalidInput(errors)
        })
    }

    /// Starts a fresh server container from `image_name:tag`.
    ///
    /// Input is validated before the engine is touched. Any previous container
    /// with the same name is removed first.
    pub async fn start(
        &self,
        tag: &str,
        request: &StartRequest,
    ) -> Result<ContainerStatus, ControllerError> {
        let validated = self.validate_request(request)?;

        let _guard = self.op_lock.lock().await;
        self.require_engine().await?;
        self.set_last_failure(None);

        self.clear().await?;

        let spec = self.container_spec(tag, &validated);
        info!(
            "Starting {} from {} on port {}",
            spec.name, spec.image, validated.port
        );

        let launched = match self.engine.create_container(&spec).await {
            Ok(id) => {
                debug!("Created container {}", id);
                self.engine.start_container(&spec.name).await
            }
            Err(e) => Err(e),
        };

        match launched {
            Ok(()) => {
                let status = self.status().await;
                info!("Container {} is {}", self.name, status);
                Ok(status)
            }
            Err(EngineError::Unreachable(_)) => Err(ControllerError::EngineUnavailable),
            Err(e) => {
                let failure = classify_failure(&e.to_string());
                error!("{}", failure);
                self.set_last_failure(Some(failure.clone()));
                let status = self.status().await;
                debug!("Status after failed start: {}", status);
                Err(ControllerError::StartFailed(failure))
            }
        }
    }

    /// Kills and removes the server container. Succeeds when nothing exists.
    pub async fn stop(&self) -> Result<ContainerStatus, ControllerError> {
        let _guard = self.op_lock.lock().await;
        self.require_engine().await?;
        self.clear().await?;
        let status = self.status().await;
        info!("Container {} is {}", self.name, status);
        Ok(status)
    }

    async fn require_engine(&self) -> Result<(), ControllerError> {
        self.engine.version().await.map(|_| ()).map_err(|e| {
            error!("Refusing container operation: {}", e);
            ControllerError::EngineUnavailable
        })
    }

    /// Kill if running, then remove. Caller holds the op lock.
    async fn clear(&self) -> Result<(), ControllerError> {
        let Some(existing) = self.engine.inspect_container(&self.name).await? else {
            debug!("No container named {}", self.name);
            return Ok(());
        };

        if existing.status == ContainerStatus::Running {
            info!("Stopping running container {}", self.name);
            let stats = match self.engine.container_stats(&self.name).await {
                Ok(stats) => stats,
                Err(e) => {
                    debug!("No final stats for {}: {}", self.name, e);
                    None
                }
            };
            if let Ok(mut slot) = self.final_stats.write() {
                *slot = stats;
            }
            match self.engine.kill_container(&self.name).await {
                Ok(()) | Err(EngineError::ContainerNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            debug!("Removing stale {} container {}", existing.status, self.name);
        }

        self.engine.remove_container(&self.name).await?;
        Ok(())
    }

    fn container_spec(&self, tag: &str, start: &ValidatedStart) -> ContainerSpec {
        let host_ip = self.host_only.then(|| LOCALHOST.to_string());
        let ports = [start.port, self.aux_port]
            .into_iter()
            .map(|port| PortMapping {
                host_ip: host_ip.clone(),
                host_port: port,
                container_port: port,
            })
            .collect();

        ContainerSpec {
            name: self.name.clone(),
            image: format!("{}:{}", self.image_name, tag),
            cmd: container_command(&self.base_cmd, &start.token, start.port, &self.extra_flags),
            env: vec!["JUPYTER_ENABLE_LAB=yes".to_string()],
            binds: vec![format!(
                "{}:{}:rw",
                start.mount.display(),
                self.data_bind
            )],
            ports,
        }
    }
}

pub fn container_command(base: &str, token: &str, port: u16, extra_flags: &str) -> Vec<String> {
    let mut cmd: Vec<String> = base.split_whitespace().map(String::from).collect();
    cmd.push(format!("--NotebookApp.token={}", token));
    cmd.push(format!("--port={}", port));
    cmd.extend(extra_flags.split_whitespace().map(String::from));
    cmd
}

/// Rebuilds the browser link from the arguments the container was started with.
pub fn server_address(args: &[String]) -> Option<String> {
    let port = args.iter().find_map(|a| a.strip_prefix("--port="))?;
    let token = args
        .iter()
        .find_map(|a| a.strip_prefix("--NotebookApp.token="))?;
    Some(format!("http://localhost:{}?token={}", port, token))
}

fn failure_patterns() -> &'static [(Regex, FailureKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, FailureKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r"(?i)file ?shar|drive (is not |has not been )?shared|mounts denied|not shared from the host",
                FailureKind::FileShare,
            ),
            (
                r"(?i)port is already allocated|address already in use|bind: .*(in use|only one usage)",
                FailureKind::PortInUse,
            ),
            (
                r"(?i)no such image|pull access denied|manifest unknown",
                FailureKind::ImageMissing,
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
        .collect()
    })
}

/// Maps engine error text onto a [`FailureKind`], keeping the full detail.
pub fn classify_failure(detail: &str) -> StartFailure {
    let kind = failure_patterns()
        .iter()
        .find(|(re, _)| re.is_match(detail))
        .map(|(_, kind)| *kind)
        .unwrap_or(FailureKind::Other);
    StartFailure {
        kind,
        detail: detail.to_string(),
    }
}
