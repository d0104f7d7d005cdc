use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::configuration::LaunchConfig;
use crate::container_management::{
    newest_local_tag, ContainerController, ContainerStatus, StartRequest,
};
use crate::engine::Engine;
use crate::error_handling::types::{ControllerError, StartFailure};
use crate::image_pull::{ImagePuller, ProgressUpdate, PullOutcome};
use crate::observable::Observable;
use crate::registry::TagResolver;
use crate::status_poller::{StatusPoller, StatusSnapshot};
use crate::telemetry::Pinger;

/// Which image tags are known and which one the launcher will run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagState {
    /// Registry version tags, newest first.
    pub registry: Vec<String>,
    /// Newest registry tag present locally.
    pub local: Option<String>,
    pub requested: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LauncherReport {
    pub available: bool,
    pub status: ContainerStatus,
    pub tag: Option<String>,
    pub latest_tag: Option<String>,
    pub update_available: bool,
    pub address: Option<String>,
    pub last_failure: Option<StartFailure>,
    pub progress: Option<ProgressUpdate>,
    pub update_running: bool,
}

type UpdateSlot = Arc<Mutex<Option<CancellationToken>>>;

/// Held for the duration of a pull; releases the slot on drop.
pub struct UpdateGuard {
    slot: UpdateSlot,
    token: CancellationToken,
}

impl UpdateGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

/// Application core shared by the command line and the control interface.
pub struct Launcher {
    config: LaunchConfig,
    engine: Arc<dyn Engine>,
    controller: Arc<ContainerController>,
    resolver: TagResolver,
    puller: ImagePuller,
    poller: Arc<StatusPoller>,
    pinger: Pinger,
    prefer_latest: bool,
    tags: Observable<TagState>,
    progress: Observable<Option<ProgressUpdate>>,
    update_slot: UpdateSlot,
    background_pings: bool,
}

impl Launcher {
    pub fn new(
        config: LaunchConfig,
        engine: Arc<dyn Engine>,
        resolver: TagResolver,
        pinger: Pinger,
        prefer_latest: bool,
    ) -> Self {
        let controller = Arc::new(ContainerController::new(engine.clone(), &config));
        let poller = Arc::new(StatusPoller::new(
            controller.clone(),
            Duration::from_secs(config.poll_interval_secs),
        ));
        Self {
            puller: ImagePuller::new(engine.clone()),
            config,
            engine,
            controller,
            resolver,
            poller,
            pinger,
            prefer_latest,
            tags: Observable::new(TagState::default()),
            progress: Observable::new(None),
            update_slot: Arc::new(Mutex::new(None)),
            background_pings: false,
        }
    }

    /// For long-running servers: pings no longer delay the action that triggered them.
    pub fn with_background_pings(mut self) -> Self {
        self.background_pings = true;
        self
    }

    /// Queries the registry and the engine once so that every accessor has data.
    pub async fn initialise(&self) {
        self.poller.poll_once().await;
        self.refresh_registry_tags().await;
        self.refresh_local_tag().await;
        let tags = self.tags();
        info!(
            "Requested tag: {}, newest available: {}",
            tags.requested.as_deref().unwrap_or("none"),
            tags.registry.first().map(String::as_str).unwrap_or("unknown")
        );
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<ContainerController> {
        &self.controller
    }

    pub fn poller(&self) -> &Arc<StatusPoller> {
        &self.poller
    }

    pub fn tags(&self) -> TagState {
        self.tags.get()
    }

    pub fn subscribe_tags(&self) -> watch::Receiver<TagState> {
        self.tags.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<ProgressUpdate>> {
        self.progress.subscribe()
    }

    fn requested_tag(&self, registry: &[String], local: Option<&String>) -> Option<String> {
        if let Some(tag) = &self.config.fixed_tag {
            return Some(tag.clone());
        }
        if self.prefer_latest {
            if let Some(newest) = registry.first() {
                return Some(newest.clone());
            }
        }
        local.cloned()
    }

    pub async fn refresh_registry_tags(&self) -> Vec<String> {
        let registry = self
            .resolver
            .list_tags(&self.config.image_name, &self.config.tag_prefix)
            .await;
        let mut tags = self.tags();
        // an offline registry must not erase what we learned earlier
        if !registry.is_empty() {
            tags.registry = registry.clone();
            self.tags.set(tags);
        }
        registry
    }

    pub async fn refresh_local_tag(&self) -> TagState {
        let mut tags = self.tags();
        tags.local =
            newest_local_tag(self.engine.as_ref(), &self.config.image_name, &tags.registry).await;
        tags.requested = self.requested_tag(&tags.registry, tags.local.as_ref());
        self.tags.set(tags.clone());
        tags
    }

    /// Engine reachable and the newest registry tag is not the newest local one.
    /// Never true while a fixed tag is configured.
    pub fn update_available(&self) -> bool {
        if self.config.fixed_tag.is_some() || !self.poller.current().available {
            return false;
        }
        let tags = self.tags();
        match tags.registry.first() {
            Some(newest) => tags.local.as_ref() != Some(newest),
            None => false,
        }
    }

    pub fn begin_update(&self) -> Result<UpdateGuard, ControllerError> {
        let mut slot = self
            .update_slot
            .lock()
            .map_err(|_| ControllerError::UpdateInProgress)?;
        if slot.is_some() {
            return Err(ControllerError::UpdateInProgress);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok(UpdateGuard {
            slot: self.update_slot.clone(),
            token,
        })
    }

    pub fn update_running(&self) -> bool {
        self.update_slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Returns whether a running pull was asked to stop.
    pub fn cancel_update(&self) -> bool {
        match self.update_slot.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(token) => {
                    info!("Cancelling image download");
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    async fn pull_tag(&self, tag: &str, guard: &UpdateGuard) -> Result<PullOutcome, ControllerError> {
        let total = match self.resolver.tag_metadata(&self.config.image_name, tag).await {
            Ok(record) => record.full_size,
            Err(e) => {
                debug!("Download size unknown: {}", e);
                None
            }
        };

        let result = self
            .puller
            .pull(
                &self.config.image_name,
                tag,
                total,
                |update| {
                    self.progress.set(Some(update));
                },
                guard.token(),
            )
            .await;
        self.progress.set(None);

        let outcome = result?;
        if outcome == PullOutcome::Completed {
            self.refresh_local_tag().await;
        }
        Ok(outcome)
    }

    /// Makes sure the image to run is present locally, pulling it if needed.
    pub async fn ensure_image(&self) -> Result<String, ControllerError> {
        let tags = self.tags();
        let tag = tags
            .requested
            .or_else(|| tags.registry.first().cloned())
            .ok_or(ControllerError::NoLocalImage)?;

        if self.engine.image_exists(&self.config.image_ref(&tag)).await? {
            return Ok(tag);
        }

        info!("Image {} not present locally", self.config.image_ref(&tag));
        let guard = self.begin_update()?;
        match self.pull_tag(&tag, &guard).await? {
            PullOutcome::Completed => Ok(tag),
            PullOutcome::Cancelled => Err(ControllerError::PullCancelled),
        }
    }

    pub async fn update(&self) -> Result<PullOutcome, ControllerError> {
        let guard = self.begin_update()?;
        self.run_update(guard).await
    }

    /// Pulls the update target under an already acquired guard: the fixed tag
    /// when one is configured, otherwise the newest registry tag.
    pub async fn run_update(&self, guard: UpdateGuard) -> Result<PullOutcome, ControllerError> {
        let newest = match &self.config.fixed_tag {
            Some(tag) => tag.clone(),
            None => {
                self.refresh_registry_tags().await;
                self.tags()
                    .registry
                    .first()
                    .cloned()
                    .ok_or(ControllerError::NoRegistryTags)?
            }
        };

        let outcome = self.pull_tag(&newest, &guard).await;
        match &outcome {
            Ok(PullOutcome::Completed) => {
                info!("Updated to {}", newest);
                self.ping("update", None, Some(&newest)).await;
            }
            Ok(PullOutcome::Cancelled) => info!("Update to {} cancelled", newest),
            Err(e) => error!("Update to {} failed: {}", newest, e),
        }
        outcome
    }

    pub fn default_request(&self) -> StartRequest {
        StartRequest::new(&self.config.data_mount, &self.config.token, self.config.port)
    }

    /// Rejects bad input before anything is downloaded, then starts the server.
    pub async fn start(&self, request: &StartRequest) -> Result<ContainerStatus, ControllerError> {
        self.controller.validate_request(request)?;
        let tag = self.ensure_image().await?;
        let result = self.controller.start(&tag, request).await;
        self.poller.poll_once().await;
        if result.is_ok() {
            let container = self.container_data().await;
            self.ping("start", container, Some(&tag)).await;
        }
        result
    }

    pub async fn stop(&self) -> Result<ContainerStatus, ControllerError> {
        let result = self.controller.stop().await;
        self.poller.poll_once().await;
        if result.is_ok() {
            let stats = self.controller.take_final_stats();
            self.ping("stop", stats, None).await;
        }
        result
    }

    pub async fn report(&self) -> LauncherReport {
        let snapshot: StatusSnapshot = self.poller.current();
        let tags = self.tags();
        let address = if snapshot.status == ContainerStatus::Running {
            self.controller.server_address().await
        } else {
            None
        };
        LauncherReport {
            available: snapshot.available,
            status: snapshot.status,
            update_available: self.update_available(),
            tag: tags.requested,
            latest_tag: tags.registry.first().cloned(),
            address,
            last_failure: self.controller.last_failure(),
            progress: self.progress.get(),
            update_running: self.update_running(),
        }
    }

    /// Runs the status poller until `cancel`, refreshing tags whenever the engine comes back.
    pub async fn watch_status(&self, cancel: CancellationToken) {
        let mut rx = self.poller.subscribe();
        // read before the poller gets a chance to publish its first result
        let initially_available = rx.borrow_and_update().available;
        let react = async {
            let mut was_available = initially_available;
            while rx.changed().await.is_ok() {
                let snapshot = *rx.borrow_and_update();
                if snapshot.available && !was_available {
                    info!("Engine became reachable, refreshing image tags");
                    if self.tags().registry.is_empty() {
                        self.refresh_registry_tags().await;
                    }
                    self.refresh_local_tag().await;
                }
                was_available = snapshot.available;
            }
        };

        tokio::select! {
            _ = self.poller.run(cancel) => {}
            _ = react => warn!("Status channel closed"),
        }
    }

    async fn container_data(&self) -> Option<serde_json::Value> {
        match self.controller.container().await {
            Ok(summary) => summary.and_then(|s| serde_json::to_value(s).ok()),
            Err(_) => None,
        }
    }

    /// Awaited unless background pings were requested, so one-shot commands
    /// deliver before the runtime shuts down.
    async fn ping(&self, action: &str, container: Option<serde_json::Value>, tag: Option<&str>) {
        if !self.pinger.is_enabled() {
            return;
        }
        let image = tag.map(|t| {
            serde_json::json!({
                "name": self.config.image_name,
                "tag": t,
            })
        });
        let message = self.pinger.message(action, container, image);
        if self.background_pings {
            self.pinger.spawn(message);
        } else {
            self.pinger.send(message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::engine::PullEvent;
    use crate::error_handling::types::RegistryError;
    use crate::registry::{TagPage, TagPageSource, TagRecord};
    use async_trait::async_trait;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    struct StaticTags(Vec<(&'static str, u64)>);

    #[async_trait]
    impl TagPageSource for StaticTags {
        async fn fetch_page(&self, _url: &str) -> Result<TagPage, RegistryError> {
            if self.0.is_empty() {
                return Err(RegistryError::Http("offline".into()));
            }
            Ok(TagPage {
                results: self
                    .0
                    .iter()
                    .map(|(name, size)| TagRecord {
                        name: name.to_string(),
                        full_size: Some(*size),
                    })
                    .collect(),
                next: None,
                previous: None,
            })
        }
    }

    fn config() -> LaunchConfig {
        LaunchConfig {
            image_name: "lab/nb".to_string(),
            server_name: "launcher-test".to_string(),
            ..LaunchConfig::default()
        }
    }

    fn launcher_with(
        engine: Arc<FakeEngine>,
        tags: Vec<(&'static str, u64)>,
        config: LaunchConfig,
        prefer_latest: bool,
    ) -> Launcher {
        let resolver = TagResolver::with_source(Arc::new(StaticTags(tags)), "https://registry.test");
        Launcher::new(config, engine, resolver, Pinger::disabled(), prefer_latest)
    }

    /// Accepts one HTTP request, hands its head to the test, then answers 200.
    fn ping_endpoint() -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/ping", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                }
            }
            let _ = tx.send(String::from_utf8_lossy(&received).to_string());
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        });
        (url, rx)
    }

    fn downloading(layer: &str, current: u64) -> Result<PullEvent, crate::error_handling::types::EngineError> {
        Ok(PullEvent {
            status: Some("Downloading".into()),
            id: Some(layer.into()),
            current: Some(current),
        })
    }

    #[tokio::test]
    async fn requested_tag_prefers_newest_local() {
        let engine = Arc::new(FakeEngine::with_images(&["lab/nb:v1.0.0"]));
        let launcher = launcher_with(engine, vec![("v1.1.0", 10), ("v1.0.0", 10)], config(), false);
        launcher.initialise().await;

        let tags = launcher.tags();
        assert_eq!(tags.registry, vec!["v1.1.0", "v1.0.0"]);
        assert_eq!(tags.local.as_deref(), Some("v1.0.0"));
        assert_eq!(tags.requested.as_deref(), Some("v1.0.0"));
        assert!(launcher.update_available());
    }

    #[tokio::test]
    async fn latest_flag_and_fixed_tag_override_local() {
        let engine = Arc::new(FakeEngine::with_images(&["lab/nb:v1.0.0"]));
        let launcher = launcher_with(
            engine.clone(),
            vec![("v1.1.0", 10), ("v1.0.0", 10)],
            config(),
            true,
        );
        launcher.initialise().await;
        assert_eq!(launcher.tags().requested.as_deref(), Some("v1.1.0"));

        let fixed = LaunchConfig {
            fixed_tag: Some("v0.1.0".into()),
            ..config()
        };
        let launcher = launcher_with(engine, vec![("v1.1.0", 10)], fixed, true);
        launcher.initialise().await;
        assert_eq!(launcher.tags().requested.as_deref(), Some("v0.1.0"));
    }

    #[tokio::test]
    async fn fixed_tag_pins_updates() {
        let engine = Arc::new(FakeEngine::with_images(&["lab/nb:v1.0.0"]));
        engine.set_pull_events(vec![downloading("a", 10)]);
        let fixed = LaunchConfig {
            fixed_tag: Some("v1.0.0".into()),
            ..config()
        };
        let launcher = launcher_with(
            engine.clone(),
            vec![("v1.1.0", 20), ("v1.0.0", 10)],
            fixed,
            false,
        );
        launcher.initialise().await;

        assert_eq!(launcher.tags().requested.as_deref(), Some("v1.0.0"));
        assert!(!launcher.update_available());
        assert!(!launcher.report().await.update_available);

        assert_eq!(launcher.update().await.unwrap(), PullOutcome::Completed);
        let pulls: Vec<String> = engine
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("pull"))
            .collect();
        assert_eq!(pulls, vec!["pull lab/nb:v1.0.0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_coming_back_refreshes_local_tag() {
        let engine = Arc::new(FakeEngine::with_images(&["lab/nb:v1.0.0"]));
        engine.set_reachable(false);
        let launcher = Arc::new(launcher_with(
            engine.clone(),
            vec![("v1.0.0", 10)],
            config(),
            false,
        ));
        launcher.initialise().await;
        assert_eq!(launcher.tags().local, None);
        assert_eq!(launcher.tags().requested, None);

        let mut tags = launcher.subscribe_tags();
        tags.borrow_and_update();
        let cancel = CancellationToken::new();
        let task = {
            let launcher = launcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { launcher.watch_status(cancel).await })
        };

        engine.set_reachable(true);
        tags.changed().await.unwrap();

        let now = launcher.tags();
        assert_eq!(now.local.as_deref(), Some("v1.0.0"));
        assert_eq!(now.requested.as_deref(), Some("v1.0.0"));
        assert!(launcher.poller().current().available);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stop_ping_is_delivered_before_returning() {
        let (url, received) = ping_endpoint();
        let config = LaunchConfig {
            ping_url: url,
            ..config()
        };
        let pinger = Pinger::new(&config, true);
        let resolver = TagResolver::with_source(Arc::new(StaticTags(vec![])), "https://registry.test");
        let launcher = Launcher::new(config, Arc::new(FakeEngine::new()), resolver, pinger, false);

        launcher.stop().await.unwrap();

        let head = received.try_recv().unwrap();
        assert!(head.starts_with("POST /ping"), "{}", head);
    }

    #[tokio::test]
    async fn no_update_when_engine_unreachable_or_current() {
        let engine = Arc::new(FakeEngine::with_images(&["lab/nb:v1.1.0"]));
        let launcher = launcher_with(engine.clone(), vec![("v1.1.0", 10)], config(), false);
        launcher.initialise().await;
        assert!(!launcher.update_available());

        let stale = Arc::new(FakeEngine::with_images(&["lab/nb:v1.0.0"]));
        stale.set_reachable(false);
        let launcher = launcher_with(stale, vec![("v1.1.0", 10), ("v1.0.0", 10)], config(), false);
        launcher.initialise().await;
        assert!(!launcher.update_available());
    }

    #[tokio::test]
    async fn start_pulls_missing_image_first() {
        let engine = Arc::new(FakeEngine::new());
        engine.set_pull_events(vec![downloading("a", 5), downloading("a", 10)]);
        let launcher = launcher_with(engine.clone(), vec![("v1.0.0", 10)], config(), false);
        launcher.initialise().await;
        assert_eq!(launcher.tags().local, None);

        let dir = TempDir::new().unwrap();
        let status = launcher
            .start(&StartRequest::new(dir.path(), "tok", 8888))
            .await
            .unwrap();

        assert_eq!(status, ContainerStatus::Running);
        assert_eq!(launcher.tags().local.as_deref(), Some("v1.0.0"));
        let calls = engine.calls();
        let pull = calls.iter().position(|c| c == "pull lab/nb:v1.0.0").unwrap();
        let create = calls.iter().position(|c| c == "create launcher-test").unwrap();
        assert!(pull < create);

        let report = launcher.report().await;
        assert_eq!(report.status, ContainerStatus::Running);
        assert_eq!(report.address.as_deref(), Some("http://localhost:8888?token=tok"));
        assert_eq!(report.progress, None);
        assert!(!report.update_available);
    }

    #[tokio::test]
    async fn invalid_start_downloads_nothing() {
        let engine = Arc::new(FakeEngine::new());
        let launcher = launcher_with(engine.clone(), vec![("v1.0.0", 10)], config(), false);
        launcher.initialise().await;

        let result = launcher
            .start(&StartRequest::new("/no/such/mount", "tok", 8888))
            .await;

        assert!(matches!(result, Err(ControllerError::InvalidInput(_))));
        assert!(engine.calls().iter().all(|c| !c.starts_with("pull")));
    }

    #[tokio::test]
    async fn start_without_any_tag_is_refused() {
        let engine = Arc::new(FakeEngine::new());
        let launcher = launcher_with(engine, vec![], config(), false);
        launcher.initialise().await;

        let dir = TempDir::new().unwrap();
        assert!(matches!(
            launcher.start(&StartRequest::new(dir.path(), "tok", 8888)).await,
            Err(ControllerError::NoLocalImage)
        ));
    }

    #[tokio::test]
    async fn update_pulls_newest_and_is_exclusive() {
        let engine = Arc::new(FakeEngine::with_images(&["lab/nb:v1.0.0"]));
        engine.set_pull_events(vec![downloading("a", 20)]);
        let launcher = launcher_with(
            engine.clone(),
            vec![("v1.1.0", 20), ("v1.0.0", 10)],
            config(),
            false,
        );
        launcher.initialise().await;

        let guard = launcher.begin_update().unwrap();
        assert!(launcher.update_running());
        assert!(matches!(
            launcher.update().await,
            Err(ControllerError::UpdateInProgress)
        ));

        let outcome = launcher.run_update(guard).await.unwrap();
        assert_eq!(outcome, PullOutcome::Completed);
        assert!(!launcher.update_running());
        assert_eq!(launcher.tags().local.as_deref(), Some("v1.1.0"));
        assert_eq!(launcher.tags().requested.as_deref(), Some("v1.1.0"));
        assert!(!launcher.update_available());
    }

    #[tokio::test]
    async fn cancelled_update_is_reported_not_failed() {
        let engine = Arc::new(FakeEngine::with_images(&["lab/nb:v1.0.0"]));
        engine.set_pull_events(vec![downloading("a", 1)]);
        let launcher = launcher_with(
            engine,
            vec![("v1.1.0", 20), ("v1.0.0", 10)],
            config(),
            false,
        );
        launcher.initialise().await;

        let guard = launcher.begin_update().unwrap();
        assert!(launcher.cancel_update());
        let outcome = launcher.run_update(guard).await.unwrap();

        assert_eq!(outcome, PullOutcome::Cancelled);
        assert_eq!(launcher.tags().local.as_deref(), Some("v1.0.0"));
        assert!(!launcher.cancel_update());
    }

    #[tokio::test]
    async fn update_without_registry_tags_fails() {
        let engine = Arc::new(FakeEngine::new());
        let launcher = launcher_with(engine, vec![], config(), false);
        assert!(matches!(
            launcher.update().await,
            Err(ControllerError::NoRegistryTags)
        ));
        assert!(!launcher.update_running());
    }
}
