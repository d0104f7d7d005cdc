//! In-memory [`Engine`] used by unit tests.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{ContainerSpec, ContainerSummary, Engine, PullEvent, PullStream};
use crate::container_management::types::ContainerStatus;
use crate::error_handling::types::EngineError;

#[derive(Default)]
struct FakeState {
    unreachable: bool,
    images: HashSet<String>,
    containers: HashMap<String, (ContainerSpec, ContainerStatus)>,
    start_error: Option<String>,
    pull_events: Vec<Result<PullEvent, EngineError>>,
    calls: Vec<String>,
}

/// Records every call and keeps just enough state to behave like a daemon.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_images(images: &[&str]) -> Self {
        let engine = Self::new();
        for image in images {
            engine.add_image(image);
        }
        engine
    }

    pub fn add_image(&self, reference: &str) {
        self.state.lock().unwrap().images.insert(reference.to_string());
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().unreachable = !reachable;
    }

    /// The next start attempt fails with `message`, leaving the container created.
    pub fn fail_next_start(&self, message: &str) {
        self.state.lock().unwrap().start_error = Some(message.to_string());
    }

    pub fn set_pull_events(&self, events: Vec<Result<PullEvent, EngineError>>) {
        self.state.lock().unwrap().pull_events = events;
    }

    /// Places a container directly, as if created outside the launcher.
    pub fn put_container(&self, spec: ContainerSpec, status: ContainerStatus) {
        let mut state = self.state.lock().unwrap();
        state.containers.insert(spec.name.clone(), (spec, status));
    }

    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|(spec, _)| spec.clone())
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.unreachable {
            Err(EngineError::Unreachable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn version(&self) -> Result<String, EngineError> {
        self.record("version".into())?;
        Ok("27.0.0-fake".into())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        self.record(format!("image_exists {}", reference))?;
        Ok(self.state.lock().unwrap().images.contains(reference))
    }

    async fn inspect_container(
        &self,
        name: &str,
    ) -> Result<Option<ContainerSummary>, EngineError> {
        self.record(format!("inspect {}", name))?;
        let state = self.state.lock().unwrap();
        Ok(state.containers.get(name).map(|(spec, status)| ContainerSummary {
            id: format!("id-{}", name),
            image: spec.image.clone(),
            status: *status,
            args: spec.cmd.iter().skip(1).cloned().collect(),
        }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record(format!("create {}", spec.name))?;
        let mut state = self.state.lock().unwrap();
        if state.containers.contains_key(&spec.name) {
            return Err(EngineError::Api(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        if !state.images.contains(&spec.image) {
            return Err(EngineError::ImageNotFound(format!("No such image: {}", spec.image)));
        }
        state
            .containers
            .insert(spec.name.clone(), (spec.clone(), ContainerStatus::Created));
        Ok(format!("id-{}", spec.name))
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        self.record(format!("start {}", name))?;
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.start_error.take() {
            return Err(EngineError::Api(message));
        }
        match state.containers.get_mut(name) {
            Some(entry) => {
                entry.1 = ContainerStatus::Running;
                Ok(())
            }
            None => Err(EngineError::ContainerNotFound(name.to_string())),
        }
    }

    async fn container_stats(&self, name: &str) -> Result<Option<Value>, EngineError> {
        self.record(format!("stats {}", name))?;
        let state = self.state.lock().unwrap();
        Ok(state.containers.get(name).map(|(spec, status)| {
            json!({
                "name": name,
                "image": spec.image,
                "running": *status == ContainerStatus::Running,
            })
        }))
    }

    async fn kill_container(&self, name: &str) -> Result<(), EngineError> {
        self.record(format!("kill {}", name))?;
        match self.state.lock().unwrap().containers.get_mut(name) {
            Some(entry) => {
                entry.1 = ContainerStatus::Exited;
                Ok(())
            }
            None => Err(EngineError::ContainerNotFound(name.to_string())),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        self.record(format!("remove {}", name))?;
        let mut state = self.state.lock().unwrap();
        if let Some((_, ContainerStatus::Running)) = state.containers.get(name) {
            return Err(EngineError::Api(format!(
                "You cannot remove a running container {}",
                name
            )));
        }
        state.containers.remove(name);
        Ok(())
    }

    fn pull_image(&self, image: &str, tag: &str) -> PullStream<'_> {
        let reference = format!("{}:{}", image, tag);
        if let Err(e) = self.record(format!("pull {}", reference)) {
            return stream::iter(vec![Err(e)]).boxed();
        }
        let mut state = self.state.lock().unwrap();
        let events = std::mem::take(&mut state.pull_events);
        if events.iter().all(|e| e.is_ok()) {
            state.images.insert(reference);
        }
        stream::iter(events).boxed()
    }
}
