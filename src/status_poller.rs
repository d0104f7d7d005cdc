//! Periodic, edge-triggered re-check of engine reachability and container status.

use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::container_management::{ContainerController, ContainerStatus};
use crate::observable::Observable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Whether the engine answered the last handshake.
    pub available: bool,
    pub status: ContainerStatus,
}

impl StatusSnapshot {
    pub const UNKNOWN: StatusSnapshot = StatusSnapshot {
        available: false,
        status: ContainerStatus::Unknown,
    };
}

pub struct StatusPoller {
    controller: Arc<ContainerController>,
    interval: Duration,
    state: Observable<StatusSnapshot>,
}

impl StatusPoller {
    pub fn new(controller: Arc<ContainerController>, interval: Duration) -> Self {
        Self {
            controller,
            interval: interval.max(Duration::from_millis(100)),
            state: Observable::new(StatusSnapshot::UNKNOWN),
        }
    }

    pub fn current(&self) -> StatusSnapshot {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.state.subscribe()
    }

    /// Runs one check and publishes the result. Returns whether it changed.
    pub async fn poll_once(&self) -> bool {
        let snapshot = if self.controller.engine_available().await {
            StatusSnapshot {
                available: true,
                status: self.controller.status().await,
            }
        } else {
            StatusSnapshot::UNKNOWN
        };

        let changed = self.state.set(snapshot);
        if changed {
            info!(
                "Status changed: engine {}, container {}",
                if snapshot.available { "available" } else { "unavailable" },
                snapshot.status
            );
        }
        changed
    }

    /// Polls until `cancel` fires. The first check happens immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Status poller running every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
        debug!("Status poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::LaunchConfig;
    use crate::engine::fake::FakeEngine;

    fn poller(engine: Arc<FakeEngine>) -> Arc<StatusPoller> {
        let controller = Arc::new(ContainerController::new(engine, &LaunchConfig::default()));
        Arc::new(StatusPoller::new(controller, Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn distinguishes_unknown_from_inactive() {
        let engine = Arc::new(FakeEngine::new());
        let poller = poller(engine.clone());

        assert!(poller.poll_once().await);
        assert_eq!(
            poller.current(),
            StatusSnapshot {
                available: true,
                status: ContainerStatus::Inactive
            }
        );

        engine.set_reachable(false);
        assert!(poller.poll_once().await);
        assert_eq!(poller.current(), StatusSnapshot::UNKNOWN);
    }

    #[tokio::test]
    async fn publishes_only_on_change() {
        let engine = Arc::new(FakeEngine::new());
        let poller = poller(engine);

        assert!(poller.poll_once().await);
        let rx = poller.subscribe();
        assert!(!poller.poll_once().await);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_on_interval_and_stops_on_cancel() {
        let engine = Arc::new(FakeEngine::new());
        let poller = poller(engine.clone());
        let mut rx = poller.subscribe();
        let cancel = CancellationToken::new();

        let task = {
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, ContainerStatus::Inactive);
        let versions = |e: &FakeEngine| e.calls().iter().filter(|c| *c == "version").count();
        let after_first = versions(engine.as_ref());

        engine.set_reachable(false);
        tokio::time::advance(Duration::from_secs(5)).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), StatusSnapshot::UNKNOWN);
        assert!(versions(engine.as_ref()) > after_first);

        cancel.cancel();
        task.await.unwrap();
    }
}
