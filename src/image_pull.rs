//! Image download with aggregated progress and cooperative cancellation.

use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, PullEvent};
use crate::error_handling::types::PullError;

/// Only byte counts of this phase add up to the compressed image size.
const DOWNLOADING: &str = "Downloading";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub current: u64,
    pub total: Option<u64>,
    /// `None` when the total size is unknown.
    pub fraction: Option<f64>,
}

/// Running byte totals of one pull.
///
/// Each layer keeps its latest reported count. Reported values never go
/// backwards even if the engine reports a layer out of order.
#[derive(Debug, Clone, Default)]
pub struct PullProgress {
    layers: HashMap<String, u64>,
    total: Option<u64>,
    high_water: u64,
}

impl PullProgress {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            ..Default::default()
        }
    }

    /// Sum of the latest count of every layer seen so far.
    pub fn aggregate(&self) -> u64 {
        self.layers.values().sum()
    }

    pub fn record(&mut self, layer: &str, current: u64) -> ProgressUpdate {
        self.layers.insert(layer.to_string(), current);
        self.high_water = self.high_water.max(self.aggregate());
        self.snapshot()
    }

    /// Applies an engine event; `None` if it carried no progress.
    pub fn apply(&mut self, event: &PullEvent) -> Option<ProgressUpdate> {
        if event.status.as_deref() != Some(DOWNLOADING) {
            return None;
        }
        let (Some(layer), Some(current)) = (event.id.as_deref(), event.current) else {
            return None;
        };
        Some(self.record(layer, current))
    }

    pub fn snapshot(&self) -> ProgressUpdate {
        ProgressUpdate {
            current: self.high_water,
            total: self.total,
            fraction: self
                .total
                .map(|total| (self.high_water as f64 / total as f64).min(1.0)),
        }
    }

    pub fn complete(&mut self) -> ProgressUpdate {
        if let Some(total) = self.total {
            self.high_water = self.high_water.max(total);
        }
        ProgressUpdate {
            current: self.high_water,
            total: self.total,
            fraction: Some(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PullOutcome {
    Completed,
    Cancelled,
}

pub struct ImagePuller {
    engine: Arc<dyn Engine>,
}

impl ImagePuller {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Pulls `image:tag`, reporting progress after every counted event.
    ///
    /// Cancelling `cancel` stops consuming the stream; layers already
    /// downloaded stay on disk.
    pub async fn pull<F>(
        &self,
        image: &str,
        tag: &str,
        total: Option<u64>,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<PullOutcome, PullError>
    where
        F: FnMut(ProgressUpdate) + Send,
    {
        info!("Pulling {}:{}", image, tag);
        let mut progress = PullProgress::new(total);
        on_progress(progress.snapshot());

        let mut stream = self.engine.pull_image(image, tag);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Pull of {}:{} cancelled", image, tag);
                    return Ok(PullOutcome::Cancelled);
                }
                next = stream.next() => next,
            };

            let Some(event) = next else { break };
            let event = event?;
            match progress.apply(&event) {
                Some(update) => on_progress(update),
                None => {
                    if let Some(status) = &event.status {
                        debug!("{}: {}", event.id.as_deref().unwrap_or("pull"), status);
                    }
                }
            }
        }

        on_progress(progress.complete());
        info!("Pulled {}:{}", image, tag);
        Ok(PullOutcome::Completed)
    }
}
