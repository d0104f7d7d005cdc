//! Best-effort anonymous usage pings.

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::configuration::LaunchConfig;

const PING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingId {
    pub msg_id: Uuid,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingMessage {
    pub tracking_id: TrackingId,
    pub hostname: String,
    pub os: String,
    pub session: Uuid,
    pub action: String,
    pub container_data: Option<Value>,
    pub image_data: Option<Value>,
}

/// Sends usage pings; failures never reach the caller.
#[derive(Clone)]
pub struct Pinger {
    client: Option<reqwest::Client>,
    url: String,
    session: Uuid,
    hostname: String,
}

impl Pinger {
    /// Enabled only when `allowed`, `send_pings` is set and an endpoint is configured.
    pub fn new(config: &LaunchConfig, allowed: bool) -> Self {
        let enabled = allowed && config.send_pings && !config.ping_url.trim().is_empty();
        let client = if enabled {
            match reqwest::Client::builder().timeout(PING_TIMEOUT).build() {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!("Pings disabled, could not build HTTP client: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            client,
            url: config.ping_url.trim().to_string(),
            session: Uuid::new_v4(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            client: None,
            url: String::new(),
            session: Uuid::new_v4(),
            hostname: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub fn message(
        &self,
        action: &str,
        container_data: Option<Value>,
        image_data: Option<Value>,
    ) -> PingMessage {
        PingMessage {
            tracking_id: TrackingId {
                msg_id: Uuid::new_v4(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            hostname: self.hostname.clone(),
            os: std::env::consts::OS.to_string(),
            session: self.session,
            action: action.to_string(),
            container_data,
            image_data,
        }
    }

    pub async fn send(&self, message: PingMessage) {
        let Some(client) = &self.client else {
            return;
        };
        match client.post(&self.url).json(&message).send().await {
            Ok(response) => debug!("Ping '{}' answered {}", message.action, response.status()),
            Err(e) => debug!("Ping '{}' failed: {}", message.action, e),
        }
    }

    /// Fire and forget.
    pub fn spawn(&self, message: PingMessage) {
        if !self.is_enabled() {
            return;
        }
        let pinger = self.clone();
        tokio::spawn(async move { pinger.send(message).await });
    }
}
