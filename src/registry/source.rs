use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::time::Duration;

use crate::error_handling::types::RegistryError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One page of the registry's tag listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagPage {
    #[serde(default)]
    pub results: Vec<TagRecord>,
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagRecord {
    pub name: String,
    /// Compressed size of the image in bytes.
    #[serde(default)]
    pub full_size: Option<u64>,
}

/// Fetches a single page of tags by absolute URL.
#[async_trait]
pub trait TagPageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<TagPage, RegistryError>;
}

/// [`TagPageSource`] over HTTPS.
pub struct HttpTagSource {
    client: reqwest::Client,
}

impl HttpTagSource {
    pub fn new() -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("labs-launcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TagPageSource for HttpTagSource {
    async fn fetch_page(&self, url: &str) -> Result<TagPage, RegistryError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Http(format!("{} returned {}", url, status)));
        }

        response
            .json::<TagPage>()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))
    }
}
