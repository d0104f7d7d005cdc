//! Tag resolution against the registry's paginated tag listing.
//!
//! Registry trouble never blocks the launcher: [`TagResolver::list_tags`]
//! degrades to an empty list and the rest of the application carries on with
//! whatever images are present locally.

use log::{debug, info, warn};
use semver::Version;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error_handling::types::RegistryError;

pub mod source;

pub use source::{HttpTagSource, TagPage, TagPageSource, TagRecord};

const PAGE_SIZE: u32 = 100;

pub struct TagResolver {
    source: Arc<dyn TagPageSource>,
    base_url: String,
}

impl TagResolver {
    pub fn new(base_url: &str) -> Result<Self, RegistryError> {
        Ok(Self::with_source(Arc::new(HttpTagSource::new()?), base_url))
    }

    pub fn with_source(source: Arc<dyn TagPageSource>, base_url: &str) -> Self {
        Self {
            source,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn first_page_url(&self, image: &str) -> String {
        format!("{}/{}/tags?page_size={}", self.base_url, image, PAGE_SIZE)
    }

    /// Every tag record, following `next` until the last page.
    pub async fn all_records(&self, image: &str) -> Result<Vec<TagRecord>, RegistryError> {
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(self.first_page_url(image));

        while let Some(url) = next {
            // a cursor pointing back at a visited page would never terminate
            if !seen.insert(url.clone()) {
                warn!("Registry returned a repeated page cursor: {}", url);
                break;
            }
            let page = self.source.fetch_page(&url).await?;
            debug!("Fetched {} tags from {}", page.results.len(), url);
            records.extend(page.results);
            next = page.next.filter(|n| !n.is_empty());
        }
        Ok(records)
    }

    /// Version tags of `image` that start with `prefix`, newest first.
    ///
    /// Fails soft: any network or decode problem yields an empty list.
    pub async fn list_tags(&self, image: &str, prefix: &str) -> Vec<String> {
        match self.all_records(image).await {
            Ok(records) => {
                let tags = order_tags(records.iter().map(|r| r.name.as_str()), prefix);
                info!("Registry lists {} version tags for {}", tags.len(), image);
                tags
            }
            Err(e) => {
                warn!("Could not list tags for {}: {}", image, e);
                Vec::new()
            }
        }
    }

    pub async fn tag_metadata(&self, image: &str, tag: &str) -> Result<TagRecord, RegistryError> {
        self.all_records(image)
            .await?
            .into_iter()
            .find(|r| r.name == tag)
            .ok_or_else(|| RegistryError::TagNotFound(tag.to_string()))
    }
}

/// Keeps names of the form `<prefix><semver>` and sorts them by descending precedence.
pub fn order_tags<'a>(names: impl IntoIterator<Item = &'a str>, prefix: &str) -> Vec<String> {
    let mut versions: Vec<(Version, &str)> = names
        .into_iter()
        .filter_map(|name| {
            let rest = name.strip_prefix(prefix)?;
            Version::parse(rest).ok().map(|v| (v, name))
        })
        .collect();

    versions.sort_by(|a, b| b.0.cmp(&a.0));
    versions.dedup_by(|a, b| a.1 == b.1);
    versions.into_iter().map(|(_, name)| name.to_string()).collect()
}
