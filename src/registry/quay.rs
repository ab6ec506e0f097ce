//! Quay tag listing

use reqwest::Client;
use serde::Deserialize;

use super::{get_json, RegistryError};
use crate::task::Registry;

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    has_additional: bool,
    #[serde(default)]
    tags: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Page-numbered client for the `quay.io` repository API
pub struct QuayClient {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl QuayClient {
    pub fn new(client: Client, base_url: &str, page_size: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size,
        }
    }

    /// Increment `page` while the API reports `has_additional`
    pub async fn list_tags(&self, namespace: &str, image: &str) -> Result<Vec<String>, RegistryError> {
        let mut tags = Vec::new();
        let mut page_no = 1u32;

        loop {
            let url = format!(
                "{}/api/v1/repository/{namespace}/{image}/tag/?limit={}&page={page_no}",
                self.base_url, self.page_size
            );

            let page: TagPage = get_json(&self.client, Registry::Quay, &url).await?;
            tags.extend(page.tags.into_iter().map(|t| t.name));

            if !page.has_additional {
                break;
            }
            page_no += 1;
        }

        tracing::debug!(namespace, image, count = tags.len(), "Listed Quay tags");
        Ok(tags)
    }
}
