//! Docker Hub tag listing
//!
//! Docker Hub limits anonymous API use to roughly 180 requests per minute, so
//! page requests go through a governor limiter (one request per 500 ms by
//! default).

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

use super::{get_json, RegistryError};
use crate::task::Registry;

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Paginated client for `hub.docker.com`
pub struct DockerHubClient {
    client: Client,
    base_url: String,
    page_size: u32,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl DockerHubClient {
    pub fn new(client: Client, base_url: &str, page_size: u32, request_interval: Duration) -> Self {
        let quota =
            Quota::with_period(request_interval).unwrap_or(Quota::per_second(NonZeroU32::MIN));

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size,
            rate_limiter: RateLimiter::direct(quota),
        }
    }

    /// Follow `next` links until the last page
    pub async fn list_tags(&self, namespace: &str, image: &str) -> Result<Vec<String>, RegistryError> {
        let mut url = format!(
            "{}/v2/namespaces/{namespace}/repositories/{image}/tags?page_size={}",
            self.base_url, self.page_size
        );
        let mut tags = Vec::new();

        loop {
            self.rate_limiter.until_ready().await;

            let page: TagPage = get_json(&self.client, Registry::Docker, &url).await?;
            tags.extend(page.results.into_iter().map(|t| t.name));

            match page.next {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        tracing::debug!(namespace, image, count = tags.len(), "Listed Docker Hub tags");
        Ok(tags)
    }
}
