//! Container registry tag listing
//!
//! Repo-level scan declarations are expanded against every tag an image has in
//! its registry. [`TagLister`] is the seam the reconciler depends on;
//! [`RegistryTagLister`] dispatches to the per-registry HTTP clients.

pub mod docker;
pub mod quay;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::config::RegistryConfig;
use crate::task::Registry;

pub use docker::DockerHubClient;
pub use quay::QuayClient;

/// Errors raised while listing tags
#[derive(Error, Debug)]
pub enum RegistryError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry answered with a non-success status
    #[error("{registry} returned status {status} for {url}")]
    Status {
        registry: Registry,
        status: u16,
        url: String,
    },

    /// No tag listing API known for this registry
    #[error("tag listing is not supported for {0}")]
    Unsupported(Registry),
}

impl RegistryError {
    /// Transport failures and server-side errors may succeed on a later cycle
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Unsupported(_) => false,
        }
    }
}

/// Lists every tag of an image, following pagination internally
#[async_trait]
pub trait TagLister: Send + Sync {
    async fn list_tags(
        &self,
        registry: Registry,
        namespace: &str,
        image: &str,
    ) -> Result<Vec<String>, RegistryError>;
}

/// HTTP-backed lister for Docker Hub and Quay
pub struct RegistryTagLister {
    docker: DockerHubClient,
    quay: QuayClient,
}

impl RegistryTagLister {
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("imagescan/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            docker: DockerHubClient::new(
                client.clone(),
                &config.docker_hub_url,
                config.page_size,
                Duration::from_millis(config.docker_request_interval_ms),
            ),
            quay: QuayClient::new(client, &config.quay_url, config.page_size),
        })
    }
}

#[async_trait]
impl TagLister for RegistryTagLister {
    async fn list_tags(
        &self,
        registry: Registry,
        namespace: &str,
        image: &str,
    ) -> Result<Vec<String>, RegistryError> {
        match registry {
            Registry::Docker => self.docker.list_tags(namespace, image).await,
            Registry::Quay => self.quay.list_tags(namespace, image).await,
            Registry::Oepkgs => Err(RegistryError::Unsupported(registry)),
        }
    }
}

/// GET a JSON page, mapping non-success statuses to [`RegistryError::Status`]
async fn get_json<T: DeserializeOwned>(
    client: &Client,
    registry: Registry,
    url: &str,
) -> Result<T, RegistryError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RegistryError::Status {
            registry,
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_oepkgs_listing_unsupported() {
        let lister = RegistryTagLister::new(&RegistryConfig::default()).unwrap();
        let err = lister
            .list_tags(Registry::Oepkgs, "ns", "img")
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Unsupported(Registry::Oepkgs)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_status_recoverability() {
        let throttled = RegistryError::Status {
            registry: Registry::Docker,
            status: 429,
            url: "u".to_string(),
        };
        let missing = RegistryError::Status {
            registry: Registry::Docker,
            status: 404,
            url: "u".to_string(),
        };
        assert!(throttled.is_recoverable());
        assert!(!missing.is_recoverable());
    }
}
