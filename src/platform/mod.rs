//! Source platforms
//!
//! An owner publishes its scan config in a repository on a code hosting
//! platform and receives markdown reports in an output repository on the same
//! platform. [`SourcePlatform`] covers both directions:
//!
//! - [`SourcePlatform::fetch_snapshot`] - download and parse the scan config,
//!   together with an opaque fingerprint used for change detection
//! - [`SourcePlatform::publish`] - create or update a report file
//!
//! The implementation is chosen once per owner from [`PlatformKind`].

pub mod gitee;
pub mod github;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use thiserror::Error;

use crate::config::{CommunityConfig, PlatformKind};
use crate::task::{ConfigParseError, Output, ScanConfig};

pub use gitee::GiteePlatform;
pub use github::GithubPlatform;
pub use local::LocalPlatform;

/// Commit message of every published report
pub const COMMIT_MESSAGE: &str = "image scanning result";

/// Errors raised by platform operations
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{platform} returned status {status} for {url}: {body}")]
    Status {
        platform: PlatformKind,
        status: u16,
        url: String,
        body: String,
    },

    #[error("content is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid scan config: {0}")]
    Parse(#[from] ConfigParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected response from {platform}: {reason}")]
    UnexpectedResponse {
        platform: PlatformKind,
        reason: String,
    },

    #[error("output repository is not configured")]
    MissingOutput,
}

impl PlatformError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Io(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// One fetched version of an owner's scan config
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub config: ScanConfig,

    /// Changes whenever the underlying file content changes
    pub fingerprint: String,
}

/// Where scan configs come from and reports go to
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    fn kind(&self) -> PlatformKind;

    async fn fetch_snapshot(&self) -> Result<Snapshot, PlatformError>;

    /// Write `content` to `report_path` under the owner's output location
    async fn publish(
        &self,
        output: &Output,
        content: &str,
        report_path: &str,
    ) -> Result<(), PlatformError>;
}

/// Thread-safe shared platform handle
pub type SharedPlatform = Arc<dyn SourcePlatform>;

/// Per-owner execution context: where the owner's reports are published
#[derive(Clone)]
pub struct OwnerHandle {
    pub owner: String,
    pub platform: SharedPlatform,
    pub output: Output,
}

impl OwnerHandle {
    pub fn new(owner: impl Into<String>, platform: SharedPlatform, output: Output) -> Self {
        Self {
            owner: owner.into(),
            platform,
            output,
        }
    }

    pub async fn publish(&self, content: &str, report_path: &str) -> Result<(), PlatformError> {
        self.platform.publish(&self.output, content, report_path).await
    }
}

impl std::fmt::Debug for OwnerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerHandle")
            .field("owner", &self.owner)
            .field("platform", &self.platform.kind())
            .field("output", &self.output)
            .finish()
    }
}

/// Build the platform selected by an owner's configuration
pub fn create_platform(
    community: &CommunityConfig,
    timeout: Duration,
) -> Result<SharedPlatform, PlatformError> {
    let platform: SharedPlatform = match community.platform {
        PlatformKind::Github => Arc::new(GithubPlatform::new(community, http_client(timeout)?)),
        PlatformKind::Gitee => Arc::new(GiteePlatform::new(community, http_client(timeout)?)),
        PlatformKind::Local => Arc::new(LocalPlatform::new(community)),
    };

    Ok(platform)
}

fn http_client(timeout: Duration) -> Result<Client, PlatformError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("imagescan/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Decode API file content; encoders may wrap lines
pub(crate) fn decode_content(encoded: &str) -> Result<Vec<u8>, PlatformError> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(cleaned)?)
}

pub(crate) fn encode_content(content: &str) -> String {
    STANDARD.encode(content.as_bytes())
}

/// Turn a non-success response into [`PlatformError::Status`]
pub(crate) async fn check_status(
    platform: PlatformKind,
    response: reqwest::Response,
) -> Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Status {
        platform,
        status: status.as_u16(),
        url,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wrapped_content() {
        let encoded = encode_content("version: \"1\"\nrepos: []\n");
        let (head, tail) = encoded.split_at(8);
        let wrapped = format!("{head}\n{tail}\n");

        assert_eq!(
            decode_content(&wrapped).unwrap(),
            b"version: \"1\"\nrepos: []\n".to_vec()
        );
        assert!(decode_content("@@not base64@@").is_err());
    }

    #[test]
    fn test_recoverable_errors() {
        let status = |status| PlatformError::Status {
            platform: PlatformKind::Github,
            status,
            url: String::new(),
            body: String::new(),
        };

        assert!(status(502).is_recoverable());
        assert!(status(429).is_recoverable());
        assert!(!status(401).is_recoverable());
        assert!(!PlatformError::MissingOutput.is_recoverable());
    }
}
