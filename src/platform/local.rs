//! Filesystem platform for development and tests
//!
//! The scan config is read from `{repo}/{path}` and reports are written to
//! `{output.repo}/{output.path}/{report_path}`.

use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{PlatformError, Snapshot, SourcePlatform};
use crate::config::{CommunityConfig, PlatformKind};
use crate::task::{Output, ScanConfig};

pub struct LocalPlatform {
    config_file: PathBuf,
}

impl LocalPlatform {
    pub fn new(community: &CommunityConfig) -> Self {
        let loc = &community.scan_config_location;
        Self {
            config_file: PathBuf::from(&loc.repo).join(&loc.path),
        }
    }

    pub fn from_file(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
        }
    }
}

/// Hex SHA-256 of the raw file content
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl SourcePlatform for LocalPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Local
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, PlatformError> {
        let content = tokio::fs::read(&self.config_file).await?;

        Ok(Snapshot {
            config: ScanConfig::from_yaml_bytes(&content)?,
            fingerprint: fingerprint(&content),
        })
    }

    async fn publish(
        &self,
        output: &Output,
        content: &str,
        report_path: &str,
    ) -> Result<(), PlatformError> {
        if output.repo.is_empty() {
            return Err(PlatformError::MissingOutput);
        }

        let target = PathBuf::from(&output.repo).join(output.file_path(report_path));
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;

        tracing::debug!(path = %target.display(), "Wrote report");
        Ok(())
    }
}
