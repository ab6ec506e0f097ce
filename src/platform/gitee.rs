//! Gitee v5 contents API
//!
//! Unlike GitHub, Gitee distinguishes creating a file (`POST`) from updating
//! one (`PUT` with the previous blob sha), and answers a lookup of a missing
//! file with an empty JSON array instead of a 404.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    check_status, decode_content, encode_content, PlatformError, Snapshot, SourcePlatform,
    COMMIT_MESSAGE,
};
use crate::config::{CommunityConfig, Location, PlatformKind};
use crate::task::{Output, ScanConfig};

const DEFAULT_API_URL: &str = "https://gitee.com/api";

const UPLOAD_BRANCH: &str = "master";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentResponse {
    File(FileContent),
    Listing(Vec<serde_json::Value>),
}

#[derive(Debug, Deserialize)]
struct FileContent {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct WriteFile<'a> {
    access_token: &'a str,
    content: String,
    message: &'a str,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

pub struct GiteePlatform {
    client: Client,
    api_url: String,
    org: String,
    token: String,
    location: Location,
}

impl GiteePlatform {
    pub fn new(community: &CommunityConfig, client: Client) -> Self {
        let api_url = community.api_url.as_deref().unwrap_or(DEFAULT_API_URL);

        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            org: community.name.clone(),
            token: community.token.clone(),
            location: community.scan_config_location.clone(),
        }
    }

    fn contents_url(&self, repo: &str, path: &str) -> String {
        format!("{}/v5/repos/{}/{repo}/contents/{path}", self.api_url, self.org)
    }

    async fn get_content(
        &self,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<FileContent>, PlatformError> {
        let response = self
            .client
            .get(self.contents_url(repo, path))
            .query(&[("ref", git_ref), ("access_token", self.token.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(PlatformKind::Gitee, response).await?;
        match response.json::<ContentResponse>().await? {
            ContentResponse::File(file) => Ok(Some(file)),
            ContentResponse::Listing(entries) if entries.is_empty() => Ok(None),
            ContentResponse::Listing(_) => Err(PlatformError::UnexpectedResponse {
                platform: PlatformKind::Gitee,
                reason: format!("{repo}/{path} is a directory"),
            }),
        }
    }
}

#[async_trait]
impl SourcePlatform for GiteePlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Gitee
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, PlatformError> {
        let loc = &self.location;
        let file = self
            .get_content(&loc.repo, &loc.path, &loc.git_ref)
            .await?
            .ok_or_else(|| PlatformError::UnexpectedResponse {
                platform: PlatformKind::Gitee,
                reason: format!("scan config {}/{} not found", loc.repo, loc.path),
            })?;

        let config = ScanConfig::from_yaml_bytes(&decode_content(&file.content)?)?;

        Ok(Snapshot {
            config,
            fingerprint: file.sha,
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

        let path = output.file_path(report_path);
        let existing = self.get_content(&output.repo, &path, UPLOAD_BRANCH).await?;
        let url = self.contents_url(&output.repo, &path);

        let request = match existing {
            None => self.client.post(&url).json(&WriteFile {
                access_token: &self.token,
                content: encode_content(content),
                message: COMMIT_MESSAGE,
                branch: UPLOAD_BRANCH,
                sha: None,
            }),
            Some(file) => self.client.put(&url).json(&WriteFile {
                access_token: &self.token,
                content: encode_content(content),
                message: COMMIT_MESSAGE,
                branch: UPLOAD_BRANCH,
                sha: Some(file.sha),
            }),
        };

        check_status(PlatformKind::Gitee, request.send().await?).await?;

        tracing::debug!(org = %self.org, repo = %output.repo, path = %path, "Published report to Gitee");
        Ok(())
    }
}
