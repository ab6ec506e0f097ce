//! GitHub contents API

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    check_status, decode_content, encode_content, PlatformError, Snapshot, SourcePlatform,
    COMMIT_MESSAGE,
};
use crate::config::{CommunityConfig, Location, PlatformKind};
use crate::task::{Output, ScanConfig};

const DEFAULT_API_URL: &str = "https://api.github.com";

/// Reports are always committed to this branch
const UPLOAD_BRANCH: &str = "main";

#[derive(Debug, Deserialize)]
struct FileContent {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct PutFile<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

pub struct GithubPlatform {
    client: Client,
    api_url: String,
    org: String,
    token: String,
    location: Location,
}

impl GithubPlatform {
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
        format!("{}/repos/{}/{repo}/contents/{path}", self.api_url, self.org)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
    }

    /// `None` when the file does not exist yet
    async fn get_content(
        &self,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<FileContent>, PlatformError> {
        let response = self
            .authorized(self.client.get(self.contents_url(repo, path)))
            .query(&[("ref", git_ref)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(PlatformKind::Github, response).await?;
        Ok(Some(response.json().await?))
    }
}

#[async_trait]
impl SourcePlatform for GithubPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Github
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, PlatformError> {
        let loc = &self.location;
        let file = self
            .get_content(&loc.repo, &loc.path, &loc.git_ref)
            .await?
            .ok_or_else(|| PlatformError::UnexpectedResponse {
                platform: PlatformKind::Github,
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
        let sha = self
            .get_content(&output.repo, &path, UPLOAD_BRANCH)
            .await?
            .map(|f| f.sha);

        let body = PutFile {
            message: COMMIT_MESSAGE,
            content: encode_content(content),
            branch: UPLOAD_BRANCH,
            sha,
        };

        let response = self
            .authorized(self.client.put(self.contents_url(&output.repo, &path)))
            .json(&body)
            .send()
            .await?;
        check_status(PlatformKind::Github, response).await?;

        tracing::debug!(org = %self.org, repo = %output.repo, path = %path, "Published report to GitHub");
        Ok(())
    }
}
