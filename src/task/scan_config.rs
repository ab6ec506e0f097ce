//! Declarative scan configuration snapshot
//!
//! One snapshot describes everything an owner wants scanned. It is stored as a
//! YAML file in a source repository and fetched by a
//! [`SourcePlatform`](crate::platform::SourcePlatform).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot could not be decoded
#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("invalid scan config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("scan config is not valid UTF-8")]
    Encoding,
}

/// Root of an owner's scan configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub scanner: Scanner,

    /// Bulk declarations, expanded against every tag in the registry
    #[serde(default)]
    pub repos: Vec<RepoDecl>,

    /// Pinned declarations with explicit tags
    #[serde(default)]
    pub images: Vec<ImageDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scanner {
    #[serde(default)]
    pub global: GlobalDefaults,
}

/// Owner-wide fallbacks and report destination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalDefaults {
    #[serde(default)]
    pub default_arches: Vec<String>,

    #[serde(default)]
    pub default_interval: String,

    #[serde(default)]
    pub output: Output,
}

/// Where scan reports are published
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub repo: String,

    #[serde(default)]
    pub path: String,
}

impl Output {
    /// Join a report path under the configured output directory
    pub fn file_path(&self, report_path: &str) -> String {
        let base = self.path.trim_matches('/');
        if base.is_empty() {
            report_path.to_string()
        } else {
            format!("{base}/{report_path}")
        }
    }
}

/// Repo-level declaration: every tag of every listed image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoDecl {
    pub namespace: String,
    pub registry: String,

    #[serde(default)]
    pub images: Vec<String>,

    #[serde(default)]
    pub arches: Vec<String>,

    #[serde(default)]
    pub interval: String,
}

/// Image-level declaration with an explicit tag list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageDecl {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub tags: Vec<TagDecl>,
}

/// One pinned tag, written as `registry/namespace/image:tag`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagDecl {
    pub tag: String,

    #[serde(default)]
    pub interval: String,

    #[serde(default)]
    pub arches: Vec<String>,

    #[serde(default)]
    pub disable: bool,
}

impl ScanConfig {
    pub fn from_yaml(content: &str) -> Result<Self, ConfigParseError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_yaml_bytes(content: &[u8]) -> Result<Self, ConfigParseError> {
        let text = std::str::from_utf8(content).map_err(|_| ConfigParseError::Encoding)?;
        Self::from_yaml(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: "1"
scanner:
  global:
    default_arches: [linux/amd64, linux/arm64]
    default_interval: 1d
    output:
      repo: scan-results
      path: reports
repos:
  - namespace: openeuler
    registry: docker.io
    images: [openeuler]
    interval: 12h
images:
  - image: openeuler
    tags:
      - tag: docker.io/openeuler/openeuler:24.03
        arches: [linux/amd64]
      - tag: docker.io/openeuler/openeuler:22.03
        disable: true
"#;

    #[test]
    fn test_parse_sample() {
        let cfg = ScanConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(cfg.scanner.global.default_interval, "1d");
        assert_eq!(cfg.scanner.global.default_arches.len(), 2);
        assert_eq!(cfg.scanner.global.output.repo, "scan-results");
        assert_eq!(cfg.repos.len(), 1);
        assert!(cfg.repos[0].arches.is_empty());
        assert_eq!(cfg.images[0].tags.len(), 2);
        assert!(cfg.images[0].tags[1].disable);
    }

    #[test]
    fn test_empty_document_sections_default() {
        let cfg = ScanConfig::from_yaml("version: \"1\"\n").unwrap();
        assert!(cfg.repos.is_empty());
        assert!(cfg.images.is_empty());
        assert!(cfg.scanner.global.default_arches.is_empty());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(ScanConfig::from_yaml("repos: [: bad").is_err());
        assert!(matches!(
            ScanConfig::from_yaml_bytes(&[0xff, 0xfe]),
            Err(ConfigParseError::Encoding)
        ));
    }

    #[test]
    fn test_output_file_path() {
        let out = Output {
            repo: "r".to_string(),
            path: "/reports/".to_string(),
        };
        assert_eq!(out.file_path("a/b.md"), "reports/a/b.md");
        assert_eq!(Output::default().file_path("a/b.md"), "a/b.md");
    }
}
