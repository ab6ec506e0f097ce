//! Trivy JSON output and the markdown report rendered from it

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::ScanError;

const OS_TYPE_OPENEULER: &str = "openEuler";
const OS_TYPE_UBUNTU: &str = "ubuntu";

const TABLE_HEAD: &str = "| Package | Vulnerability ID | Severity | Status | Installed Version | Fixed Version |\n\
                          | :----- | :----- | :----- | :----- | :----- | :----- |";

/// Top-level Trivy `-f json` document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanResult {
    #[serde(rename = "CreatedAt", default)]
    pub created_at: String,

    #[serde(rename = "Metadata", default)]
    pub metadata: Metadata,

    #[serde(rename = "Results", default)]
    pub results: Vec<TargetResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Vec<String>,

    #[serde(rename = "ImageConfig", default)]
    pub image_config: ImageConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub os: String,

    #[serde(default)]
    pub architecture: String,
}

impl ImageConfig {
    /// `os/architecture`, the platform Trivy actually resolved
    pub fn platform(&self) -> String {
        format!("{}/{}", self.os, self.architecture)
    }
}

/// Findings for one scan target (OS packages, a language lockfile, ...)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetResult {
    #[serde(rename = "Target", default)]
    pub target: String,

    #[serde(rename = "Class", default)]
    pub class: String,

    #[serde(rename = "Type", default)]
    pub os_type: String,

    #[serde(rename = "Vulnerabilities", default)]
    pub vulnerabilities: Vec<Vulnerability>,
}

impl TargetResult {
    /// Only OS packages of distributions with a known advisory site are reported
    pub fn is_reported(&self) -> bool {
        self.class == "os-pkgs"
            && (self.os_type == OS_TYPE_OPENEULER || self.os_type == OS_TYPE_UBUNTU)
    }

    fn advisory_link(&self, id: &str) -> String {
        let prefix = match self.os_type.as_str() {
            OS_TYPE_OPENEULER => "https://www.openeuler.org/zh/security/security-bulletins/detail/?id=",
            OS_TYPE_UBUNTU => "https://ubuntu.com/security/",
            _ => "",
        };
        format!("[{id}]({prefix}{id})")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Vulnerability {
    #[serde(rename = "VulnerabilityID", default)]
    pub vulnerability_id: String,

    #[serde(rename = "PkgName", default)]
    pub pkg_name: String,

    #[serde(rename = "InstalledVersion", default)]
    pub installed_version: String,

    #[serde(rename = "FixedVersion", default)]
    pub fixed_version: String,

    #[serde(rename = "Status", default)]
    pub status: String,

    #[serde(rename = "Severity", default)]
    pub severity: String,
}

impl ScanResult {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ScanError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Vulnerabilities that end up in the report
    pub fn reported_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.is_reported())
            .map(|r| r.vulnerabilities.len())
            .sum()
    }

    pub fn to_markdown(&self) -> String {
        let rows: Vec<String> = self
            .results
            .iter()
            .filter(|r| r.is_reported())
            .flat_map(|r| {
                r.vulnerabilities.iter().map(move |v| {
                    format!(
                        "| {} | {} | {} | {} | {} | {} |",
                        v.pkg_name,
                        r.advisory_link(&v.vulnerability_id),
                        v.severity,
                        v.status,
                        v.installed_version,
                        v.fixed_version
                    )
                })
            })
            .collect();

        if rows.is_empty() {
            return String::from("No vulnerabilities\n");
        }

        format!("{TABLE_HEAD}\n{}\n", rows.join("\n"))
    }
}

/// Render the report for one task
///
/// Sections follow the order of `arches`; a failed arch shows its error text.
pub fn build_content(scanned_at: DateTime<Utc>, arches: &[(String, Result<ScanResult, ScanError>)]) -> String {
    let mut content = format!("# Scan time: {}\n", scanned_at.format("%Y-%m-%d %H:%M:%S"));

    for (arch, result) in arches {
        content.push_str(&format!("\n---\n### Arch: {arch}\n"));
        match result {
            Ok(scan) => content.push_str(&scan.to_markdown()),
            Err(e) => content.push_str(&format!("{e}\n")),
        }
    }

    content
}
