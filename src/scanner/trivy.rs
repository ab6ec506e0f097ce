//! Trivy job runner

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use super::report::{build_content, ScanResult};
use super::{JobRunner, ScanError, ScanSummary};
use crate::config::ScannerConfig;
use crate::platform::OwnerHandle;
use crate::task::Task;

pub struct TrivyJobRunner {
    trivy_bin: String,
    cache_dir: PathBuf,
}

impl TrivyJobRunner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            trivy_bin: config.trivy_bin.clone(),
            cache_dir: config.cache_dir.clone(),
        }
    }

    /// Arguments of one image scan; the DB is refreshed separately
    pub fn scan_args(&self, image_ref: &str, arch: &str) -> Vec<String> {
        vec![
            "image".to_string(),
            "--quiet".to_string(),
            "--skip-db-update".to_string(),
            "-f".to_string(),
            "json".to_string(),
            "--scanners".to_string(),
            "vuln".to_string(),
            "--cache-dir".to_string(),
            self.cache_dir.to_string_lossy().into_owned(),
            "--platform".to_string(),
            arch.to_string(),
            image_ref.to_string(),
        ]
    }

    pub async fn scan_arch(&self, image_ref: &str, arch: &str) -> Result<ScanResult, ScanError> {
        let output = Command::new(&self.trivy_bin)
            .args(self.scan_args(image_ref, arch))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ScanError::Spawn {
                program: self.trivy_bin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ScanError::Command {
                program: self.trivy_bin.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        ScanResult::from_json(&output.stdout)
    }
}

#[async_trait]
impl JobRunner for TrivyJobRunner {
    async fn run(&self, task: &Task, handle: &OwnerHandle) -> Result<ScanSummary, ScanError> {
        if task.arch.is_empty() {
            return Err(ScanError::NoArchitectures);
        }

        let image_ref = task.image_ref();
        let mut summary = ScanSummary::default();
        let mut results = Vec::with_capacity(task.arch.len());

        for arch in &task.arch {
            let result = self.scan_arch(&image_ref, arch).await;
            summary.arches += 1;

            match &result {
                Ok(scan) => summary.vulnerabilities += scan.reported_count(),
                Err(e) => {
                    summary.failed_arches += 1;
                    tracing::warn!(task = %task.identity, arch = %arch, error = %e, "Arch scan failed");
                }
            }
            results.push((arch.clone(), result));
        }

        let content = build_content(Utc::now(), &results);
        handle.publish(&content, &task.report_path()).await?;

        tracing::info!(
            task = %task.identity,
            arches = summary.arches,
            failed = summary.failed_arches,
            vulnerabilities = summary.vulnerabilities,
            "Published scan report"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_args() {
        let runner = TrivyJobRunner::new(&ScannerConfig::default());
        let args = runner.scan_args("docker.io/library/nginx:1.0", "linux/arm64");

        assert_eq!(
            args.join(" "),
            "image --quiet --skip-db-update -f json --scanners vuln --cache-dir ./trivy_resource/ \
             --platform linux/arm64 docker.io/library/nginx:1.0"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runner = TrivyJobRunner::new(&ScannerConfig {
            trivy_bin: "/nonexistent/trivy".to_string(),
            ..Default::default()
        });

        assert!(matches!(
            runner.scan_arch("docker.io/a/b:c", "linux/amd64").await,
            Err(ScanError::Spawn { .. })
        ));
    }
}
