//! Scanner environment maintenance
//!
//! The environment script owns the Trivy installation: `init` clones the
//! scanner, DB and vuln-list repositories, `update` refreshes the DB.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use super::ScanError;
use crate::config::ScannerConfig;

pub struct ScannerEnv {
    script: PathBuf,
    resource_dir: PathBuf,
    images_dir: PathBuf,
    init_args: [String; 3],
}

impl ScannerEnv {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            script: config.script.clone(),
            resource_dir: config.resource_dir.clone(),
            images_dir: config.images_dir.clone(),
            init_args: [
                config.trivy_repo.clone(),
                config.trivy_db_repo.clone(),
                config.vuln_list_repo.clone(),
            ],
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Run `script init` unless the resource directory already exists
    ///
    /// Returns whether the script ran.
    pub async fn init(&self) -> Result<bool, ScanError> {
        if tokio::fs::try_exists(&self.resource_dir).await? {
            tracing::debug!(dir = %self.resource_dir.display(), "Scanner environment already present");
            return Ok(false);
        }

        let [trivy, trivy_db, vuln_list] = &self.init_args;
        self.run_script(&["init", trivy.as_str(), trivy_db.as_str(), vuln_list.as_str()])
            .await?;

        tracing::info!(dir = %self.resource_dir.display(), "Initialized scanner environment");
        Ok(true)
    }

    pub async fn update_db(&self) -> Result<(), ScanError> {
        self.run_script(&["update"]).await?;
        tracing::info!("Updated vulnerability DB");
        Ok(())
    }

    /// Remove and recreate the local images directory
    pub async fn cleanup_images(&self) -> Result<(), ScanError> {
        match tokio::fs::remove_dir_all(&self.images_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.images_dir).await?;

        tracing::info!(dir = %self.images_dir.display(), "Cleaned up local images");
        Ok(())
    }

    async fn run_script(&self, args: &[&str]) -> Result<String, ScanError> {
        let program = self.script.to_string_lossy().into_owned();
        let output = Command::new(&self.script)
            .args(args)
            .output()
            .await
            .map_err(|source| ScanError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(ScanError::Command {
                program,
                code: output.status.code(),
                stderr: format!("{}{}", stdout, String::from_utf8_lossy(&output.stderr)),
            });
        }

        Ok(stdout)
    }
}
