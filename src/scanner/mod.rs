//! Vulnerability scanning
//!
//! - [`JobRunner`] - the seam the execution scheduler calls for every due task
//! - [`TrivyJobRunner`] - runs Trivy once per architecture and publishes a
//!   markdown report through the owner's platform
//! - [`ScannerEnv`] - installs and refreshes the Trivy toolchain and DB
//! - [`report`] - Trivy JSON types and markdown rendering

pub mod env;
pub mod report;
pub mod trivy;

use async_trait::async_trait;
use thiserror::Error;

use crate::platform::{OwnerHandle, PlatformError};
use crate::task::Task;

pub use env::ScannerEnv;
pub use report::{build_content, ScanResult};
pub use trivy::TrivyJobRunner;

/// Errors raised while scanning or preparing the scanner
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}: {stderr}")]
    Command {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("invalid scanner output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("failed to publish report: {0}")]
    Publish(#[from] PlatformError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task has no architectures to scan")]
    NoArchitectures,
}

impl ScanError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Publish(e) => e.is_recoverable(),
            Self::Command { .. } | Self::Io(_) => true,
            Self::Spawn { .. } | Self::Output(_) | Self::NoArchitectures => false,
        }
    }
}

/// What one job produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub arches: usize,
    pub failed_arches: usize,
    pub vulnerabilities: usize,
}

/// Executes one scan job for a task
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, task: &Task, handle: &OwnerHandle) -> Result<ScanSummary, ScanError>;
}
