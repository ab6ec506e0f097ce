//! imagescan - recurring vulnerability scans for container images
//!
//! Owners (communities) publish a declarative scan config in a repository.
//! imagescan reconciles every config into a persistent task ledger and runs due
//! scans on a bounded worker pool, publishing one markdown report per image tag.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Service configuration (TOML + environment overrides)
//! - [`task`] - Task identity, interval parsing and snapshot expansion
//! - [`registry`] - Tag listing for Docker Hub and Quay
//! - [`platform`] - Scan config fetch and report publishing (GitHub, Gitee, local)
//! - [`storage`] - Task ledger (SQLite, PostgreSQL, in-memory)
//! - [`scanner`] - Trivy job runner and scanner environment
//! - [`scheduler`] - Reconciliation driver, execution scheduler, periodic trigger
//! - [`service`] - Wiring of all of the above from one config
//! - [`health`] - Liveness and metrics endpoint
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use imagescan::config::Config;
//! use imagescan::service::Service;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Path::new("config.toml"))?;
//!     let service = Service::build(config).await?;
//!     service.driver().reconcile_all().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod platform;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod task;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::scheduler::{ExecutionScheduler, ReconciliationDriver};
    pub use crate::service::Service;
    pub use crate::storage::{SharedTaskLedger, TaskLedger};
    pub use crate::task::{Task, TaskIdentity};
}
