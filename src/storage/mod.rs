//! Task ledger: persisted scan tasks
//!
//! The ledger is the only durable state of the service. Business logic talks to
//! the [`TaskLedger`] trait; the concrete back-end is chosen from configuration.
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  Reconciliation Driver   │   │   Execution Scheduler    │
//! └────────────┬─────────────┘   └────────────┬─────────────┘
//!              └──────────────┬───────────────┘
//!                             ▼
//!                    ┌─────────────────┐
//!                    │   TaskLedger    │
//!                    └────────┬────────┘
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!   ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//!   │   SQLite    │   │  PostgreSQL  │   │  In-memory  │
//!   └─────────────┘   └──────────────┘   └─────────────┘
//! ```

pub mod memory;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::task::{Task, TaskIdentity};

pub use memory::InMemoryTaskLedger;
pub use postgres::PostgresTaskLedger;
pub use sqlite::SqliteTaskLedger;

/// Errors returned by ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    /// No row matches the requested identity or id
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("PostgreSQL pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A stored row cannot be mapped back to a task
    #[error("corrupt task row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    #[error("failed to open ledger: {0}")]
    Open(String),

    #[error("ledger connection lock poisoned")]
    Poisoned,
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Persisted store of scan tasks
///
/// Identity `(owner, registry, namespace, image, tag)` is unique per ledger.
#[async_trait]
pub trait TaskLedger: Send + Sync {
    /// Save a task and return its storage id
    ///
    /// A task carrying an id updates that row (arch, interval, last scan time)
    /// and fails with [`LedgerError::NotFound`] if the row is gone. A task
    /// without an id is inserted, or merged into the row with the same identity.
    async fn upsert(&self, task: &Task) -> LedgerResult<i64>;

    /// Look up one task by identity
    async fn find_by_identity(&self, identity: &TaskIdentity) -> LedgerResult<Task>;

    /// All tasks of one owner, ordered by storage id
    async fn find_all_by_owner(&self, owner: &str) -> LedgerResult<Vec<Task>>;

    /// Delete rows by storage id, returning how many were removed
    async fn delete_by_ids(&self, ids: &[i64]) -> LedgerResult<usize>;
}

/// Thread-safe shared ledger handle
pub type SharedTaskLedger = Arc<dyn TaskLedger>;

/// Open the ledger selected by configuration
pub async fn open_ledger(config: &DatabaseConfig) -> LedgerResult<SharedTaskLedger> {
    let ledger: SharedTaskLedger = match config.backend {
        DatabaseBackend::Sqlite => Arc::new(SqliteTaskLedger::new(&config.sqlite_path)?),
        DatabaseBackend::Postgres => {
            Arc::new(PostgresTaskLedger::connect(&config.postgres_url, config.pool_size).await?)
        }
        DatabaseBackend::Memory => Arc::new(InMemoryTaskLedger::new()),
    };

    Ok(ledger)
}

// ============================================================================
// Row mapping shared by the SQL back-ends
// ============================================================================

/// Architectures are stored as one comma-delimited column
pub(crate) fn join_arch(arch: &[String]) -> String {
    arch.join(",")
}

pub(crate) fn split_arch(arch: &str) -> Vec<String> {
    arch.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(String::from)
        .collect()
}

/// Raw column values of one `task` row
pub(crate) struct TaskRow {
    pub id: i64,
    pub community: String,
    pub registry: String,
    pub namespace: String,
    pub image: String,
    pub tag: String,
    pub arch: String,
    pub interval: i64,
    pub last_scan_time: Option<DateTime<Utc>>,
}

impl TaskRow {
    pub fn into_task(self) -> LedgerResult<Task> {
        let registry = self.registry.parse().map_err(|e| LedgerError::CorruptRow {
            id: self.id,
            reason: format!("{e}"),
        })?;

        Ok(Task {
            id: Some(self.id),
            identity: TaskIdentity::new(
                self.community,
                registry,
                self.namespace,
                self.image,
                self.tag,
            ),
            arch: split_arch(&self.arch),
            interval: self.interval,
            last_scan_time: self.last_scan_time,
        })
    }
}
