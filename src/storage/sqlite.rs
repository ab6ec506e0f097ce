//! SQLite task ledger

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{join_arch, LedgerError, LedgerResult, TaskLedger, TaskRow};
use crate::task::{Task, TaskIdentity};

/// SQLite has a bound-parameter limit; deletes are chunked below it
const DELETE_CHUNK: usize = 500;

const SELECT_COLUMNS: &str = "id, community, registry, namespace, image, tag, arch, \
                              scan_interval, last_scan_time";

/// SQLite implementation of [`TaskLedger`]
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteTaskLedger {
    conn: Mutex<Connection>,
}

impl SqliteTaskLedger {
    /// Open (or create) the database file
    pub fn new(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::Open(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite task ledger initialized");
        Ok(ledger)
    }

    /// Create in-memory ledger (for testing)
    pub fn in_memory() -> LedgerResult<Self> {
        let ledger = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        ledger.create_schema()?;
        Ok(ledger)
    }

    fn conn(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    fn create_schema(&self) -> LedgerResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS task (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    community TEXT NOT NULL,
                    registry TEXT NOT NULL,
                    namespace TEXT NOT NULL,
                    image TEXT NOT NULL,
                    tag TEXT NOT NULL,
                    arch TEXT NOT NULL DEFAULT '',
                    scan_interval INTEGER NOT NULL,
                    last_scan_time TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_task_identity
                    ON task(community, registry, namespace, image, tag);

                CREATE INDEX IF NOT EXISTS idx_task_community
                    ON task(community);
                "#,
        )?;

        Ok(())
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<(TaskRow, Option<String>)> {
        Ok((
            TaskRow {
                id: row.get(0)?,
                community: row.get(1)?,
                registry: row.get(2)?,
                namespace: row.get(3)?,
                image: row.get(4)?,
                tag: row.get(5)?,
                arch: row.get(6)?,
                interval: row.get(7)?,
                last_scan_time: None,
            },
            row.get(8)?,
        ))
    }

    /// Timestamps are stored as RFC 3339 text
    fn into_task((mut row, last_scan): (TaskRow, Option<String>)) -> LedgerResult<Task> {
        row.last_scan_time = match last_scan {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| LedgerError::CorruptRow {
                        id: row.id,
                        reason: format!("bad last_scan_time {s:?}: {e}"),
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        row.into_task()
    }
}

#[async_trait]
impl TaskLedger for SqliteTaskLedger {
    async fn upsert(&self, task: &Task) -> LedgerResult<i64> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let arch = join_arch(&task.arch);
        let last_scan = task.last_scan_time.map(|t| t.to_rfc3339());

        if let Some(id) = task.id {
            let updated = conn.execute(
                "UPDATE task SET arch = ?1, scan_interval = ?2, last_scan_time = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![arch, task.interval, last_scan, now, id],
            )?;

            if updated == 0 {
                return Err(LedgerError::NotFound(task.identity.to_string()));
            }
            return Ok(id);
        }

        let id = &task.identity;
        let row_id: i64 = conn.query_row(
            r#"
            INSERT INTO task (community, registry, namespace, image, tag, arch, scan_interval,
                              last_scan_time, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT(community, registry, namespace, image, tag) DO UPDATE SET
                arch = excluded.arch,
                scan_interval = excluded.scan_interval,
                last_scan_time = excluded.last_scan_time,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
            params![
                id.owner,
                id.registry.as_str(),
                id.namespace,
                id.image,
                id.tag,
                arch,
                task.interval,
                last_scan,
                now
            ],
            |row| row.get(0),
        )?;

        Ok(row_id)
    }

    async fn find_by_identity(&self, identity: &TaskIdentity) -> LedgerResult<Task> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM task
                     WHERE community = ?1 AND registry = ?2 AND namespace = ?3
                       AND image = ?4 AND tag = ?5"
                ),
                params![
                    identity.owner,
                    identity.registry.as_str(),
                    identity.namespace,
                    identity.image,
                    identity.tag
                ],
                Self::read_row,
            )
            .optional()?;

        match row {
            Some(row) => Self::into_task(row),
            None => Err(LedgerError::NotFound(identity.to_string())),
        }
    }

    async fn find_all_by_owner(&self, owner: &str) -> LedgerResult<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM task WHERE community = ?1 ORDER BY id"
        ))?;

        let rows = stmt
            .query_map(params![owner], Self::read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(Self::into_task).collect()
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> LedgerResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let mut deleted = 0;

        for chunk in ids.chunks(DELETE_CHUNK) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!("DELETE FROM task WHERE id IN ({placeholders})");
            deleted += conn.execute(&query, rusqlite::params_from_iter(chunk.iter()))?;
        }

        Ok(deleted)
    }
}
