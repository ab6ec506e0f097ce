//! PostgreSQL task ledger
//!
//! Same schema and upsert semantics as the SQLite ledger, over a
//! `deadpool-postgres` connection pool.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{
    Config as PgConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use tokio_postgres::{NoTls, Row};

use super::{join_arch, LedgerError, LedgerResult, TaskLedger, TaskRow};
use crate::task::{Task, TaskIdentity};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS task (
        id BIGSERIAL PRIMARY KEY,
        community TEXT NOT NULL,
        registry TEXT NOT NULL,
        namespace TEXT NOT NULL,
        image TEXT NOT NULL,
        tag TEXT NOT NULL,
        arch TEXT NOT NULL DEFAULT '',
        scan_interval BIGINT NOT NULL,
        last_scan_time TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_task_identity
        ON task(community, registry, namespace, image, tag);

    CREATE INDEX IF NOT EXISTS idx_task_community
        ON task(community);
"#;

const SELECT_COLUMNS: &str = "id, community, registry, namespace, image, tag, arch, \
                              scan_interval, last_scan_time";

/// PostgreSQL implementation of [`TaskLedger`]
pub struct PostgresTaskLedger {
    pool: Pool,
}

impl PostgresTaskLedger {
    /// Build the pool and make sure the schema exists
    pub async fn connect(url: &str, pool_size: usize) -> LedgerResult<Self> {
        let mut cfg = PgConfig::new();
        cfg.url = Some(url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| LedgerError::Open(e.to_string()))?;

        let ledger = Self { pool };
        ledger.create_schema().await?;

        tracing::info!(pool_size, "PostgreSQL task ledger initialized");
        Ok(ledger)
    }

    async fn create_schema(&self) -> LedgerResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        Ok(())
    }

    fn into_task(row: &Row) -> LedgerResult<Task> {
        TaskRow {
            id: row.try_get(0)?,
            community: row.try_get(1)?,
            registry: row.try_get(2)?,
            namespace: row.try_get(3)?,
            image: row.try_get(4)?,
            tag: row.try_get(5)?,
            arch: row.try_get(6)?,
            interval: row.try_get(7)?,
            last_scan_time: row.try_get(8)?,
        }
        .into_task()
    }
}

#[async_trait]
impl TaskLedger for PostgresTaskLedger {
    async fn upsert(&self, task: &Task) -> LedgerResult<i64> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        let arch = join_arch(&task.arch);

        if let Some(id) = task.id {
            let updated = client
                .execute(
                    "UPDATE task SET arch = $1, scan_interval = $2, last_scan_time = $3, updated_at = $4
                     WHERE id = $5",
                    &[&arch, &task.interval, &task.last_scan_time, &now, &id],
                )
                .await?;

            if updated == 0 {
                return Err(LedgerError::NotFound(task.identity.to_string()));
            }
            return Ok(id);
        }

        let id = &task.identity;
        let row = client
            .query_one(
                r#"
                INSERT INTO task (community, registry, namespace, image, tag, arch, scan_interval,
                                  last_scan_time, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
                ON CONFLICT (community, registry, namespace, image, tag) DO UPDATE SET
                    arch = EXCLUDED.arch,
                    scan_interval = EXCLUDED.scan_interval,
                    last_scan_time = EXCLUDED.last_scan_time,
                    updated_at = EXCLUDED.updated_at
                RETURNING id
                "#,
                &[
                    &id.owner,
                    &id.registry.as_str(),
                    &id.namespace,
                    &id.image,
                    &id.tag,
                    &arch,
                    &task.interval,
                    &task.last_scan_time,
                    &now,
                ],
            )
            .await?;

        Ok(row.try_get(0)?)
    }

    async fn find_by_identity(&self, identity: &TaskIdentity) -> LedgerResult<Task> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM task
                     WHERE community = $1 AND registry = $2 AND namespace = $3
                       AND image = $4 AND tag = $5"
                ),
                &[
                    &identity.owner,
                    &identity.registry.as_str(),
                    &identity.namespace,
                    &identity.image,
                    &identity.tag,
                ],
            )
            .await?;

        match row {
            Some(row) => Self::into_task(&row),
            None => Err(LedgerError::NotFound(identity.to_string())),
        }
    }

    async fn find_all_by_owner(&self, owner: &str) -> LedgerResult<Vec<Task>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM task WHERE community = $1 ORDER BY id"),
                &[&owner],
            )
            .await?;

        rows.iter().map(Self::into_task).collect()
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> LedgerResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM task WHERE id = ANY($1)", &[&ids])
            .await?;

        Ok(deleted as usize)
    }
}
