//! In-memory task ledger for tests and dry runs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{LedgerError, LedgerResult, TaskLedger};
use crate::task::{Task, TaskIdentity};

#[derive(Default)]
struct Tables {
    rows: BTreeMap<i64, Task>,
    next_id: i64,
}

/// Map-backed implementation of [`TaskLedger`]
///
/// Counts writes and owner loads so tests can assert how much work a
/// reconciliation or tick performed.
#[derive(Default)]
pub struct InMemoryTaskLedger {
    tables: Mutex<Tables>,
    writes: AtomicUsize,
    loads: AtomicUsize,
}

impl InMemoryTaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> LedgerResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Upserts and deletes performed so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// `find_all_by_owner` calls performed so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.tables().map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskLedger for InMemoryTaskLedger {
    async fn upsert(&self, task: &Task) -> LedgerResult<i64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables()?;

        if let Some(id) = task.id {
            let row = tables
                .rows
                .get_mut(&id)
                .ok_or_else(|| LedgerError::NotFound(task.identity.to_string()))?;
            row.arch = task.arch.clone();
            row.interval = task.interval;
            row.last_scan_time = task.last_scan_time;
            return Ok(id);
        }

        let existing = tables
            .rows
            .iter()
            .find(|(_, row)| row.identity == task.identity)
            .map(|(id, _)| *id);

        let id = match existing {
            Some(id) => id,
            None => {
                tables.next_id += 1;
                tables.next_id
            }
        };

        let mut stored = task.clone();
        stored.id = Some(id);
        tables.rows.insert(id, stored);
        Ok(id)
    }

    async fn find_by_identity(&self, identity: &TaskIdentity) -> LedgerResult<Task> {
        let tables = self.tables()?;
        tables
            .rows
            .values()
            .find(|row| &row.identity == identity)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(identity.to_string()))
    }

    async fn find_all_by_owner(&self, owner: &str) -> LedgerResult<Vec<Task>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables()?;
        Ok(tables
            .rows
            .values()
            .filter(|row| row.owner() == owner)
            .cloned()
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> LedgerResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables()?;
        Ok(ids.iter().filter(|id| tables.rows.remove(id).is_some()).count())
    }
}
