//! Reconciliation driver
//!
//! Brings each owner's ledger rows in line with the owner's latest scan config:
//!
//! 1. fetch the snapshot and its fingerprint (failure aborts this owner only)
//! 2. skip the owner when the fingerprint matches the last applied one
//! 3. expand the snapshot into the desired task set
//! 4. load the owner's stored tasks and collect ids that are no longer desired
//! 5. insert new tasks, update arch/interval of kept ones (id and last scan
//!    time survive)
//! 6. delete the collected ids
//!
//! The fingerprint is remembered only when every desired task was saved.
//! Afterwards the owner's handler is registered for the execution scheduler.

use std::collections::HashMap;

use tokio::sync::Mutex;

use super::error::{SchedulerError, SchedulerResult};
use super::handlers::HandlerRegistry;
use crate::metrics;
use crate::platform::{OwnerHandle, SharedPlatform};
use crate::storage::SharedTaskLedger;
use crate::task::{ConfigReconciler, DesiredTasks, Task};

/// An owner and the platform its config is fetched from
#[derive(Clone)]
pub struct OwnerSource {
    pub owner: String,
    pub platform: SharedPlatform,
}

impl OwnerSource {
    pub fn new(owner: impl Into<String>, platform: SharedPlatform) -> Self {
        Self {
            owner: owner.into(),
            platform,
        }
    }
}

/// Ledger changes of one applied snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub desired: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Tasks skipped because of a ledger error
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Fingerprint matched the last applied snapshot
    Unchanged,
    Applied(ReconcileStats),
}

pub struct ReconciliationDriver {
    owners: Vec<OwnerSource>,
    reconciler: ConfigReconciler,
    ledger: SharedTaskLedger,
    handlers: HandlerRegistry,
    fingerprints: Mutex<HashMap<String, String>>,
}

impl ReconciliationDriver {
    pub fn new(
        owners: Vec<OwnerSource>,
        reconciler: ConfigReconciler,
        ledger: SharedTaskLedger,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            owners,
            reconciler,
            ledger,
            handlers,
            fingerprints: Mutex::new(HashMap::new()),
        }
    }

    pub fn owners(&self) -> &[OwnerSource] {
        &self.owners
    }

    /// Reconcile every owner; one owner's failure does not affect the others
    pub async fn reconcile_all(&self) -> Vec<(String, SchedulerResult<ReconcileOutcome>)> {
        let mut results = Vec::with_capacity(self.owners.len());

        for source in &self.owners {
            let result = self.reconcile_owner(source).await;
            match &result {
                Ok(ReconcileOutcome::Unchanged) => {
                    metrics::record_reconcile(&source.owner, "unchanged");
                    tracing::info!(owner = %source.owner, "Scan config unchanged");
                }
                Ok(ReconcileOutcome::Applied(stats)) => {
                    metrics::record_reconcile(&source.owner, "applied");
                    metrics::record_ledger_changes(
                        &source.owner,
                        stats.inserted,
                        stats.updated,
                        stats.deleted,
                    );
                }
                Err(e) => {
                    metrics::record_reconcile(&source.owner, "failed");
                    tracing::error!(owner = %source.owner, error = %e, "Reconciliation failed");
                }
            }
            results.push((source.owner.clone(), result));
        }

        results
    }

    pub async fn reconcile_owner(&self, source: &OwnerSource) -> SchedulerResult<ReconcileOutcome> {
        let owner = source.owner.as_str();

        let snapshot = source
            .platform
            .fetch_snapshot()
            .await
            .map_err(|e| SchedulerError::config_fetch(owner, e))?;

        if self.last_fingerprint(owner).await.as_deref() == Some(snapshot.fingerprint.as_str()) {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let desired = self.reconciler.desired_tasks(owner, &snapshot.config).await;
        let stats = self.apply(owner, desired).await?;

        // A partial apply must be retried by the next cycle
        if stats.skipped == 0 {
            self.fingerprints
                .lock()
                .await
                .insert(owner.to_string(), snapshot.fingerprint);
        } else {
            tracing::warn!(owner, skipped = stats.skipped, "Scan config partially applied");
        }

        self.handlers
            .register(OwnerHandle::new(
                owner,
                source.platform.clone(),
                snapshot.config.scanner.global.output.clone(),
            ))
            .await;

        tracing::info!(
            owner,
            desired = stats.desired,
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            skipped = stats.skipped,
            "Applied scan config"
        );
        Ok(ReconcileOutcome::Applied(stats))
    }

    pub async fn last_fingerprint(&self, owner: &str) -> Option<String> {
        self.fingerprints.lock().await.get(owner).cloned()
    }

    /// Make the ledger rows of `owner` match `desired`
    async fn apply(&self, owner: &str, desired: DesiredTasks) -> SchedulerResult<ReconcileStats> {
        let mut stats = ReconcileStats {
            desired: desired.len(),
            ..Default::default()
        };

        let existing = self
            .ledger
            .find_all_by_owner(owner)
            .await
            .map_err(|e| SchedulerError::persistence(owner, e))?;

        let stale: Vec<i64> = existing
            .iter()
            .filter(|task| !desired.contains_key(&task.identity))
            .filter_map(|task| task.id)
            .collect();

        for task in desired.into_values() {
            self.save_desired(task, &mut stats).await;
        }

        if !stale.is_empty() {
            stats.deleted = self
                .ledger
                .delete_by_ids(&stale)
                .await
                .map_err(|e| SchedulerError::persistence(owner, e))?;
        }

        Ok(stats)
    }

    async fn save_desired(&self, desired: Task, stats: &mut ReconcileStats) {
        let task = match self.ledger.find_by_identity(&desired.identity).await {
            Ok(mut stored) => {
                if stored.arch == desired.arch && stored.interval == desired.interval {
                    stats.unchanged += 1;
                    return;
                }
                stored.update_interval_and_arch(desired.interval, desired.arch);
                stored
            }
            Err(e) if e.is_not_found() => desired,
            Err(e) => {
                tracing::error!(task = %desired.identity, error = %e, "Failed to look up task");
                stats.skipped += 1;
                return;
            }
        };

        let is_new = task.id.is_none();
        match self.ledger.upsert(&task).await {
            Ok(_) if is_new => stats.inserted += 1,
            Ok(_) => stats.updated += 1,
            Err(e) => {
                tracing::error!(task = %task.identity, error = %e, "Failed to save task");
                stats.skipped += 1;
            }
        }
    }
}
