//! Cron-driven periodic trigger
//!
//! One loop owns every [`ScheduledAction`]. It sleeps until the earliest next
//! firing, then starts each due action on its own task. An action whose
//! previous run has not finished is skipped for that firing.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::error::{SchedulerError, SchedulerResult};
use crate::metrics;

/// Body of a periodic action
pub type ActionFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`ActionFn`]
pub fn action_fn<F, Fut>(f: F) -> ActionFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

// ============================================================================
// Action statistics
// ============================================================================

#[derive(Debug, Default)]
pub struct ActionStats {
    pub started: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

impl ActionStats {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Firing {
    Started,
    /// Previous run still in progress
    Skipped,
}

// ============================================================================
// Scheduled action
// ============================================================================

pub struct ScheduledAction {
    name: String,
    expression: String,
    schedule: Schedule,
    run_on_start: bool,
    action: ActionFn,
    stats: Arc<ActionStats>,
    next_fire: Option<DateTime<Utc>>,
    running: Option<JoinHandle<()>>,
}

impl ScheduledAction {
    /// Parse `expression` (six-field cron, seconds first)
    pub fn new(
        name: impl Into<String>,
        expression: &str,
        action: ActionFn,
    ) -> SchedulerResult<Self> {
        let name = name.into();
        let schedule = Schedule::from_str(expression)
            .map_err(|e| SchedulerError::invalid_cron(&name, expression, e.to_string()))?;

        Ok(Self {
            name,
            expression: expression.to_string(),
            schedule,
            run_on_start: false,
            action,
            stats: Arc::new(ActionStats::default()),
            next_fire: None,
            running: None,
        })
    }

    /// Also fire once when the trigger starts
    pub fn run_on_start(mut self, value: bool) -> Self {
        self.run_on_start = value;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> Arc<ActionStats> {
        Arc::clone(&self.stats)
    }

    fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn schedule_after(&mut self, now: DateTime<Utc>) {
        self.next_fire = self.schedule.after(&now).next();
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire.is_some_and(|at| at <= now)
    }

    fn fire(&mut self) -> Firing {
        if self.is_running() {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            metrics::record_trigger(&self.name, "skipped");
            tracing::warn!(action = %self.name, "Previous run still in progress, skipping");
            return Firing::Skipped;
        }

        self.stats.started.fetch_add(1, Ordering::Relaxed);
        metrics::record_trigger(&self.name, "started");
        tracing::info!(action = %self.name, "Running periodic action");

        let future = (self.action)();
        let name = self.name.clone();
        let stats = Arc::clone(&self.stats);

        self.running = Some(tokio::spawn(async move {
            if let Err(e) = future.await {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_trigger(&name, "failed");
                tracing::error!(action = %name, error = %e, "Periodic action failed");
            }
        }));

        Firing::Started
    }
}

impl fmt::Debug for ScheduledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledAction")
            .field("name", &self.name)
            .field("expression", &self.expression)
            .field("run_on_start", &self.run_on_start)
            .field("next_fire", &self.next_fire)
            .finish()
    }
}

// ============================================================================
// Trigger loop
// ============================================================================

#[derive(Debug, Default)]
pub struct PeriodicTrigger {
    actions: Vec<ScheduledAction>,
}

impl PeriodicTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: ScheduledAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn actions(&self) -> &[ScheduledAction] {
        &self.actions
    }

    /// Dispatch actions until `shutdown` turns true or its sender is dropped
    ///
    /// Runs still in progress at shutdown are left to finish on their own.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let now = Utc::now();
        for action in &mut self.actions {
            action.schedule_after(now);
            if action.run_on_start {
                action.fire();
            }
        }

        tracing::info!(actions = self.actions.len(), "Periodic trigger started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let sleep_for = match self.actions.iter().filter_map(|a| a.next_fire).min() {
                Some(at) => (at - now).to_std().unwrap_or_default(),
                None => {
                    // Nothing left to schedule; wait for shutdown only
                    let _ = shutdown.changed().await;
                    break;
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let now = Utc::now();
            for action in &mut self.actions {
                if action.is_due(now) {
                    action.fire();
                    action.schedule_after(now);
                }
            }
        }

        let running = self.actions.iter().filter(|a| a.is_running()).count();
        tracing::info!(running, "Periodic trigger stopped");
    }
}
