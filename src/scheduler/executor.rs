//! Execution scheduler
//!
//! ```text
//!   tick() ──► loader ──► bounded queue ──► worker 0..N ──► JobRunner
//!                │                              │
//!                ▼                              ▼
//!           TaskLedger ◄──── stamp last scan ───┘
//!                                               │
//!                                               ▼
//!                                   result channel ──► collector (stats)
//! ```
//!
//! Workers are started once and share one receiver. A tick that finds queued
//! tasks returns without touching the ledger. A task stays in the in-flight
//! set from enqueue until its last scan time is stamped, so overlapping loaders
//! never hand the same task to two workers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::handlers::HandlerRegistry;
use crate::config::ExecutionConfig;
use crate::metrics;
use crate::platform::OwnerHandle;
use crate::scanner::{JobRunner, ScanSummary};
use crate::storage::SharedTaskLedger;
use crate::task::{Task, TaskIdentity};

// ============================================================================
// Jobs and outcomes
// ============================================================================

struct QueuedTask {
    task: Task,
    handle: OwnerHandle,
}

#[derive(Debug, Clone)]
pub enum JobStatus {
    Succeeded(ScanSummary),
    Failed(String),
    /// The job panicked; the worker survived
    Panicked(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// Reported by a worker after every attempt
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub worker_id: usize,
    pub identity: TaskIdentity,
    pub status: JobStatus,
    pub elapsed: Duration,
    /// Whether the new last scan time reached the ledger
    pub persisted: bool,
}

// ============================================================================
// Statistics
// ============================================================================

/// Execution statistics (thread-safe)
#[derive(Debug, Default)]
pub struct ExecutionStats {
    pub enqueued: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub panicked: AtomicU64,
    pub persist_failures: AtomicU64,
}

impl ExecutionStats {
    fn record(&self, outcome: &JobOutcome) {
        let counter = match outcome.status {
            JobStatus::Succeeded(_) => &self.succeeded,
            JobStatus::Failed(_) => &self.failed,
            JobStatus::Panicked(_) => &self.panicked,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if !outcome.persisted {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            enqueued: self.enqueued.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSnapshot {
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub persist_failures: u64,
}

impl ExecutionSnapshot {
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.panicked
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Result of one `tick()`
#[derive(Debug)]
pub enum TickOutcome {
    /// Tasks were still queued; nothing was loaded
    Busy { queued: usize },
    /// A loader was spawned; it resolves to the number of tasks enqueued
    Loading(JoinHandle<usize>),
}

/// State shared by the scheduler, its loaders and its workers
struct Shared {
    ledger: SharedTaskLedger,
    handlers: HandlerRegistry,
    stats: ExecutionStats,
    queued: AtomicUsize,
    in_flight: Mutex<HashSet<TaskIdentity>>,
    idle: Notify,
}

impl Shared {
    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<TaskIdentity>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_idle(&self) -> bool {
        let stats = self.stats.snapshot();
        self.in_flight().is_empty() && stats.completed() >= stats.enqueued
    }

    fn publish_queue_state(&self) {
        metrics::update_queue_state(self.queued.load(Ordering::SeqCst), self.in_flight().len());
    }
}

pub struct ExecutionScheduler {
    shared: Arc<Shared>,
    queue_tx: mpsc::Sender<QueuedTask>,
    workers: Vec<JoinHandle<()>>,
    collector: JoinHandle<()>,
}

impl ExecutionScheduler {
    /// Create the queue and start the worker pool
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: &ExecutionConfig,
        ledger: SharedTaskLedger,
        handlers: HandlerRegistry,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel::<QueuedTask>(config.queue_capacity.max(1));
        let (result_tx, result_rx) = mpsc::channel::<JobOutcome>(config.queue_capacity.max(1));

        let shared = Arc::new(Shared {
            ledger,
            handlers,
            stats: ExecutionStats::default(),
            queued: AtomicUsize::new(0),
            in_flight: Mutex::new(HashSet::new()),
            idle: Notify::new(),
        });

        let workers = Self::spawn_workers(
            config.concurrency.max(1),
            queue_rx,
            result_tx,
            Arc::clone(&shared),
            runner,
        );
        let collector = Self::spawn_collector(result_rx, Arc::clone(&shared));

        tracing::info!(
            workers = config.concurrency,
            queue_capacity = config.queue_capacity,
            "Execution scheduler started"
        );

        Self {
            shared,
            queue_tx,
            workers,
            collector,
        }
    }

    /// Start one loading wave unless tasks are still queued
    pub fn tick(&self) -> TickOutcome {
        let queued = self.queued();
        if queued > 0 {
            tracing::info!(queued, "Queue not drained, skipping tick");
            return TickOutcome::Busy { queued };
        }

        let shared = Arc::clone(&self.shared);
        let queue_tx = self.queue_tx.clone();
        TickOutcome::Loading(tokio::spawn(Self::load(shared, queue_tx)))
    }

    /// Tasks waiting in the queue
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Tasks queued or being scanned
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight().len()
    }

    pub fn stats(&self) -> ExecutionSnapshot {
        self.shared.stats.snapshot()
    }

    /// Wait until no task is queued or being scanned and every outcome is recorded
    ///
    /// Call after the wave's loader has finished; a loader still running may
    /// enqueue more work after this returns.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Close the queue and wait for the workers to drain it
    pub async fn shutdown(self) {
        drop(self.queue_tx);
        for handle in self.workers {
            let _ = handle.await;
        }
        let _ = self.collector.await;
        tracing::info!("Execution scheduler stopped");
    }

    /// Enqueue every due task of every registered owner
    async fn load(shared: Arc<Shared>, queue_tx: mpsc::Sender<QueuedTask>) -> usize {
        let mut enqueued = 0;

        for handle in shared.handlers.all().await {
            let tasks = match shared.ledger.find_all_by_owner(&handle.owner).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    tracing::error!(owner = %handle.owner, error = %e, "Failed to load tasks");
                    continue;
                }
            };

            let now = Utc::now();
            for task in tasks.into_iter().filter(|t| t.is_need_to_scan(now)) {
                if !shared.in_flight().insert(task.identity.clone()) {
                    tracing::debug!(task = %task.identity, "Task already in flight");
                    continue;
                }

                let identity = task.identity.clone();
                shared.queued.fetch_add(1, Ordering::SeqCst);
                shared.stats.enqueued.fetch_add(1, Ordering::SeqCst);
                let job = QueuedTask {
                    task,
                    handle: handle.clone(),
                };

                if queue_tx.send(job).await.is_err() {
                    shared.queued.fetch_sub(1, Ordering::SeqCst);
                    shared.stats.enqueued.fetch_sub(1, Ordering::SeqCst);
                    shared.in_flight().remove(&identity);
                    tracing::error!("Execution queue closed, stopping loader");
                    return enqueued;
                }

                enqueued += 1;
                shared.publish_queue_state();
            }
        }

        tracing::info!(enqueued, "Loaded due tasks");
        shared.idle.notify_waiters();
        enqueued
    }

    fn spawn_workers(
        count: usize,
        queue_rx: mpsc::Receiver<QueuedTask>,
        result_tx: mpsc::Sender<JobOutcome>,
        shared: Arc<Shared>,
        runner: Arc<dyn JobRunner>,
    ) -> Vec<JoinHandle<()>> {
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let mut handles = Vec::with_capacity(count);

        for worker_id in 0..count {
            let queue_rx = Arc::clone(&queue_rx);
            let result_tx = result_tx.clone();
            let shared = Arc::clone(&shared);
            let runner = Arc::clone(&runner);

            let handle = tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = queue_rx.lock().await;
                        rx.recv().await
                    };

                    let Some(job) = job else {
                        break; // Channel closed
                    };
                    shared.queued.fetch_sub(1, Ordering::SeqCst);

                    let identity = job.task.identity.clone();
                    let outcome = Self::execute(worker_id, job, &shared, runner.as_ref()).await;

                    shared.in_flight().remove(&identity);
                    shared.publish_queue_state();

                    if result_tx.send(outcome).await.is_err() {
                        tracing::warn!(worker_id, "Result collector gone");
                    }
                }

                tracing::debug!(worker_id, "Worker stopped");
            });

            handles.push(handle);
        }

        handles
    }

    /// Run one job inside a panic boundary, then stamp and persist the attempt
    async fn execute(
        worker_id: usize,
        job: QueuedTask,
        shared: &Shared,
        runner: &dyn JobRunner,
    ) -> JobOutcome {
        let QueuedTask { mut task, handle } = job;
        let started = Instant::now();

        tracing::debug!(worker_id, task = %task.identity, "Scanning");

        let status = match std::panic::AssertUnwindSafe(runner.run(&task, &handle))
            .catch_unwind()
            .await
        {
            Ok(Ok(summary)) => JobStatus::Succeeded(summary),
            Ok(Err(e)) => JobStatus::Failed(e.to_string()),
            Err(panic) => JobStatus::Panicked(panic_message(panic.as_ref())),
        };

        task.mark_scanned(Utc::now());
        let persisted = match shared.ledger.upsert(&task).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(worker_id, task = %task.identity, error = %e, "Failed to record scan time");
                false
            }
        };

        JobOutcome {
            worker_id,
            identity: task.identity,
            status,
            elapsed: started.elapsed(),
            persisted,
        }
    }

    fn spawn_collector(
        mut result_rx: mpsc::Receiver<JobOutcome>,
        shared: Arc<Shared>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(outcome) = result_rx.recv().await {
                shared.stats.record(&outcome);
                shared.idle.notify_waiters();
                metrics::record_job(
                    &outcome.identity.owner,
                    outcome.status.as_str(),
                    outcome.elapsed.as_secs_f64(),
                );

                match &outcome.status {
                    JobStatus::Succeeded(summary) => tracing::info!(
                        worker_id = outcome.worker_id,
                        task = %outcome.identity,
                        vulnerabilities = summary.vulnerabilities,
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "Job succeeded"
                    ),
                    JobStatus::Failed(error) => tracing::warn!(
                        worker_id = outcome.worker_id,
                        task = %outcome.identity,
                        error = %error,
                        "Job failed"
                    ),
                    JobStatus::Panicked(message) => tracing::error!(
                        worker_id = outcome.worker_id,
                        task = %outcome.identity,
                        panic = %message,
                        "Job panicked"
                    ),
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic payload")
    }
}
