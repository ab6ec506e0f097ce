//! Integration tests for the execution scheduler
//!
//! These tests verify:
//! - a busy queue short-circuits `tick()` without touching the ledger
//! - every due task runs exactly once across the worker pool
//! - failures and panics are contained and still advance the last scan time

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{
    create_test_ledger, create_test_task, test_output, MockPlatform, RecordingRunner, OWNER,
};
use imagescan::config::ExecutionConfig;
use imagescan::platform::{OwnerHandle, SharedPlatform};
use imagescan::scanner::JobRunner;
use imagescan::scheduler::{ExecutionScheduler, HandlerRegistry, TickOutcome};
use imagescan::storage::{InMemoryTaskLedger, SharedTaskLedger, TaskLedger};
use tokio::sync::Semaphore;

struct Harness {
    ledger: Arc<InMemoryTaskLedger>,
    runner: Arc<RecordingRunner>,
    platform: Arc<MockPlatform>,
    scheduler: ExecutionScheduler,
}

async fn create_harness(concurrency: usize, runner: RecordingRunner, images: &[&str]) -> Harness {
    let ledger = create_test_ledger();
    for (i, image) in images.iter().enumerate() {
        ledger
            .upsert(&create_test_task(image, &format!("1.{i}")))
            .await
            .unwrap();
    }

    let platform = MockPlatform::with_config("{}");
    let handlers = HandlerRegistry::new();
    let shared_platform: SharedPlatform = platform.clone();
    handlers
        .register(OwnerHandle::new(OWNER, shared_platform, test_output()))
        .await;

    let runner = Arc::new(runner);
    let shared_ledger: SharedTaskLedger = ledger.clone();
    let job_runner: Arc<dyn JobRunner> = runner.clone();
    let scheduler = ExecutionScheduler::start(
        &ExecutionConfig {
            concurrency,
            queue_capacity: 100,
        },
        shared_ledger,
        handlers,
        job_runner,
    );

    Harness {
        ledger,
        runner,
        platform,
        scheduler,
    }
}

async fn run_wave(scheduler: &ExecutionScheduler) -> usize {
    let TickOutcome::Loading(loader) = scheduler.tick() else {
        panic!("queue should be empty");
    };
    let enqueued = loader.await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), scheduler.wait_idle())
        .await
        .expect("wave drains");
    enqueued
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached");
}

// ============================================================================
// Tick behaviour
// ============================================================================

#[tokio::test]
async fn test_busy_queue_skips_tick_without_loading() {
    let gate = Arc::new(Semaphore::new(0));
    let h = create_harness(1, RecordingRunner::new().gated(gate.clone()), &["a", "b", "c"]).await;

    let TickOutcome::Loading(loader) = h.scheduler.tick() else {
        panic!("first tick must load");
    };
    assert_eq!(loader.await.unwrap(), 3);
    wait_until(|| h.runner.running() == 1).await;

    let loads = h.ledger.load_count();
    let writes = h.ledger.write_count();
    match h.scheduler.tick() {
        TickOutcome::Busy { queued } => assert_eq!(queued, 2),
        TickOutcome::Loading(_) => panic!("tick must not load while tasks are queued"),
    }
    assert_eq!(h.ledger.load_count(), loads);
    assert_eq!(h.ledger.write_count(), writes);

    gate.add_permits(3);
    h.scheduler.wait_idle().await;
    assert_eq!(h.runner.total_runs(), 3);
}

#[tokio::test]
async fn test_in_flight_task_is_not_dispatched_twice() {
    let gate = Arc::new(Semaphore::new(0));
    let h = create_harness(2, RecordingRunner::new().gated(gate.clone()), &["a"]).await;

    let TickOutcome::Loading(loader) = h.scheduler.tick() else {
        panic!("first tick must load");
    };
    assert_eq!(loader.await.unwrap(), 1);
    wait_until(|| h.runner.running() == 1).await;

    // Queue is empty while the only task is being scanned
    let TickOutcome::Loading(loader) = h.scheduler.tick() else {
        panic!("empty queue must load");
    };
    assert_eq!(loader.await.unwrap(), 0);

    gate.add_permits(1);
    h.scheduler.wait_idle().await;
    assert_eq!(h.runner.total_runs(), 1);
}

// ============================================================================
// Worker pool
// ============================================================================

#[tokio::test]
async fn test_each_due_task_runs_exactly_once() {
    let images = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
    let h = create_harness(3, RecordingRunner::new(), &images).await;

    assert_eq!(run_wave(&h.scheduler).await, 10);

    let runs = h.runner.runs();
    assert_eq!(runs.len(), 10);
    assert!(runs.values().all(|&count| count == 1), "{runs:?}");
    assert!(h.runner.max_running() <= 3);

    let stats = h.scheduler.stats();
    assert_eq!(stats.enqueued, 10);
    assert_eq!(stats.succeeded, 10);
    assert_eq!(h.platform.published().len(), 10);

    // Every task was just stamped, so nothing is due any more
    assert_eq!(run_wave(&h.scheduler).await, 0);
    assert_eq!(h.runner.total_runs(), 10);
}

#[tokio::test]
async fn test_reports_are_published_under_output_path() {
    let h = create_harness(1, RecordingRunner::new(), &["nginx"]).await;
    run_wave(&h.scheduler).await;

    let published = h.platform.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "reports/docker.io/library/nginx/1.0.md");
}

// ============================================================================
// Failure containment
// ============================================================================

#[tokio::test]
async fn test_failed_job_still_advances_last_scan() {
    let h = create_harness(2, RecordingRunner::new().failing_on("broken"), &["ok", "broken"]).await;
    let before = Utc::now();

    run_wave(&h.scheduler).await;

    let stats = h.scheduler.stats();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 1);

    let broken = h
        .ledger
        .find_by_identity(&create_test_task("broken", "1.1").identity)
        .await
        .unwrap();
    let last = broken.last_scan_time.expect("last scan recorded");
    assert!(last >= before);
    assert!(!broken.is_need_to_scan(Utc::now()));
}

#[tokio::test]
async fn test_panicking_job_does_not_kill_worker() {
    let h = create_harness(
        1,
        RecordingRunner::new().panicking_on("crash"),
        &["first", "crash", "last"],
    )
    .await;

    assert_eq!(run_wave(&h.scheduler).await, 3);

    let stats = h.scheduler.stats();
    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.completed(), 3);

    let crashed = h
        .ledger
        .find_by_identity(&create_test_task("crash", "1.1").identity)
        .await
        .unwrap();
    assert!(crashed.last_scan_time.is_some());
    assert_eq!(h.scheduler.in_flight(), 0);
}

#[tokio::test]
async fn test_overflowing_interval_does_not_stop_the_wave() {
    let h = create_harness(1, RecordingRunner::new(), &[]).await;

    let mut stuck = create_test_task("forever", "1.0");
    stuck.interval = i64::MAX;
    stuck.mark_scanned(Utc::now());
    h.ledger.upsert(&stuck).await.unwrap();
    h.ledger
        .upsert(&create_test_task("nginx", "1.25"))
        .await
        .unwrap();

    assert_eq!(run_wave(&h.scheduler).await, 1);

    let runs = h.runner.runs();
    assert_eq!(runs.len(), 1);
    assert!(runs.contains_key(&create_test_task("nginx", "1.25").identity));
}

#[tokio::test]
async fn test_deleted_task_is_not_resurrected() {
    let gate = Arc::new(Semaphore::new(0));
    let h = create_harness(1, RecordingRunner::new().gated(gate.clone()), &["gone"]).await;

    let TickOutcome::Loading(loader) = h.scheduler.tick() else {
        panic!("first tick must load");
    };
    loader.await.unwrap();
    wait_until(|| h.runner.running() == 1).await;

    // Reconciliation removes the task while it is being scanned
    let stored = h
        .ledger
        .find_by_identity(&create_test_task("gone", "1.0").identity)
        .await
        .unwrap();
    h.ledger.delete_by_ids(&[stored.id.unwrap()]).await.unwrap();

    gate.add_permits(1);
    h.scheduler.wait_idle().await;

    assert!(h.ledger.is_empty());
    assert_eq!(h.scheduler.stats().persist_failures, 1);
}

#[tokio::test]
async fn test_shutdown_drains_workers() {
    let h = create_harness(2, RecordingRunner::new(), &["a", "b"]).await;
    run_wave(&h.scheduler).await;

    tokio::time::timeout(Duration::from_secs(5), h.scheduler.shutdown())
        .await
        .expect("workers stop");
}
