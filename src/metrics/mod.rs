//! Prometheus metrics for imagescan
//!
//! This module provides metrics tracking for:
//! - Reconciliation: cycles per owner and the ledger changes they caused
//! - Execution: job outcomes, job duration, queue depth
//! - Trigger: periodic action runs and overrun skips
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct Metrics {
    reconcile_cycles: CounterVec,
    ledger_changes: CounterVec,
    jobs: CounterVec,
    job_duration: HistogramVec,
    queue_depth: Gauge,
    jobs_in_flight: Gauge,
    trigger_runs: CounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = Metrics {
        reconcile_cycles: register_counter_vec!(
            "imagescan_reconcile_cycles_total",
            "Reconciliation cycles by owner and result",
            &["owner", "result"]
        )?,
        ledger_changes: register_counter_vec!(
            "imagescan_ledger_changes_total",
            "Task rows inserted, updated or deleted by reconciliation",
            &["owner", "kind"]
        )?,
        jobs: register_counter_vec!(
            "imagescan_jobs_total",
            "Scan jobs by owner and outcome",
            &["owner", "status"]
        )?,
        job_duration: register_histogram_vec!(
            "imagescan_job_duration_seconds",
            "Wall time of one scan job",
            &["owner"],
            vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
        )?,
        queue_depth: register_gauge!(
            "imagescan_queue_depth",
            "Tasks waiting in the execution queue"
        )?,
        jobs_in_flight: register_gauge!(
            "imagescan_jobs_in_flight",
            "Tasks queued or being scanned"
        )?,
        trigger_runs: register_counter_vec!(
            "imagescan_trigger_runs_total",
            "Periodic action firings by action and result",
            &["action", "result"]
        )?,
    };

    if METRICS.set(metrics).is_err() {
        tracing::warn!("Metrics were already registered");
    }

    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one reconciliation cycle (`applied`, `unchanged` or `failed`)
pub fn record_reconcile(owner: &str, result: &str) {
    if let Some(m) = METRICS.get() {
        m.reconcile_cycles.with_label_values(&[owner, result]).inc();
    }
}

pub fn record_ledger_changes(owner: &str, inserted: usize, updated: usize, deleted: usize) {
    let Some(m) = METRICS.get() else {
        return;
    };

    for (kind, count) in [("inserted", inserted), ("updated", updated), ("deleted", deleted)] {
        if count > 0 {
            m.ledger_changes
                .with_label_values(&[owner, kind])
                .inc_by(count as f64);
        }
    }
}

/// Record a finished job (`succeeded`, `failed` or `panicked`)
pub fn record_job(owner: &str, status: &str, duration_secs: f64) {
    let Some(m) = METRICS.get() else {
        return;
    };

    m.jobs.with_label_values(&[owner, status]).inc();
    m.job_duration
        .with_label_values(&[owner])
        .observe(duration_secs);
}

pub fn update_queue_state(queued: usize, in_flight: usize) {
    if let Some(m) = METRICS.get() {
        m.queue_depth.set(queued as f64);
        m.jobs_in_flight.set(in_flight as f64);
    }
}

/// Record a trigger firing (`started`, `skipped` or `failed`)
pub fn record_trigger(action: &str, result: &str) {
    if let Some(m) = METRICS.get() {
        m.trigger_runs.with_label_values(&[action, result]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
