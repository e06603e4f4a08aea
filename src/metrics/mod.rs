//! Prometheus metrics for the recast worker
//!
//! This module provides metrics tracking for:
//! - Store: retries, dedup lookups, delayed promotions
//! - Queues: depth, task outcomes and handling time
//! - Publishing: per-platform results and quota skips
//! - Worker: loop restarts and pause state
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Metrics Storage
// ============================================================================

struct StoreMetrics {
    retries: CounterVec,
    dedup_hits: Counter,
    dedup_misses: Counter,
    promotions: Counter,
}

struct PipelineMetrics {
    queue_depth: GaugeVec,
    tasks: CounterVec,
    task_duration: HistogramVec,
    publishes: CounterVec,
    quota_skips: Counter,
    loop_restarts: CounterVec,
    paused: Gauge,
}

static STORE_METRICS: OnceLock<StoreMetrics> = OnceLock::new();
static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let store = StoreMetrics {
        retries: register_counter_vec!(
            "recast_store_retries_total",
            "Store calls retried after a transient failure",
            &["op"]
        )?,
        dedup_hits: register_counter!(
            "recast_dedup_hits_total",
            "Discovered items already recorded as processed"
        )?,
        dedup_misses: register_counter!(
            "recast_dedup_misses_total",
            "Discovered items seen for the first time"
        )?,
        promotions: register_counter!(
            "recast_delayed_promotions_total",
            "Scheduled publish tasks moved onto the publish queue"
        )?,
    };

    let pipeline = PipelineMetrics {
        queue_depth: register_gauge_vec!(
            "recast_queue_depth",
            "Pending tasks per queue",
            &["queue"]
        )?,
        tasks: register_counter_vec!(
            "recast_tasks_total",
            "Tasks handled by queue and outcome",
            &["queue", "outcome"]
        )?,
        task_duration: register_histogram_vec!(
            "recast_task_duration_seconds",
            "Time spent handling one task",
            &["queue"],
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )?,
        publishes: register_counter_vec!(
            "recast_publishes_total",
            "Publish attempts by platform and result",
            &["platform", "result"]
        )?,
        quota_skips: register_counter!(
            "recast_quota_skips_total",
            "Publishes skipped or deferred because the daily quota was reached"
        )?,
        loop_restarts: register_counter_vec!(
            "recast_loop_restarts_total",
            "Supervisor restarts per worker unit",
            &["unit"]
        )?,
        paused: register_gauge!(
            "recast_worker_paused",
            "Whether the worker is paused (1 = yes, 0 = no)"
        )?,
    };

    STORE_METRICS
        .set(store)
        .map_err(|_| "Store metrics already initialized")?;
    PIPELINE_METRICS
        .set(pipeline)
        .map_err(|_| "Pipeline metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    STORE_METRICS.get().is_some() && PIPELINE_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// ============================================================================
// Recorders
// ============================================================================

pub fn record_store_retry(op: &str) {
    if let Some(m) = STORE_METRICS.get() {
        m.retries.with_label_values(&[op]).inc();
    }
}

pub fn record_dedup_lookup(seen: bool) {
    if let Some(m) = STORE_METRICS.get() {
        if seen {
            m.dedup_hits.inc();
        } else {
            m.dedup_misses.inc();
        }
    }
}

pub fn record_promotions(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = STORE_METRICS.get() {
        m.promotions.inc_by(count as f64);
    }
}

pub fn set_queue_depth(queue: &str, depth: usize) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.queue_depth.with_label_values(&[queue]).set(depth as f64);
    }
}

/// Record one handled task; `outcome` is completed, skipped, failed or dropped
pub fn record_task(queue: &str, outcome: &str, elapsed: Duration) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };

    m.tasks.with_label_values(&[queue, outcome]).inc();
    m.task_duration
        .with_label_values(&[queue])
        .observe(elapsed.as_secs_f64());
}

pub fn record_publish(platform: &str, result: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.publishes.with_label_values(&[platform, result]).inc();
    }
}

pub fn record_quota_skip() {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.quota_skips.inc();
    }
}

pub fn record_loop_restart(unit: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.loop_restarts.with_label_values(&[unit]).inc();
    }
}

pub fn set_paused(paused: bool) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.paused.set(if paused { 1.0 } else { 0.0 });
    }
}

// ============================================================================
// Tests
// ============================================================================
