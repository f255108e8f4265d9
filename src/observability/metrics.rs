//! # Metrics
//!
//! Prometheus metrics for monitoring the discovery pipeline.
//!
//! ## Metrics Exposed
//!
//! - `cloud_scan_discovery_messages_received_total` - Queue messages received
//! - `cloud_scan_discovery_messages_acknowledged_total` - Queue messages deleted after processing
//! - `cloud_scan_discovery_messages_poison_total` - Undecodable or non-retryable messages dropped
//! - `cloud_scan_discovery_messages_redelivered_total` - Messages left for redelivery
//! - `cloud_scan_discovery_receive_errors_total` - Failed receive calls
//! - `cloud_scan_discovery_dead_letter_errors_total` - Failed dead-letter forwards
//! - `cloud_scan_discovery_reconciliations_total` - Reconciliations by result
//! - `cloud_scan_discovery_scan_mutations_total` - ScheduledScan writes by operation
//! - `cloud_scan_discovery_reconcile_duration_seconds` - Duration of a single event reconcile

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static MESSAGES_RECEIVED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloud_scan_discovery_messages_received_total",
        "Total number of queue messages received",
    )
    .expect("Failed to create MESSAGES_RECEIVED_TOTAL metric - this should never happen")
});

static MESSAGES_ACKNOWLEDGED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloud_scan_discovery_messages_acknowledged_total",
        "Total number of queue messages acknowledged",
    )
    .expect("Failed to create MESSAGES_ACKNOWLEDGED_TOTAL metric - this should never happen")
});

static MESSAGES_POISON_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloud_scan_discovery_messages_poison_total",
        "Total number of messages dropped as undecodable or non-retryable",
    )
    .expect("Failed to create MESSAGES_POISON_TOTAL metric - this should never happen")
});

static MESSAGES_REDELIVERED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloud_scan_discovery_messages_redelivered_total",
        "Total number of messages left unacknowledged for redelivery",
    )
    .expect("Failed to create MESSAGES_REDELIVERED_TOTAL metric - this should never happen")
});

static RECEIVE_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloud_scan_discovery_receive_errors_total",
        "Total number of failed queue receive calls",
    )
    .expect("Failed to create RECEIVE_ERRORS_TOTAL metric - this should never happen")
});

static DEAD_LETTER_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cloud_scan_discovery_dead_letter_errors_total",
        "Total number of poison messages that could not be forwarded",
    )
    .expect("Failed to create DEAD_LETTER_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloud_scan_discovery_reconciliations_total",
            "Total number of event reconciliations by result",
        ),
        &["result"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static SCAN_MUTATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "cloud_scan_discovery_scan_mutations_total",
            "Total number of ScheduledScan writes by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create SCAN_MUTATIONS_TOTAL metric - this should never happen")
});

static RECONCILE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "cloud_scan_discovery_reconcile_duration_seconds",
            "Duration of a single event reconcile in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILE_DURATION metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(MESSAGES_RECEIVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MESSAGES_ACKNOWLEDGED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MESSAGES_POISON_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MESSAGES_REDELIVERED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECEIVE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEAD_LETTER_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SCAN_MUTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILE_DURATION.clone()))?;

    Ok(())
}

pub fn increment_messages_received(count: usize) {
    MESSAGES_RECEIVED_TOTAL.inc_by(count as u64);
}

pub fn increment_messages_acknowledged() {
    MESSAGES_ACKNOWLEDGED_TOTAL.inc();
}

pub fn increment_messages_poison() {
    MESSAGES_POISON_TOTAL.inc();
}

pub fn increment_messages_redelivered() {
    MESSAGES_REDELIVERED_TOTAL.inc();
}

pub fn increment_receive_errors() {
    RECEIVE_ERRORS_TOTAL.inc();
}

pub fn increment_dead_letter_errors() {
    DEAD_LETTER_ERRORS_TOTAL.inc();
}

/// `result` is `success`, `retryable`, `non_retryable` or `fatal`
pub fn increment_reconciliations(result: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[result]).inc();
}

/// `operation` is `create`, `update` or `delete`
pub fn increment_scan_mutations(operation: &str) {
    SCAN_MUTATIONS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn observe_reconcile_duration(duration: f64) {
    RECONCILE_DURATION.observe(duration);
}
