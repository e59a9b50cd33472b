// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the AIM engine.
//!
//! This module provides metrics collection with the namespace prefix
//! `aim_eai_amd_com_` (prometheus-safe version of "aim.eai.amd.com").
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Track reconcile passes, their outcomes and requeues
//! - **Child Object Metrics** - Track applies and deletes of owned and shared children
//! - **Error Metrics** - Track failures by pipeline phase and API error category
//! - **Discovery Admission Metrics** - Track the discovery semaphore
//!
//! # Example
//!
//! ```rust,no_run
//! use aim_engine::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("AIMModelCache", std::time::Duration::from_secs(1));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all AIM metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "aim_eai_amd_com";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by resource type and status
///
/// Labels:
/// - `resource_type`: Kind of resource (e.g., `AIMModelCache`)
/// - `status`: Outcome (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type and status",
    );
    let counter = CounterVec::new(opts, &["resource_type", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
///
/// Labels:
/// - `resource_type`: Kind of resource
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of requeue operations
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `reason`: Reason for requeue (`conflict`, `backpressure`, `not_ready`, `ready`, `error`)
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requeues_total"),
        "Total number of requeue operations by resource type and reason",
    );
    let counter = CounterVec::new(opts, &["resource_type", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of status subresource patches
///
/// Labels:
/// - `resource_type`: Kind of resource whose status was written
pub static STATUS_PATCHES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_status_patches_total"),
        "Total number of status patches by resource type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Child Object Metrics
// ============================================================================

/// Total number of child objects applied
///
/// Labels:
/// - `resource_type`: Kind of child (e.g., `Job`, `PersistentVolumeClaim`)
/// - `ownership`: `owned` or `shared`
pub static CHILDREN_APPLIED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_children_applied_total"),
        "Total number of child objects applied by type and ownership",
    );
    let counter = CounterVec::new(opts, &["resource_type", "ownership"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of child objects deleted
///
/// Labels:
/// - `resource_type`: Kind of child deleted
pub static CHILDREN_DELETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_children_deleted_total"),
        "Total number of child objects deleted by type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Total number of errors by resource type, pipeline phase and API error category
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `error_type`: Pipeline phase that failed (`fetch`, `apply`, `status_patch`, `timeout`, ...)
/// - `category`: API error category (`transient`, `forbidden`, ..., or `none`)
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors by resource type, phase and category",
    );
    let counter = CounterVec::new(opts, &["resource_type", "error_type", "category"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Discovery Admission Metrics
// ============================================================================

/// Discovery semaphore slots
///
/// Labels:
/// - `state`: `active` (held slots) or `capacity`
pub static DISCOVERY_SLOTS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_discovery_slots"),
        "Discovery job admission slots by state",
    );
    let gauge = GaugeVec::new(opts, &["state"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled (e.g., `AIMTemplateCache`)
/// * `duration` - Duration of the reconciliation
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `duration` - Duration of the reconciliation before failure
pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a reconciliation requeue
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `reason` - Reason for requeue (e.g., `conflict`, `backpressure`)
pub fn record_reconciliation_requeue(resource_type: &str, reason: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "requeue"])
        .inc();
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

/// Record a status subresource patch
pub fn record_status_patch(resource_type: &str) {
    STATUS_PATCHES_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record a child object apply
///
/// # Arguments
/// * `resource_type` - The kind of child applied
/// * `owned` - Whether the child carries an owner reference
pub fn record_child_applied(resource_type: &str, owned: bool) {
    let ownership = if owned { "owned" } else { "shared" };
    CHILDREN_APPLIED_TOTAL
        .with_label_values(&[resource_type, ownership])
        .inc();
}

/// Record a child object deletion
pub fn record_child_deleted(resource_type: &str) {
    CHILDREN_DELETED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record an error
///
/// # Arguments
/// * `resource_type` - The kind of resource where error occurred
/// * `error_type` - Pipeline phase that failed
/// * `category` - API error category, or `none` for errors not from the API server
pub fn record_error(resource_type: &str, error_type: &str, category: &str) {
    ERRORS_TOTAL
        .with_label_values(&[resource_type, error_type, category])
        .inc();
}

/// Record the discovery semaphore occupancy
pub fn record_discovery_slots(active: usize, capacity: usize) {
    #[allow(clippy::cast_precision_loss)]
    {
        DISCOVERY_SLOTS
            .with_label_values(&["active"])
            .set(active as f64);
        DISCOVERY_SLOTS
            .with_label_values(&["capacity"])
            .set(capacity as f64);
    }
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Returns
/// Prometheus-formatted metrics as a String
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
