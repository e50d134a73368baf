// src/metrics.rs
// Prometheus metrics for the coordinator

use axum::{http::StatusCode, response::IntoResponse};
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::info;

/// Global Prometheus handle for metrics rendering
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics exporter
pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    PROMETHEUS_HANDLE
        .set(handle)
        .expect("Prometheus handle already initialized");

    info!("Prometheus metrics initialized");
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Record a store write that failed while the in-memory mutation was kept.
pub fn record_persistence_failure(entity: &str) {
    counter!("foreman_persistence_failures_total", "entity" => entity.to_string()).increment(1);
}

/// Record an execution request handed to a worker poll.
pub fn record_dispatch() {
    counter!("foreman_dispatches_total").increment(1);
}

/// Record a heartbeat-watchdog firing (all in-flight runs failed).
pub fn record_worker_lost() {
    counter!("foreman_worker_lost_total").increment(1);
}
