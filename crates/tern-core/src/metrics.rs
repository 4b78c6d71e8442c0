//! Prometheus metrics helpers for the Tern pipeline.
//!
//! This module provides centralized metrics initialization and the metric
//! descriptions shared across the pipeline processes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tern_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     use metrics::counter;
//!     counter!("firehose_events_received", "kind" => "commit", "status" => "ok").increment(1);
//! }
//! ```

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded. Returns a
/// handle for [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already
/// installed. Useful in tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port. Spawns a background
/// task and returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("metrics server exited: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics used across the pipeline.
fn register_common_metrics() {
    // =========================================================================
    // Converter
    // =========================================================================

    describe_counter!(
        "firehose_events_received",
        "Number of events received from the firehose, by kind and status"
    );
    describe_counter!(
        "events_produced",
        "Number of events produced to the bus, by kind and status"
    );
    describe_gauge!(
        "firehose_cursor_sequence",
        "Last firehose sequence checkpointed by the converter"
    );

    // =========================================================================
    // Enricher
    // =========================================================================

    describe_counter!(
        "enricher_events_received",
        "Number of firehose events consumed by the enricher, by collection"
    );
    describe_counter!(
        "enricher_events_produced",
        "Number of enriched events produced, by collection and status"
    );
    describe_histogram!(
        "enricher_api_duration_sec",
        "Duration of enrichment service calls, by service and status"
    );
    describe_counter!(
        "enricher_api_cache_result",
        "Cache hits/misses for enrichment client caches, by service"
    );
    describe_gauge!(
        "enricher_api_cache_size",
        "Current entry count of enrichment client caches, by service"
    );

    // =========================================================================
    // Effector
    // =========================================================================

    describe_counter!(
        "events_received",
        "Number of verdicts received, by action name"
    );
    describe_counter!(
        "events_processed",
        "Number of verdicts processed, by action name and status"
    );
    describe_counter!(
        "effects_processed",
        "Number of effects processed, by type and status"
    );
    describe_counter!(
        "ozone_requests",
        "Number of requests to the moderation console, by type, subject kind, and status"
    );

    // =========================================================================
    // Warehouse inserter
    // =========================================================================

    describe_counter!(
        "warehouse_inserts",
        "Rows submitted to the analytics warehouse, by status"
    );
    describe_gauge!(
        "warehouse_pending_sends",
        "Warehouse batch submissions currently in flight"
    );
    describe_histogram!(
        "warehouse_insert_duration_sec",
        "Duration of warehouse batch submissions"
    );
}
