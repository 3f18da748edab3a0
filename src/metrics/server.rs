//! Prometheus exporter for the pipeline metrics.
//!
//! `/metrics` renders every `flurry_*` series in text format; `/health`
//! answers as long as the process is up.

use axum::{Router, extract::State, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{BindSnafu, MetricsError, PrometheusInitSnafu};

/// Bucket bounds, in seconds, for per-batch stage durations. Transforms can
/// run for minutes, so the tail is long.
const STAGE_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 3600.0,
];

/// Bind `addr`, install the global recorder and serve it in the background.
///
/// The listener is bound first, so a taken port fails here rather than in
/// the background task.
pub async fn init(addr: SocketAddr) -> Result<(), MetricsError> {
    let listener = TcpListener::bind(addr).await.context(BindSnafu { addr })?;

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("flurry_stage_duration_seconds".to_string()),
            STAGE_DURATION_BUCKETS,
        )
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;
    describe_metrics();

    info!("Metrics endpoint listening on http://{}/metrics", addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(handle)).await {
            error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

fn describe_metrics() {
    describe_counter!("flurry_batches_total", "Slots handled, by stage and outcome");
    describe_counter!("flurry_batch_failures_total", "Failure records, by kind");
    describe_counter!("flurry_inputs_purged_total", "Source directories removed");
    describe_counter!("flurry_bytes_copied_total", "Bytes staged or published");
    describe_gauge!("flurry_queue_depth", "Slots waiting in a stage's input queue");
    describe_histogram!(
        "flurry_stage_duration_seconds",
        "Time a stage spent on one batch"
    );
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .route("/health", get(health))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

async fn health() -> &'static str {
    "ok\n"
}
