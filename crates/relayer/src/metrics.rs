//! Prometheus metrics for the invoice relayer.
//!
//! Metrics are recorded through the `metrics` facade. Until [`install`] is called they go nowhere,
//! which keeps the recording helpers safe to call from tests.

use std::{net::SocketAddr, time::Duration};

use alloy_primitives::ChainId;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};

/// Install the Prometheus recorder and register metric descriptions.
///
/// Returns a handle that renders the `/metrics` endpoint.
pub fn install() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Metrics(e.to_string()))?;

    describe_counter!(
        "relayer_events_received_total",
        "Invoice batch events forwarded by chain listeners"
    );
    describe_counter!(
        "relayer_proofs_total",
        "Proof acquisitions by source chain and result"
    );
    describe_histogram!(
        "relayer_proof_duration_seconds",
        "Time from proof request to proof readiness in seconds"
    );
    describe_counter!(
        "relayer_dispatches_total",
        "submitProof transactions by target chain and result"
    );

    Ok(handle)
}

/// Router serving `/metrics` and `/health`.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/health", get(StatusCode::OK))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

/// Serve [`router`] on `port` until `shutdown` is cancelled.
pub async fn serve(port: u16, handle: PrometheusHandle, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Serving metrics");

    axum::serve(listener, router(handle))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

fn status(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// Record an event forwarded by the listener of `chain_id`.
pub(crate) fn record_event_received(chain_id: ChainId) {
    counter!("relayer_events_received_total", "chain_id" => chain_id.to_string()).increment(1);
}

/// Record a proof acquisition for an event from `chain_id`.
pub(crate) fn record_proof(chain_id: ChainId, success: bool, duration: Duration) {
    counter!(
        "relayer_proofs_total",
        "chain_id" => chain_id.to_string(),
        "status" => status(success)
    )
    .increment(1);
    if success {
        histogram!("relayer_proof_duration_seconds", "chain_id" => chain_id.to_string())
            .record(duration.as_secs_f64());
    }
}

/// Record a `submitProof` attempt on `chain_id`.
pub(crate) fn record_dispatch(chain_id: ChainId, success: bool) {
    counter!(
        "relayer_dispatches_total",
        "chain_id" => chain_id.to_string(),
        "status" => status(success)
    )
    .increment(1);
}
