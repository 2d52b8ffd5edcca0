//! Prometheus metrics and the operational HTTP endpoint.
//!
//! Exposes `/metrics`, `/health` and `/ready`. Readiness is tied to the
//! PoW admission gate: until the difficulty oracle has delivered a
//! non-empty schedule, every client submission is rejected, so the node
//! reports not-ready and should be kept out of rotation.

use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness response body.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response body.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Tracks whether the node holds a difficulty schedule and can admit
/// client submissions.
///
/// Starts not-ready; the oracle refresh loop flips it once a usable
/// schedule arrives.
#[derive(Clone, Default)]
pub struct ReadyState {
    ready: Arc<AtomicBool>,
}

impl ReadyState {
    /// Creates a not-ready state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records whether a usable difficulty schedule is loaded.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Returns `true` once a difficulty schedule has been loaded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// # Errors
///
/// Returns an error if binding the metrics HTTP server fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    ready_state: ReadyState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(ready_state.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Liveness: the process is up and serving.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Readiness: 200 once a difficulty schedule is loaded, 503 before.
async fn ready_handler(state: ReadyState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "awaiting difficulty schedule",
                ready: false,
            }),
        )
    }
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("haven_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("haven_connections_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record an admission attempt with the given outcome label.
    pub fn admissions_total(outcome: &'static str) {
        metrics::counter!("haven_admissions_total", "outcome" => outcome).increment(1);
    }

    /// Record a dispatched RPC request.
    pub fn rpc_requests_total(category: &'static str) {
        metrics::counter!("haven_rpc_requests_total", "category" => category).increment(1);
    }

    /// Record a request refused for an insufficient capability tier.
    pub fn rpc_auth_denied_total() {
        metrics::counter!("haven_rpc_auth_denied_total").increment(1);
    }

    /// Record a request for an unknown command.
    pub fn rpc_unknown_command_total() {
        metrics::counter!("haven_rpc_unknown_command_total").increment(1);
    }

    /// Record a difficulty oracle refresh with the given outcome label.
    pub fn oracle_refresh_total(outcome: &'static str) {
        metrics::counter!("haven_oracle_refresh_total", "outcome" => outcome).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record a handler dispatch latency observation in seconds.
    pub fn dispatch_latency_seconds(value: f64) {
        metrics::histogram!("haven_dispatch_latency_seconds").record(value);
    }
}
