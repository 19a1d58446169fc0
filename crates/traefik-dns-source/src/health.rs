//! Health check HTTP server for Kubernetes probes.
//!
//! Provides `/healthz` (liveness) and `/readyz` (readiness) endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Shared state for health check endpoints.
#[derive(Debug, Default)]
pub struct HealthState {
    /// Whether every watch cache finished its initial listing.
    caches_synced: AtomicBool,
    /// Whether the most recent endpoint pass succeeded.
    last_pass_ok: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_synced(&self) {
        self.caches_synced.store(true, Ordering::SeqCst);
        info!("Health check: watch caches synced");
    }

    /// Record the outcome of an endpoint pass.
    pub fn record_pass(&self, ok: bool) {
        self.last_pass_ok.store(ok, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.caches_synced.load(Ordering::SeqCst) && self.last_pass_ok.load(Ordering::SeqCst)
    }
}

/// Run the health check HTTP server until it fails.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state);

    // Probes come from the kubelet over the pod IP
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = port, "Health check server listening");

    axum::serve(listener, app).await
}

/// Liveness probe endpoint.
async fn healthz() -> StatusCode {
    debug!("Liveness probe: OK");
    StatusCode::OK
}

/// Readiness probe endpoint.
///
/// Returns 503 Service Unavailable until the caches have synced, and again
/// whenever the latest endpoint pass failed.
async fn readyz(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        debug!("Readiness probe: OK");
        StatusCode::OK
    } else {
        debug!("Readiness probe: NOT READY");
        StatusCode::SERVICE_UNAVAILABLE
    }
}
