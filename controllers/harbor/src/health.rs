//! Liveness, readiness and metrics endpoints.
//!
//! - `/healthz`: 200 as soon as the server runs
//! - `/readyz`: 200 once the configuration is loaded and every controller
//!   has started watching
//! - `/metrics`: Prometheus text exposition

use crate::config::ConfigStore;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Controllers expected to register before the operator reports ready.
#[derive(Debug, Default)]
pub struct Registrations {
    expected: BTreeSet<String>,
    registered: Mutex<BTreeSet<String>>,
}

impl Registrations {
    pub fn new<I, S>(expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
            registered: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn register(&self, controller: &str) {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(controller.to_string());
    }

    /// Expected controllers that have not registered yet.
    pub fn missing(&self) -> Vec<String> {
        let registered = self.registered.lock().unwrap_or_else(PoisonError::into_inner);
        self.expected.difference(&registered).cloned().collect()
    }
}

/// State shared between the controllers and the health server
#[derive(Debug, Clone)]
pub struct HealthState {
    pub config: Arc<ConfigStore>,
    pub registrations: Arc<Registrations>,
    pub metrics: Arc<Metrics>,
}

/// Construct the router for all the handlers
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json("healthy"))
}

async fn readyz(State(state): State<HealthState>) -> impl IntoResponse {
    if !state.config.is_warm() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json("configuration not loaded".to_string()));
    }
    let missing = state.registrations.missing();
    if !missing.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(format!("waiting for controllers: {}", missing.join(", "))),
        );
    }
    (StatusCode::OK, Json("ready".to_string()))
}

async fn metrics(State(state): State<HealthState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(buffer) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buffer),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string().into_bytes(),
            )
        }
    }
}

/// Serves the health endpoints until `shutdown` fires.
pub async fn serve(addr: SocketAddr, state: HealthState, shutdown: CancellationToken) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Health server listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
