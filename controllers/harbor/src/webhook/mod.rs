//! Admission and conversion webhooks.
//!
//! One validating endpoint per kind, at `/validate-<group>-<version>-<kind>`,
//! plus `/convert` for `HarborCluster` version conversion. The API server
//! only talks HTTPS to webhooks; plain HTTP is for local runs.

pub mod convert;
pub mod regex_cache;
pub mod validate;

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use cluster_client::{ClusterClientError, ClusterClientTrait};
use crds::{
    ChartMuseum, Core, Exporter, HarborCluster, HarborServerConfiguration, JobService, NotaryServer, NotarySigner,
    Portal, PullSecretBinding, Registry, RegistryController, Trivy,
};
use kube::Resource;
use regex_cache::RegexCache;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const CONVERT_PATH: &str = "/convert";

/// In-flight reviews get this long to finish on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The review envelope was malformed
    #[error("invalid review: {0}")]
    InvalidReview(String),

    /// Listing peers through the cluster client failed
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterClientError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidReview(_) => StatusCode::BAD_REQUEST,
            WebhookError::Cluster(_) | WebhookError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Shared by every webhook handler
pub struct WebhookState {
    pub client: Arc<dyn ClusterClientTrait>,
    pub metrics: Arc<Metrics>,
    pub regexes: RegexCache,
}

impl std::fmt::Debug for WebhookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookState")
            .field("regexes", &self.regexes.len())
            .finish_non_exhaustive()
    }
}

impl WebhookState {
    pub fn new(client: Arc<dyn ClusterClientTrait>, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            metrics,
            regexes: RegexCache::new(),
        }
    }
}

/// Validating path of kind `K`, e.g. `/validate-goharbor-io-v1beta1-harborcluster`.
pub fn admission_path<K: Resource<DynamicType = ()>>() -> String {
    format!(
        "/validate-{}-{}-{}",
        K::group(&()).replace('.', "-"),
        K::version(&()),
        K::kind(&()).to_lowercase()
    )
}

pub fn router(state: Arc<WebhookState>) -> Router {
    use validate::component;

    Router::new()
        .route(&admission_path::<HarborCluster>(), post(validate::harbor_cluster))
        .route(&admission_path::<Core>(), post(component::<Core>))
        .route(&admission_path::<Portal>(), post(component::<Portal>))
        .route(&admission_path::<JobService>(), post(component::<JobService>))
        .route(&admission_path::<Registry>(), post(validate::registry))
        .route(&admission_path::<RegistryController>(), post(component::<RegistryController>))
        .route(&admission_path::<ChartMuseum>(), post(component::<ChartMuseum>))
        .route(&admission_path::<Trivy>(), post(component::<Trivy>))
        .route(&admission_path::<NotaryServer>(), post(component::<NotaryServer>))
        .route(&admission_path::<NotarySigner>(), post(component::<NotarySigner>))
        .route(&admission_path::<Exporter>(), post(component::<Exporter>))
        .route(&admission_path::<PullSecretBinding>(), post(validate::pull_secret_binding))
        .route(
            &admission_path::<HarborServerConfiguration>(),
            post(validate::server_configuration),
        )
        .route(CONVERT_PATH, post(convert::convert))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// PEM files the webhook serves with.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Serves the webhooks until `shutdown` fires, over TLS when `tls` is set.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<WebhookState>,
    tls: Option<TlsFiles>,
    shutdown: CancellationToken,
) -> Result<(), ControllerError> {
    let app = router(state);
    let Some(tls) = tls else {
        let listener = TcpListener::bind(addr).await?;
        info!("Webhook server listening on {} (plain HTTP)", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        return Ok(());
    };

    let config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .map_err(|e| ControllerError::Server(format!("loading {}: {}", tls.cert.display(), e)))?;
    let handle = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown.cancelled().await;
            handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
        }
    });

    info!("Webhook server listening on {}", addr);
    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

#[cfg(test)]
mod webhook_test;
