//! Main controller implementation.
//!
//! `Controller` owns every long-running task of the operator:
//! - one watcher per aggregate kind (`HarborCluster` and the ten components)
//! - the admission and conversion webhook server
//! - the health and metrics server
//! - the configuration refresh loop
//!
//! The first task to stop, or a termination signal, cancels the shared
//! shutdown token; the rest then drain and the controller returns.

use crate::cluster::HarborClusterResources;
use crate::components::chartmuseum::ChartMuseumResources;
use crate::components::core::CoreResources;
use crate::components::exporter::ExporterResources;
use crate::components::jobservice::JobServiceResources;
use crate::components::notary_server::NotaryServerResources;
use crate::components::notary_signer::NotarySignerResources;
use crate::components::portal::PortalResources;
use crate::components::registry::RegistryResources;
use crate::components::registryctl::RegistryControllerResources;
use crate::components::trivy::TrivyResources;
use crate::config::{ConfigStore, controller_names};
use crate::error::ControllerError;
use crate::health::{self, HealthState, Registrations};
use crate::metrics::Metrics;
use crate::reconciler::status::OPERATOR_NAME;
use crate::reconciler::{Aggregate, Reconciler, ResourceBuilder};
use crate::watcher::{ChildWatches, WatchContext, cluster_children, component_children, watch_aggregate};
use crate::webhook::{self, TlsFiles, WebhookState};
use cluster_client::{ClusterClient, ClusterClientTrait};
use futures::future::select_all;
use k8s_openapi::NamespaceResourceScope;
use kube::{Client, Resource};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often the configuration file is checked for changes.
const CONFIG_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Process-level settings, from the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub namespace: Option<String>,
    pub health_addr: SocketAddr,
    pub webhook_addr: SocketAddr,
    pub tls: Option<TlsFiles>,
}

type Task = (String, JoinHandle<Result<(), ControllerError>>);

/// Main controller for Harbor resource management.
pub struct Controller {
    tasks: Vec<Task>,
    config_refresh: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tasks: Vec<&str> = self.tasks.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("Controller").field("tasks", &tasks).finish_non_exhaustive()
    }
}

impl Controller {
    /// Connects to the API server and starts every task.
    pub async fn new(config: Arc<ConfigStore>, settings: Settings) -> Result<Self, ControllerError> {
        info!("Initializing Harbor operator");

        let kube_client = Client::try_default().await?;
        let client: Arc<dyn ClusterClientTrait> = Arc::new(ClusterClient::new(kube_client.clone(), OPERATOR_NAME));
        let metrics = Arc::new(
            Metrics::default()
                .register()
                .map_err(|e| ControllerError::Server(format!("registering metrics: {e}")))?,
        );
        let registrations = Arc::new(Registrations::new(controller_names()));
        let shutdown = CancellationToken::new();

        let ctx = WatchContext {
            client: kube_client,
            namespace: settings.namespace.clone(),
            config: Arc::clone(&config),
            registrations: Arc::clone(&registrations),
            shutdown: shutdown.clone(),
        };
        let spawner = Spawner {
            ctx,
            client: Arc::clone(&client),
            metrics: Arc::clone(&metrics),
        };

        let mut tasks = vec![
            spawner.spawn(HarborClusterResources, cluster_children),
            spawner.spawn(PortalResources, component_children),
            spawner.spawn(CoreResources, component_children),
            spawner.spawn(JobServiceResources, component_children),
            spawner.spawn(RegistryResources, component_children),
            spawner.spawn(RegistryControllerResources, component_children),
            spawner.spawn(ChartMuseumResources, component_children),
            spawner.spawn(TrivyResources, component_children),
            spawner.spawn(NotaryServerResources, component_children),
            spawner.spawn(NotarySignerResources, component_children),
            spawner.spawn(ExporterResources, component_children),
        ];

        let health_state = HealthState {
            config: Arc::clone(&config),
            registrations,
            metrics: Arc::clone(&metrics),
        };
        tasks.push((
            "health server".to_string(),
            tokio::spawn(health::serve(settings.health_addr, health_state, shutdown.clone())),
        ));

        let webhook_state = Arc::new(WebhookState::new(client, metrics));
        tasks.push((
            "webhook server".to_string(),
            tokio::spawn(webhook::serve(
                settings.webhook_addr,
                webhook_state,
                settings.tls.clone(),
                shutdown.clone(),
            )),
        ));

        let config_refresh = config.spawn_refresh(CONFIG_REFRESH_INTERVAL, shutdown.clone());
        Ok(Self {
            tasks,
            config_refresh,
            shutdown,
        })
    }

    /// Runs until a termination signal or until any task stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Harbor operator running");
        let Self {
            tasks,
            config_refresh,
            shutdown,
        } = self;
        let (names, mut handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();

        // The task that ended first has been awaited already.
        let mut ended = None;
        tokio::select! {
            () = terminated() => info!("Termination signal received, shutting down"),
            (result, index, _) = select_all(handles.iter_mut()) => {
                let name = &names[index];
                ended = Some((index, match result {
                    Ok(Ok(())) => ControllerError::Watch(format!("{name} stopped unexpectedly")),
                    Ok(Err(e)) => ControllerError::Watch(format!("{name} failed: {e}")),
                    Err(e) => ControllerError::Watch(format!("{name} panicked: {e}")),
                }));
            }
        }
        shutdown.cancel();

        let skip = ended.as_ref().map(|(index, _)| *index);
        for (index, (name, handle)) in names.iter().zip(handles).enumerate() {
            if Some(index) == skip {
                continue;
            }
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{} stopped with an error: {}", name, e),
                Err(e) => warn!("{} did not stop cleanly: {}", name, e),
            }
        }
        if let Err(e) = config_refresh.await {
            warn!("Configuration refresh did not stop cleanly: {}", e);
        }

        match ended {
            Some((_, e)) => {
                error!("{}", e);
                Err(e)
            }
            None => {
                info!("Harbor operator stopped");
                Ok(())
            }
        }
    }
}

/// Builds and spawns one watcher per aggregate kind.
struct Spawner {
    ctx: WatchContext,
    client: Arc<dyn ClusterClientTrait>,
    metrics: Arc<Metrics>,
}

impl Spawner {
    fn spawn<A, B>(&self, builder: B, children: ChildWatches<A>) -> Task
    where
        A: Aggregate + Resource<Scope = NamespaceResourceScope>,
        B: ResourceBuilder<A> + 'static,
    {
        let reconciler = Reconciler::new(Arc::clone(&self.client), Arc::clone(&self.ctx.config), Arc::new(builder))
            .with_metrics(Arc::clone(&self.metrics))
            .with_cancellation(self.ctx.shutdown.child_token());
        let ctx = self.ctx.clone();
        (
            format!("{} watcher", A::NAME),
            tokio::spawn(async move { watch_aggregate(ctx, Arc::new(reconciler), children).await }),
        )
    }
}

/// Resolves on SIGINT, or SIGTERM where there is one.
async fn terminated() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
