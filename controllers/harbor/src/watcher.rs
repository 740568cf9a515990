//! Kubernetes resource watchers.
//!
//! Every aggregate kind runs in its own `kube_runtime::Controller`. The
//! runtime owns the work queue: a key is never reconciled by two workers at
//! once, and events arriving during a pass are coalesced into one follow-up.
//! All watchers share `watch_aggregate()`, which wires the queue to a
//! `Reconciler`, the configured concurrency, configuration reloads and
//! shutdown.

use crate::config::ConfigStore;
use crate::error::ControllerError;
use crate::health::Registrations;
use crate::reconciler::{Aggregate, Reconciler};
use crds::{
    Certificate, ChartMuseum, Core, Exporter, HarborCluster, Issuer, JobService, NotaryServer, NotarySigner, Portal,
    Registry, RegistryController, Trivy,
};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Events for one key arriving within this window trigger a single pass.
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Requeue delay when the runtime itself reports an error for a key.
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// What every watcher needs besides its reconciler.
#[derive(Clone)]
pub struct WatchContext {
    pub client: Client,
    /// Watch one namespace, or all of them when `None`
    pub namespace: Option<String>,
    pub config: Arc<ConfigStore>,
    pub registrations: Arc<Registrations>,
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for WatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchContext")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl WatchContext {
    pub fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Turns a finished pass into the runtime's next action.
async fn reconcile<A: Aggregate>(object: Arc<A>, reconciler: Arc<Reconciler<A>>) -> Result<Action, ControllerError> {
    let name = object.name_any();
    let namespace = object
        .namespace()
        .ok_or_else(|| ControllerError::Watch(format!("{} {} has no namespace", A::NAME, name)))?;
    debug!(kind = A::NAME, name = %format!("{namespace}/{name}"), "Reconciling");

    let outcome = reconciler.reconcile(&namespace, &name).await;
    Ok(match outcome.requeue {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    })
}

fn error_policy<A: Aggregate>(object: Arc<A>, error: &ControllerError, _reconciler: Arc<Reconciler<A>>) -> Action {
    error!(kind = A::NAME, "Reconciliation error for {}: {}", object.name_any(), error);
    Action::requeue(ERROR_REQUEUE)
}

/// Owned children whose changes wake their owner up.
pub type ChildWatches<A> = fn(Controller<A>, &WatchContext) -> Controller<A>;

/// Runs the controller for aggregate kind `A` until shutdown.
///
/// `children` is applied only when `<kind>-controller-watch-children` is on.
pub async fn watch_aggregate<A>(
    ctx: WatchContext,
    reconciler: Arc<Reconciler<A>>,
    children: ChildWatches<A>,
) -> Result<(), ControllerError>
where
    A: Aggregate + Resource<Scope = NamespaceResourceScope>,
{
    let config = ctx.config.snapshot();
    let concurrency = u16::try_from(config.max_reconcile(A::NAME)).unwrap_or(u16::MAX);
    info!("Starting {} watcher (concurrency {})", A::NAME, concurrency);

    let mut controller = Controller::new(ctx.api::<A>(), watcher::Config::default()).with_config(
        ControllerConfig::default()
            .debounce(DEBOUNCE)
            .concurrency(concurrency),
    );
    if config.watch_children(A::NAME) {
        controller = children(controller, &ctx);
    }

    // A reloaded configuration may change classes, images or templates.
    let reloads = futures::stream::unfold(ctx.config.subscribe(), |mut changes| async move {
        changes.changed().await.ok().map(|_| ((), changes))
    });

    ctx.registrations.register(A::NAME);
    controller
        .reconcile_all_on(reloads)
        .graceful_shutdown_on(ctx.shutdown.clone().cancelled_owned())
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((object, _)) => debug!(kind = A::NAME, "Reconciled {}", object.name),
                Err(e) => error!(kind = A::NAME, "Controller error: {}", e),
            }
        })
        .await;

    info!("{} watcher stopped", A::NAME);
    Ok(())
}

/// Children every component reconciler writes.
pub fn component_children<A: Aggregate>(controller: Controller<A>, ctx: &WatchContext) -> Controller<A> {
    controller
        .owns(ctx.api::<Deployment>(), watcher::Config::default())
        .owns(ctx.api::<Service>(), watcher::Config::default())
        .owns(ctx.api::<ConfigMap>(), watcher::Config::default())
        .owns(ctx.api::<Secret>(), watcher::Config::default())
        .owns(ctx.api::<NetworkPolicy>(), watcher::Config::default())
        .owns(ctx.api::<Certificate>(), watcher::Config::default())
}

/// A cluster owns its component resources plus shared secrets and certificates.
pub fn cluster_children(controller: Controller<HarborCluster>, ctx: &WatchContext) -> Controller<HarborCluster> {
    controller
        .owns(ctx.api::<Portal>(), watcher::Config::default())
        .owns(ctx.api::<Core>(), watcher::Config::default())
        .owns(ctx.api::<JobService>(), watcher::Config::default())
        .owns(ctx.api::<Registry>(), watcher::Config::default())
        .owns(ctx.api::<RegistryController>(), watcher::Config::default())
        .owns(ctx.api::<ChartMuseum>(), watcher::Config::default())
        .owns(ctx.api::<Trivy>(), watcher::Config::default())
        .owns(ctx.api::<NotaryServer>(), watcher::Config::default())
        .owns(ctx.api::<NotarySigner>(), watcher::Config::default())
        .owns(ctx.api::<Exporter>(), watcher::Config::default())
        .owns(ctx.api::<Secret>(), watcher::Config::default())
        .owns(ctx.api::<Certificate>(), watcher::Config::default())
        .owns(ctx.api::<Issuer>(), watcher::Config::default())
        .owns(ctx.api::<Ingress>(), watcher::Config::default())
}
