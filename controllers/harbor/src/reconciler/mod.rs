//! Generic reconciliation engine.
//!
//! One `Reconciler<A>` exists per aggregate kind `A` (the cluster and each
//! component). A pass:
//!
//! 1. loads the aggregate; an absent object needs no work, the owner chain
//!    cleans up its children
//! 2. skips objects of another operator class or being deleted
//! 3. defaults and checks the spec, then checks every referenced secret
//! 4. asks the kind's `ResourceBuilder` to fill a `WorkGraph`
//! 5. applies the graph in dependency order and observes each child
//! 6. writes `Ready` / `InProgress` / `Failed` and the child summary to
//!    status, but only when something changed
//! 7. picks a requeue delay from the outcome
//!
//! Errors never leave a pass; they end up in status and in the requeue choice.

pub mod apply;
pub mod diff;
pub mod readiness;
pub mod status;

#[cfg(test)]
mod engine_test;

use crate::backoff::ExponentialBackoff;
use crate::config::{ConfigStore, OperatorConfig};
use crate::error::{ControllerError, ErrorKind};
use crate::graph::WorkGraph;
use crate::metrics::Metrics;
use apply::apply_graph;
use async_trait::async_trait;
use chrono::Utc;
use cluster_client::{ClusterClientTrait, ObjectKey, ResourceType, get_typed};
use crds::references::{ExpectedSecret, SecretReference, SecretReferences};
use crds::secret_types::{check_ca_bundle, check_tls, secret_value};
use crds::{ComponentStatus, Defaults, Invariants, defaults_for};
use k8s_openapi::api::core::v1::Secret;
use kube::Resource;
use kube::core::object::{HasSpec, HasStatus};
use serde::Serialize;
use serde::de::DeserializeOwned;
use status::{Evaluation, Verdict, evaluate, next_status};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Label selecting which operator instance handles an object.
pub const CLASS_LABEL: &str = "goharbor.io/operator-class";

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Delay before re-checking a referential failure.
pub const REFERENTIAL_REQUEUE: Duration = Duration::from_secs(30);

const PROGRESS_MIN: Duration = Duration::from_secs(2);
const PROGRESS_MAX: Duration = Duration::from_secs(30);
const TRANSIENT_MIN: Duration = Duration::from_secs(1);

/// A kind the engine reconciles.
pub trait Aggregate:
    Resource<DynamicType = ()>
    + HasSpec<Spec: Defaults + Invariants + SecretReferences + Clone + Send + Sync>
    + HasStatus<Status = ComponentStatus>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Controller name in config keys, labels and metrics.
    const NAME: &'static str;
}

/// Fills the work graph of one aggregate.
#[async_trait]
pub trait ResourceBuilder<A: Aggregate>: Send + Sync {
    /// Registers every child `aggregate` needs. `spec` is already defaulted
    /// and checked.
    async fn add_resources(
        &self,
        ctx: &PassContext,
        aggregate: &A,
        spec: &<A as HasSpec>::Spec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError>;
}

/// Everything a builder may use during one pass.
#[derive(Clone)]
pub struct PassContext {
    pub client: Arc<dyn ClusterClientTrait>,
    pub config: Arc<OperatorConfig>,
    pub namespace: String,
    pub cancel: CancellationToken,
}

impl Debug for PassContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassContext")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PassContext {
    pub fn check_cancelled(&self) -> Result<(), ControllerError> {
        if self.cancel.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        Ok(())
    }

    /// Key of an object in the pass namespace.
    pub fn key<K: Resource<DynamicType = ()>>(&self, name: &str) -> ObjectKey {
        ObjectKey::new(ResourceType::namespaced::<K>(), Some(&self.namespace), name)
    }

    /// Reads a namespaced object of the pass namespace.
    pub async fn get<K>(&self, name: &str) -> Result<Option<K>, ControllerError>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.check_cancelled()?;
        Ok(get_typed(self.client.as_ref(), &self.key::<K>(name)).await?)
    }

    pub async fn secret(&self, name: &str) -> Result<Option<Secret>, ControllerError> {
        self.get::<Secret>(name).await
    }

    /// One key of a secret; `None` if the secret or the key is absent.
    pub async fn secret_value(&self, name: &str, key: &str) -> Result<Option<String>, ControllerError> {
        Ok(self.secret(name).await?.and_then(|s| secret_value(&s, key)))
    }

    /// Fails on the first reference whose secret is missing or mis-shaped.
    pub async fn check_references(&self, references: Vec<SecretReference>) -> Result<(), ControllerError> {
        for reference in references {
            let Some(secret) = self.secret(&reference.name).await? else {
                return Err(ControllerError::ReferenceMissing {
                    field: reference.field,
                    name: reference.name,
                });
            };
            let checked = match reference.expected {
                ExpectedSecret::Typed(secret_type) => secret_type.check(&secret),
                ExpectedSecret::Tls => check_tls(&secret),
                ExpectedSecret::CaBundle => check_ca_bundle(&secret),
            };
            checked.map_err(|source| ControllerError::ReferenceTypeMismatch {
                field: reference.field,
                source,
            })?;
        }
        Ok(())
    }
}

/// Labels carried by every child of an aggregate.
pub fn common_labels(controller: &str, instance: &str, class: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (NAME_LABEL.to_string(), "harbor".to_string()),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
        (COMPONENT_LABEL.to_string(), controller.to_string()),
        (MANAGED_BY_LABEL.to_string(), status::OPERATOR_NAME.to_string()),
    ]);
    if !class.is_empty() {
        labels.insert(CLASS_LABEL.to_string(), class.to_string());
    }
    labels
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// The aggregate does not exist
    Absent,
    /// Another class, or being deleted
    Skipped,
    Ready,
    Pending,
    Failed(ErrorKind),
}

impl PassState {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            PassState::Absent => "absent",
            PassState::Skipped => "skipped",
            PassState::Ready => "ready",
            PassState::Pending => "pending",
            PassState::Failed(kind) => kind.as_str(),
        }
    }
}

impl From<Verdict> for PassState {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Ready => PassState::Ready,
            Verdict::Pending => PassState::Pending,
            Verdict::Failed(kind) => PassState::Failed(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    pub state: PassState,
    /// `None` waits for the next change
    pub requeue: Option<Duration>,
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    progress: ExponentialBackoff,
    transient: ExponentialBackoff,
}

impl BackoffState {
    fn new(max_transient: Duration) -> Self {
        Self {
            progress: ExponentialBackoff::new(PROGRESS_MIN, PROGRESS_MAX),
            transient: ExponentialBackoff::new(TRANSIENT_MIN, max_transient),
        }
    }

    fn reset(&mut self) {
        self.transient.reset();
        self.progress.reset();
    }
}

/// Reconciles aggregates of kind `A`.
pub struct Reconciler<A: Aggregate> {
    client: Arc<dyn ClusterClientTrait>,
    config: Arc<ConfigStore>,
    builder: Arc<dyn ResourceBuilder<A>>,
    metrics: Option<Arc<Metrics>>,
    cancel: CancellationToken,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl<A: Aggregate> Debug for Reconciler<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("kind", &A::NAME).finish_non_exhaustive()
    }
}

impl<A: Aggregate> Reconciler<A> {
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        config: Arc<ConfigStore>,
        builder: Arc<dyn ResourceBuilder<A>>,
    ) -> Self {
        Self {
            client,
            config,
            builder,
            metrics: None,
            cancel: CancellationToken::new(),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Passes observe `cancel` between graph nodes and before each read.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Runs one pass for `namespace/name` under the configured deadline.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> PassOutcome {
        let started = Instant::now();
        let config = self.config.snapshot();
        let deadline = config.pass_timeout();
        let ctx = PassContext {
            client: Arc::clone(&self.client),
            config: Arc::clone(&config),
            namespace: namespace.to_string(),
            cancel: self.cancel.child_token(),
        };

        let state = match tokio::time::timeout(deadline, self.pass(&ctx, name)).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                error!(kind = A::NAME, name = %format!("{namespace}/{name}"), "Reconciliation failed: {}", e);
                PassState::Failed(e.kind())
            }
            Err(_) => {
                ctx.cancel.cancel();
                let e = ControllerError::Timeout(deadline);
                warn!(kind = A::NAME, name = %format!("{namespace}/{name}"), "{}", e);
                PassState::Failed(e.kind())
            }
        };

        let requeue = self.requeue_after(&format!("{namespace}/{name}"), state, config.max_requeue_backoff());
        if let Some(metrics) = &self.metrics {
            metrics.observe_reconcile(A::NAME, state.as_str(), started.elapsed());
        }
        debug!(
            kind = A::NAME,
            name = %format!("{namespace}/{name}"),
            "Pass finished: {} (requeue {:?})",
            state.as_str(),
            requeue
        );
        PassOutcome { state, requeue }
    }

    fn aggregate_key(namespace: &str, name: &str) -> ObjectKey {
        ObjectKey::new(ResourceType::namespaced::<A>(), Some(namespace), name)
    }

    async fn pass(&self, ctx: &PassContext, name: &str) -> Result<PassState, ControllerError> {
        ctx.check_cancelled()?;
        let key = Self::aggregate_key(&ctx.namespace, name);
        let Some(aggregate) = get_typed::<A, _>(self.client.as_ref(), &key).await? else {
            debug!("{} no longer exists", key);
            return Ok(PassState::Absent);
        };

        let class = aggregate
            .meta()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CLASS_LABEL))
            .map_or("", String::as_str);
        if class != ctx.config.class(A::NAME) {
            debug!("{} belongs to operator class {:?}, skipping", key, class);
            return Ok(PassState::Skipped);
        }
        if aggregate.meta().deletion_timestamp.is_some() {
            debug!("{} is being deleted, skipping", key);
            return Ok(PassState::Skipped);
        }

        let evaluation = match self.converge(ctx, &aggregate).await {
            Ok(evaluation) => evaluation,
            Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
            Err(e) => {
                warn!("{} cannot be reconciled: {}", key, e);
                Evaluation::from_error(&e)
            }
        };
        self.write_status(&key, &aggregate, &evaluation).await?;
        Ok(evaluation.verdict.into())
    }

    async fn converge(&self, ctx: &PassContext, aggregate: &A) -> Result<Evaluation, ControllerError> {
        let spec = defaults_for(aggregate.spec());
        let errors = spec.invariants();
        if !errors.is_empty() {
            return Err(ControllerError::InvalidSpec(errors.into()));
        }
        ctx.check_references(spec.secret_references()).await?;

        let owner = aggregate
            .controller_owner_ref(&())
            .ok_or_else(|| ControllerError::Render(format!("{} has no uid yet", A::NAME)))?;
        let name = aggregate.meta().name.clone().unwrap_or_default();
        let labels = common_labels(A::NAME, &name, ctx.config.class(A::NAME));
        let mut graph = WorkGraph::new(ctx.namespace.clone(), owner, labels);
        self.builder.add_resources(ctx, aggregate, &spec, &mut graph).await?;

        let outcomes = apply_graph(self.client.as_ref(), &graph, &ctx.cancel).await?;
        Ok(evaluate(&outcomes))
    }

    async fn write_status(&self, key: &ObjectKey, aggregate: &A, evaluation: &Evaluation) -> Result<(), ControllerError> {
        let previous = aggregate.status();
        let status = next_status(previous, aggregate.meta().generation, evaluation, Utc::now());
        if previous == Some(&status) {
            return Ok(());
        }
        self.client.patch_status(key, &serde_json::to_value(&status)?).await?;
        if previous.map(|p| &p.conditions) != Some(&status.conditions) {
            info!("{} status: {}", key, summary(&status));
        }
        Ok(())
    }

    fn requeue_after(&self, key: &str, state: PassState, max_transient: Duration) -> Option<Duration> {
        let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        match state {
            PassState::Absent => {
                states.remove(key);
                None
            }
            PassState::Skipped => None,
            PassState::Ready => {
                if let Some(backoff) = states.get_mut(key) {
                    backoff.reset();
                }
                None
            }
            PassState::Pending => {
                let backoff = states
                    .entry(key.to_string())
                    .or_insert_with(|| BackoffState::new(max_transient));
                backoff.transient.reset();
                Some(backoff.progress.next_backoff())
            }
            PassState::Failed(ErrorKind::Transient) => {
                let backoff = states
                    .entry(key.to_string())
                    .or_insert_with(|| BackoffState::new(max_transient));
                let delay = backoff.transient.next_backoff();
                debug!("{} failed transiently, retrying in {:?}", key, delay);
                Some(delay)
            }
            PassState::Failed(ErrorKind::Referential) => Some(REFERENTIAL_REQUEUE),
            PassState::Failed(ErrorKind::Validation | ErrorKind::Permanent) => None,
        }
    }
}

fn summary(status: &ComponentStatus) -> String {
    status
        .conditions
        .iter()
        .filter(|c| c.is_true())
        .map(|c| match &c.reason {
            Some(reason) => format!("{:?} ({})", c.type_, reason),
            None => format!("{:?}", c.type_),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
