//! Validating admission handlers.
//!
//! Every handler decodes the review, runs the pure rules from `crds` and
//! answers with the field-path keyed error list joined into the denial
//! message. Deletes are always allowed.

use super::{WebhookError, WebhookState, admission_path};
use axum::Json;
use axum::extract::State;
use cluster_client::{ResourceType, from_dynamic, list_typed};
use crds::validation::{
    validate_cluster_create, validate_cluster_update, validate_component, validate_pull_secret_binding_update,
    validate_registry, validate_server_configuration,
};
use crds::{Defaults, HarborCluster, HarborServerConfiguration, Invariants, PullSecretBinding, Registry, ValidationErrors};
use kube::Resource;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::object::HasSpec;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type Review = Json<AdmissionReview<DynamicObject>>;

fn parse(body: AdmissionReview<DynamicObject>) -> Result<AdmissionRequest<DynamicObject>, Review> {
    body.try_into().map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
        error!(error = %e, "Failed to parse admission request");
        Json(AdmissionResponse::invalid(e.to_string()).into_review())
    })
}

fn raw(object: &DynamicObject) -> Result<Value, WebhookError> {
    Ok(serde_json::to_value(object)?)
}

/// Turns a verdict into the review sent back, recording it in the metrics.
fn respond(
    state: &WebhookState,
    path: &str,
    request: &AdmissionRequest<DynamicObject>,
    verdict: Result<ValidationErrors, WebhookError>,
) -> Review {
    let name = request.name.as_str();
    let response = AdmissionResponse::from(request);
    let response = match verdict {
        Ok(errors) if errors.is_empty() => {
            debug!(path, name, operation = ?request.operation, "Admitted");
            response
        }
        Ok(errors) => {
            info!(path, name, operation = ?request.operation, "Denied: {}", errors);
            response.deny(errors.to_string())
        }
        Err(e) => {
            warn!(path, name, "Admission check failed: {}", e);
            response.deny(e.to_string())
        }
    };
    state.metrics.observe_webhook(path, response.allowed);
    Json(response.into_review())
}

/// Object under review and, on update, the stored one. `None` when nothing needs checking.
fn objects(request: &AdmissionRequest<DynamicObject>) -> Option<(&DynamicObject, Option<&DynamicObject>)> {
    match (&request.operation, &request.object) {
        (Operation::Create, Some(object)) => Some((object, None)),
        (Operation::Update, Some(object)) => Some((object, request.old_object.as_ref())),
        _ => None,
    }
}

fn cluster_errors(object: &DynamicObject, old: Option<&DynamicObject>) -> Result<ValidationErrors, WebhookError> {
    let new = raw(object)?;
    Ok(match old {
        Some(old) => validate_cluster_update(&raw(old)?, &new),
        None => validate_cluster_create(&new),
    })
}

fn binding_errors(object: &DynamicObject, old: Option<&DynamicObject>) -> Result<ValidationErrors, WebhookError> {
    let Some(old) = old else {
        return Ok(ValidationErrors::default());
    };
    let old: PullSecretBinding = from_dynamic(old.clone())?;
    let new: PullSecretBinding = from_dynamic(object.clone())?;
    Ok(validate_pull_secret_binding_update(&old, &new))
}

async fn server_configuration_errors(
    state: &WebhookState,
    object: &DynamicObject,
) -> Result<ValidationErrors, WebhookError> {
    let new: HarborServerConfiguration = from_dynamic(object.clone())?;
    // Only a default needs to see its peers.
    let existing = if new.spec.default {
        list_typed::<HarborServerConfiguration, _>(
            state.client.as_ref(),
            &ResourceType::cluster::<HarborServerConfiguration>(),
            None,
        )
        .await?
    } else {
        Vec::new()
    };
    Ok(validate_server_configuration(&new, &existing, |pattern| {
        state.regexes.check(pattern)
    }))
}

pub async fn harbor_cluster(State(state): State<Arc<WebhookState>>, Json(body): Json<AdmissionReview<DynamicObject>>) -> Review {
    let request = match parse(body) {
        Ok(request) => request,
        Err(review) => return review,
    };
    let verdict = match objects(&request) {
        Some((object, old)) => cluster_errors(object, old),
        None => Ok(ValidationErrors::default()),
    };
    respond(&state, &admission_path::<HarborCluster>(), &request, verdict)
}

/// Component kinds share defaults-then-invariants rules.
pub async fn component<K>(State(state): State<Arc<WebhookState>>, Json(body): Json<AdmissionReview<DynamicObject>>) -> Review
where
    K: Resource<DynamicType = ()> + DeserializeOwned + HasSpec,
    K::Spec: Defaults + Invariants + Clone,
{
    let request = match parse(body) {
        Ok(request) => request,
        Err(review) => return review,
    };
    let verdict = match objects(&request) {
        Some((object, _)) => raw(object).map(|raw| validate_component::<K>(&raw)),
        None => Ok(ValidationErrors::default()),
    };
    respond(&state, &admission_path::<K>(), &request, verdict)
}

pub async fn registry(State(state): State<Arc<WebhookState>>, Json(body): Json<AdmissionReview<DynamicObject>>) -> Review {
    let request = match parse(body) {
        Ok(request) => request,
        Err(review) => return review,
    };
    let verdict = match objects(&request) {
        Some((object, _)) => raw(object).map(|raw| validate_registry(&raw)),
        None => Ok(ValidationErrors::default()),
    };
    respond(&state, &admission_path::<Registry>(), &request, verdict)
}

pub async fn pull_secret_binding(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Review {
    let request = match parse(body) {
        Ok(request) => request,
        Err(review) => return review,
    };
    let verdict = match objects(&request) {
        Some((object, old)) => binding_errors(object, old),
        None => Ok(ValidationErrors::default()),
    };
    respond(&state, &admission_path::<PullSecretBinding>(), &request, verdict)
}

/// Rules must compile and at most one configuration may be the default.
pub async fn server_configuration(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Review {
    let request = match parse(body) {
        Ok(request) => request,
        Err(review) => return review,
    };
    let verdict = match objects(&request) {
        Some((object, _)) => server_configuration_errors(&state, object).await,
        None => Ok(ValidationErrors::default()),
    };
    respond(&state, &admission_path::<HarborServerConfiguration>(), &request, verdict)
}
