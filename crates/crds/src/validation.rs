//! Admission rules
//!
//! Pure functions behind the validating webhook: they take the incoming
//! object (and the stored one on update) and return every violation found.
//! Anything that needs the API server, such as listing other bindings, is
//! passed in by the caller.

use crate::binding::{HarborServerConfiguration, PullSecretBinding};
use crate::cluster::v1beta1::HarborCluster;
use crate::duration::GoDuration;
use crate::field::{FieldError, FieldPath, ValidationErrors};
use crate::storage::{
    CLUSTER_STORAGE_VARIANTS, REGISTRY_STORAGE_VARIANTS, StorageConfigurationError, check_storage_variants,
};
use crate::version::check_upgrade;
use crate::{Defaults, Invariants};
use kube::ResourceExt;
use kube::core::object::HasSpec;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Checks that `value` is an absolute `http` or `https` URL with a host.
pub fn check_http_url(path: FieldPath, value: &str) -> Option<FieldError> {
    match url::Url::parse(value) {
        Ok(url) if !matches!(url.scheme(), "http" | "https") => Some(FieldError::invalid(
            path,
            format!("{value:?} must use the http or https scheme"),
        )),
        Ok(url) if url.host_str().is_none_or(str::is_empty) => {
            Some(FieldError::invalid(path, format!("{value:?} has no host")))
        }
        Ok(_) => None,
        Err(e) => Some(FieldError::invalid(path, format!("{value:?} is not a valid URL: {e}"))),
    }
}

pub fn check_optional_http_url(path: FieldPath, value: Option<&str>) -> Option<FieldError> {
    value.and_then(|v| check_http_url(path, v))
}

pub fn check_duration(path: FieldPath, value: &GoDuration) -> Option<FieldError> {
    value
        .parse()
        .err()
        .map(|e| FieldError::invalid(path, format!("{:?}: {e}", value.as_str())))
}

fn decode<K: DeserializeOwned>(raw: &Value) -> Result<K, ValidationErrors> {
    serde_json::from_value(raw.clone())
        .map_err(|e| ValidationErrors::from(vec![FieldError::invalid(FieldPath::spec(), e.to_string())]))
}

/// Counts storage tags on the raw object at `pointer`.
///
/// A missing block is left to the typed checks.
fn raw_storage_errors(raw: &Value, pointer: &str, path: &FieldPath, allowed: &[&str]) -> Option<FieldError> {
    let storage = raw.pointer(pointer).filter(|v| !v.is_null())?;
    match check_storage_variants(storage, allowed) {
        Ok(_) => None,
        Err(e) => Some(e.field_error(path.clone())),
    }
}

/// Create rules for `HarborCluster`.
pub fn validate_cluster_create(raw: &Value) -> ValidationErrors {
    match cluster_errors(raw) {
        Ok((_, errors)) => errors.into(),
        Err(errors) => errors,
    }
}

/// Update rules for `HarborCluster`: the create rules plus the upgrade ladder.
pub fn validate_cluster_update(old_raw: &Value, new_raw: &Value) -> ValidationErrors {
    let (new, mut errors) = match cluster_errors(new_raw) {
        Ok(result) => result,
        Err(errors) => return errors,
    };
    let old: HarborCluster = match decode(old_raw) {
        Ok(old) => old,
        Err(errors) => return errors,
    };
    if old.spec.version != new.spec.version {
        if let Err(e) = check_upgrade(&old.spec.version, &new.spec.version) {
            errors.push(FieldError::forbidden(FieldPath::spec().child("version"), e.to_string()));
        }
    }
    errors.into()
}

fn cluster_errors(raw: &Value) -> Result<(HarborCluster, Vec<FieldError>), ValidationErrors> {
    let storage_path = FieldPath::spec().child("imageChartStorage");
    let storage_error = raw_storage_errors(raw, "/spec/imageChartStorage", &storage_path, &CLUSTER_STORAGE_VARIANTS);

    let mut cluster: HarborCluster = match decode(raw) {
        Ok(cluster) => cluster,
        Err(ValidationErrors(mut errors)) => {
            if let Some(storage_error) = storage_error {
                errors.insert(0, storage_error);
            }
            return Err(errors.into());
        }
    };
    cluster.spec.apply_defaults();

    let mut errors = cluster.spec.invariants();
    if let Some(storage_error) = storage_error {
        errors.retain(|e| e.field != storage_path);
        errors.insert(0, storage_error);
    }
    Ok((cluster, errors))
}

/// Create and update rules for component kinds: defaults then invariants.
pub fn validate_component<K>(raw: &Value) -> ValidationErrors
where
    K: DeserializeOwned + HasSpec,
    K::Spec: Defaults + Invariants + Clone,
{
    match decode::<K>(raw) {
        Ok(resource) => crate::defaults_for(resource.spec()).invariants().into(),
        Err(errors) => errors,
    }
}

/// `Registry` additionally counts the storage drivers on the raw object.
pub fn validate_registry(raw: &Value) -> ValidationErrors {
    let storage_path = FieldPath::spec().child("storage");
    let checked = match raw.pointer("/spec/storage").filter(|v| !v.is_null()) {
        Some(storage) => check_storage_variants(storage, &REGISTRY_STORAGE_VARIANTS).map(|_| ()),
        None => Err(StorageConfigurationError::NoStorageConfiguration(
            REGISTRY_STORAGE_VARIANTS.join(", "),
        )),
    };
    if let Err(e) = checked {
        return vec![e.field_error(storage_path)].into();
    }
    validate_component::<crate::components::Registry>(raw)
}

/// `harborServerConfig` and `projectName` are fixed once created.
pub fn validate_pull_secret_binding_update(old: &PullSecretBinding, new: &PullSecretBinding) -> ValidationErrors {
    let spec = FieldPath::spec();
    let mut errors = Vec::new();
    if old.spec.harbor_server_config != new.spec.harbor_server_config {
        errors.push(FieldError::forbidden(
            spec.child("harborServerConfig"),
            format!(
                "field is immutable (was {:?})",
                old.spec.harbor_server_config
            ),
        ));
    }
    if old.spec.project_name != new.spec.project_name {
        errors.push(FieldError::forbidden(
            spec.child("projectName"),
            format!("field is immutable (was {:?})", old.spec.project_name),
        ));
    }
    errors.into()
}

/// Rules for `HarborServerConfiguration`.
///
/// `existing` is every stored configuration; the incoming object itself is
/// skipped by name so updates do not collide with their own stored copy.
pub fn validate_server_configuration<F>(
    new: &HarborServerConfiguration,
    existing: &[HarborServerConfiguration],
    compile: F,
) -> ValidationErrors
where
    F: FnMut(&str) -> Result<(), String>,
{
    let spec = FieldPath::spec();
    let mut errors = Vec::new();
    errors.extend(check_http_url(spec.child("serverURL"), &new.spec.server_url));
    if new.spec.access_credential.access_secret_ref.is_empty() {
        errors.push(FieldError::required(
            spec.child("accessCredential").child("accessSecretRef"),
            "access secret is required",
        ));
    }
    errors.extend(new.spec.rule_errors(compile));

    if new.spec.default {
        let name = new.name_any();
        let mut incumbents: Vec<String> = existing
            .iter()
            .filter(|hsc| hsc.spec.default && hsc.name_any() != name)
            .map(|hsc| hsc.name_any())
            .collect();
        incumbents.sort();
        if let Some(incumbent) = incumbents.first() {
            errors.push(FieldError::duplicate(
                spec.child("default"),
                format!("HarborServerConfiguration {incumbent:?} is already the default"),
            ));
        }
    }
    errors.into()
}
