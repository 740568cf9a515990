//! RegistryController CRD
//!
//! `registryctl`, the sidecar API core uses to drive garbage collection on
//! the registry's storage. It shares the registry's configuration and
//! storage, so it references the `Registry` it serves.

use super::{LogSpec, tls_references};
use crate::common::{CertificateInjection, ComponentSpec, ComponentTls, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::field::{FieldError, FieldPath};
use crate::references::{SecretReference, SecretReferences};
use crate::secret_types::SecretType;
use crate::trace::TraceSpec;
use crate::{Defaults, Invariants};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "RegistryController",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    shortname = "registryctl",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RegistryControllerSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ComponentTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceSpec>,

    #[serde(default)]
    pub log: LogSpec,

    /// Name of the `Registry` in the same namespace
    pub registry_ref: String,

    pub authentication: RegistryControllerAuthenticationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryControllerAuthenticationSpec {
    /// Secret of type `goharbor.io/single-secret` shared with core
    pub core_secret_ref: String,

    /// Secret of type `goharbor.io/single-secret` shared with the job service
    pub jobservice_secret_ref: String,
}

impl Defaults for RegistryControllerSpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
    }
}

impl Invariants for RegistryControllerSpec {
    fn invariants(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.registry_ref.is_empty() {
            errors.push(FieldError::required(
                FieldPath::spec().child("registryRef"),
                "the registry to control is required",
            ));
        }
        errors
    }
}

impl SecretReferences for RegistryControllerSpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let auth = spec.child("authentication");
        let mut refs = tls_references(&spec, self.tls.as_ref(), &self.certificate_injection);
        refs.push(SecretReference::typed(
            auth.child("coreSecretRef"),
            &self.authentication.core_secret_ref,
            SecretType::SingleSecret,
        ));
        refs.push(SecretReference::typed(
            auth.child("jobserviceSecretRef"),
            &self.authentication.jobservice_secret_ref,
            SecretType::SingleSecret,
        ));
        refs
    }
}
