//! Portal CRD
//!
//! The static web UI served by nginx.

use super::tls_references;
use crate::common::{CertificateInjection, ComponentSpec, ComponentTls, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::field::{FieldError, FieldPath};
use crate::references::{SecretReference, SecretReferences};
use crate::{Defaults, Invariants};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Portal",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PortalSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ComponentTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,

    /// nginx worker connections
    #[serde(default = "default_max_connections")]
    pub max_connections: i32,
}

fn default_max_connections() -> i32 {
    1024
}

impl Defaults for PortalSpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
    }
}

impl Invariants for PortalSpec {
    fn invariants(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.max_connections < 1 {
            errors.push(FieldError::invalid(
                FieldPath::spec().child("maxConnections"),
                "must be at least 1",
            ));
        }
        errors
    }
}

impl SecretReferences for PortalSpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        tls_references(&FieldPath::spec(), self.tls.as_ref(), &CertificateInjection::default())
    }
}
