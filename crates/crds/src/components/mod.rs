//! Component resources
//!
//! One namespaced kind per Harbor component. A `HarborCluster` owns one of
//! each enabled component; each component owns its own workload, service,
//! configuration and network policies.

pub mod chartmuseum;
pub mod exporter;
pub mod harbor_core;
pub mod jobservice;
pub mod notary_server;
pub mod notary_signer;
pub mod portal;
pub mod registry;
pub mod registry_controller;
pub mod trivy;

pub use self::chartmuseum::*;
pub use self::exporter::*;
pub use self::harbor_core::*;
pub use self::jobservice::*;
pub use self::notary_server::*;
pub use self::notary_signer::*;
pub use self::portal::*;
pub use self::registry::*;
pub use self::registry_controller::*;
pub use self::trivy::*;

use crate::common::{CertificateInjection, ComponentTls, LogLevel};
use crate::field::FieldPath;
use crate::references::SecretReference;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogSpec {
    #[serde(default)]
    pub level: LogLevel,
}

/// Basic-auth credentials for the registry API.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    pub username: String,

    /// Secret of type `goharbor.io/single-secret`
    pub password_ref: String,
}

/// Secrets every component may mount: its serving certificate and the CA
/// bundles injected into its trust store.
pub(crate) fn tls_references(
    path: &FieldPath,
    tls: Option<&ComponentTls>,
    injection: &CertificateInjection,
) -> Vec<SecretReference> {
    let mut refs = Vec::new();
    if let Some(tls) = tls {
        refs.push(SecretReference::tls(
            path.child("tls").child("certificateRef"),
            &tls.certificate_ref,
        ));
    }
    for (i, name) in injection.certificate_refs.iter().enumerate() {
        refs.push(SecretReference::ca_bundle(
            path.child("certificateRefs").index(i),
            name,
        ));
    }
    refs
}
