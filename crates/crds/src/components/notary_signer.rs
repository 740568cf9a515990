//! NotarySigner CRD
//!
//! Holds the private signing keys; only reachable from the notary server.

use super::LogSpec;
use super::notary_server::default_true;
use crate::common::{CertificateInjection, ComponentSpec, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::database::PostgresConnection;
use crate::field::{FieldError, FieldPath};
use crate::references::{SecretReference, SecretReferences};
use crate::secret_types::SecretType;
use crate::{Defaults, Invariants};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "NotarySigner",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NotarySignerSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,

    #[serde(default)]
    pub logging: LogSpec,

    #[serde(default = "default_true")]
    pub migration_enabled: bool,

    /// TLS secret the gRPC endpoint is served with
    pub certificate_ref: String,

    pub storage: NotarySignerStorageSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotarySignerStorageSpec {
    pub postgres: PostgresConnection,

    /// Secret of type `goharbor.io/notary-signer-aliases`
    pub alias_secret_ref: String,
}

impl Defaults for NotarySignerSpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
    }
}

impl Invariants for NotarySignerSpec {
    fn invariants(&self) -> Vec<FieldError> {
        let spec = FieldPath::spec();
        let mut errors = Vec::new();
        if self.certificate_ref.is_empty() {
            errors.push(FieldError::required(
                spec.child("certificateRef"),
                "the signer always serves TLS",
            ));
        }
        if self.storage.alias_secret_ref.is_empty() {
            errors.push(FieldError::required(
                spec.child("storage").child("aliasSecretRef"),
                "a secret holding the default alias passphrase is required",
            ));
        }
        if self.storage.postgres.hosts.is_empty() {
            errors.push(FieldError::required(
                spec.child("storage").child("postgres").child("hosts"),
                "at least one database host is required",
            ));
        }
        errors
    }
}

impl SecretReferences for NotarySignerSpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let mut refs = super::tls_references(&spec, None, &self.certificate_injection);
        refs.push(SecretReference::tls(spec.child("certificateRef"), &self.certificate_ref));
        refs.push(SecretReference::typed(
            spec.child("storage").child("aliasSecretRef"),
            &self.storage.alias_secret_ref,
            SecretType::NotarySignerAliases,
        ));
        if let Some(password) = &self.storage.postgres.password_ref {
            refs.push(SecretReference::typed(
                spec.child("storage").child("postgres").child("passwordRef"),
                password,
                SecretType::Postgresql,
            ));
        }
        refs
    }
}
