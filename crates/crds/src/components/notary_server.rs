//! NotaryServer CRD
//!
//! Content-trust server; talks to the signer over mutual TLS.

use super::{LogSpec, tls_references};
use crate::common::{CertificateInjection, ComponentSpec, ComponentTls, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::database::PostgresConnection;
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
    kind = "NotaryServer",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NotaryServerSpec {
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
    pub logging: LogSpec,

    /// Run schema migrations before starting
    #[serde(default = "default_true")]
    pub migration_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<NotaryServerAuthSpec>,

    pub storage: NotaryStorageSpec,

    pub trust_service: NotaryTrustServiceSpec,
}

pub(crate) fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotaryServerAuthSpec {
    pub token: NotaryTokenSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotaryTokenSpec {
    /// Token endpoint of core
    pub realm: String,

    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// TLS secret holding the certificate tokens are signed with
    pub certificate_ref: String,
}

fn default_service() -> String {
    "harbor-notary".to_string()
}

fn default_issuer() -> String {
    "harbor-token-issuer".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotaryStorageSpec {
    pub postgres: PostgresConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotaryTrustServiceSpec {
    pub remote: NotaryRemoteSignerSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotaryRemoteSignerSpec {
    pub host: String,

    #[serde(default = "default_signer_port")]
    pub port: i32,

    #[serde(default = "default_key_algorithm")]
    pub key_algorithm: String,

    /// TLS secret used as client certificate towards the signer
    pub certificate_ref: String,
}

fn default_signer_port() -> i32 {
    7899
}

fn default_key_algorithm() -> String {
    "ecdsa".to_string()
}

impl Default for NotaryRemoteSignerSpec {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_signer_port(),
            key_algorithm: default_key_algorithm(),
            certificate_ref: String::new(),
        }
    }
}

impl Defaults for NotaryServerSpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
    }
}

impl Invariants for NotaryServerSpec {
    fn invariants(&self) -> Vec<FieldError> {
        let spec = FieldPath::spec();
        let mut errors = Vec::new();
        if self.storage.postgres.hosts.is_empty() {
            errors.push(FieldError::required(
                spec.child("storage").child("postgres").child("hosts"),
                "at least one database host is required",
            ));
        }
        if !matches!(self.trust_service.remote.key_algorithm.as_str(), "ecdsa" | "rsa" | "ed25519") {
            errors.push(FieldError::not_supported(
                spec.child("trustService").child("remote").child("keyAlgorithm"),
                format!(
                    "{:?} is not one of ecdsa, rsa, ed25519",
                    self.trust_service.remote.key_algorithm
                ),
            ));
        }
        errors
    }
}

impl SecretReferences for NotaryServerSpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let mut refs = tls_references(&spec, self.tls.as_ref(), &self.certificate_injection);
        if let Some(password) = &self.storage.postgres.password_ref {
            refs.push(SecretReference::typed(
                spec.child("storage").child("postgres").child("passwordRef"),
                password,
                SecretType::Postgresql,
            ));
        }
        refs.push(SecretReference::tls(
            spec.child("trustService").child("remote").child("certificateRef"),
            &self.trust_service.remote.certificate_ref,
        ));
        if let Some(auth) = &self.authentication {
            refs.push(SecretReference::tls(
                spec.child("authentication").child("token").child("certificateRef"),
                &auth.token.certificate_ref,
            ));
        }
        refs
    }
}
