//! Exporter CRD
//!
//! Prometheus exporter for Harbor's own metrics.

use super::{LogSpec, tls_references};
use crate::common::{CertificateInjection, ComponentSpec, ComponentTls, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::database::PostgresConnection;
use crate::field::{FieldError, FieldPath};
use crate::references::{SecretReference, SecretReferences};
use crate::secret_types::SecretType;
use crate::validation::check_http_url;
use crate::{Defaults, Invariants};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Exporter",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExporterSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ComponentTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,

    #[serde(default)]
    pub log: LogSpec,

    pub core: super::UrlSpec,

    pub database: ExporterDatabaseSpec,

    #[serde(default)]
    pub cache: ExporterCacheSpec,

    #[serde(default = "default_port")]
    pub port: i32,

    #[serde(default = "default_path")]
    pub path: String,
}

fn default_port() -> i32 {
    8001
}

fn default_path() -> String {
    "/metrics".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExporterDatabaseSpec {
    #[serde(flatten)]
    pub connection: PostgresConnection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle_connections: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_open_connections: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExporterCacheSpec {
    /// Seconds collected values are cached
    #[serde(default = "default_cache_duration")]
    pub duration: i64,

    /// Seconds between cache sweeps
    #[serde(default = "default_clean_period")]
    pub clean_period: i64,
}

fn default_cache_duration() -> i64 {
    23
}

fn default_clean_period() -> i64 {
    14400
}

impl Default for ExporterCacheSpec {
    fn default() -> Self {
        Self {
            duration: default_cache_duration(),
            clean_period: default_clean_period(),
        }
    }
}

impl Defaults for ExporterSpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
        if self.database.max_idle_connections.is_none() {
            self.database.max_idle_connections = Some(2);
        }
        if self.database.max_open_connections.is_none() {
            self.database.max_open_connections = Some(10);
        }
    }
}

impl Invariants for ExporterSpec {
    fn invariants(&self) -> Vec<FieldError> {
        let spec = FieldPath::spec();
        let mut errors = Vec::new();
        errors.extend(check_http_url(spec.child("core").child("url"), &self.core.url));
        if !self.path.starts_with('/') {
            errors.push(FieldError::invalid(spec.child("path"), "must start with /"));
        }
        errors
    }
}

impl SecretReferences for ExporterSpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let mut refs = tls_references(&spec, self.tls.as_ref(), &self.certificate_injection);
        if let Some(password) = &self.database.connection.password_ref {
            refs.push(SecretReference::typed(
                spec.child("database").child("passwordRef"),
                password,
                SecretType::Postgresql,
            ));
        }
        refs
    }
}
