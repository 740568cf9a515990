//! ChartMuseum CRD
//!
//! Helm chart repository backed by the cluster's chart storage.

use super::tls_references;
use crate::common::{CertificateInjection, ComponentSpec, ComponentTls, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::duration::GoDuration;
use crate::field::{FieldError, FieldPath};
use crate::proxy::ProxySpec;
use crate::redis::RedisConnection;
use crate::references::{SecretReference, SecretReferences};
use crate::secret_types::SecretType;
use crate::storage::{ChartStorageDriver, StorageBackend};
use crate::trace::TraceSpec;
use crate::validation::{check_duration, check_http_url};
use crate::{Defaults, Invariants};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "ChartMuseum",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumSpec {
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

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,

    #[serde(default)]
    pub log: ChartMuseumLogSpec,

    #[serde(default)]
    pub authentication: ChartMuseumAuthSpec,

    #[serde(default)]
    pub server: ChartMuseumServerSpec,

    pub chart: ChartMuseumChartSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<ChartMuseumCacheSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumLogSpec {
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumAuthSpec {
    #[serde(default)]
    pub anonymous_get: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<ChartMuseumBasicAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer: Option<ChartMuseumBearerAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumBasicAuth {
    #[serde(default = "default_basic_user")]
    pub username: String,

    /// Secret of type `goharbor.io/single-secret`
    pub password_ref: String,
}

fn default_basic_user() -> String {
    "chart_controller".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumBearerAuth {
    pub realm: String,
    pub service: String,

    /// TLS secret holding the token verification certificate
    pub certificate_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumServerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_allow_origin: Option<String>,

    #[serde(default = "default_zero")]
    pub read_timeout: GoDuration,

    #[serde(default = "default_zero")]
    pub write_timeout: GoDuration,

    /// Bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: i64,
}

fn default_zero() -> GoDuration {
    GoDuration::new("0s")
}

fn default_max_upload_size() -> i64 {
    20 * 1024 * 1024
}

impl Default for ChartMuseumServerSpec {
    fn default() -> Self {
        Self {
            cors_allow_origin: None,
            read_timeout: default_zero(),
            write_timeout: default_zero(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumChartSpec {
    /// Absolute URL charts are served under
    pub url: String,

    #[serde(default = "default_true")]
    pub allow_overwrite: bool,

    #[serde(default)]
    pub semantic_versioning2_only: bool,

    #[serde(default)]
    pub index_limit: i32,

    #[serde(default)]
    pub depth: i32,

    #[serde(default)]
    pub max_storage_objects: i32,

    /// Allowed clock skew between replicas writing to shared storage
    #[serde(default = "default_timestamp_tolerance")]
    pub storage_timestamp_tolerance: GoDuration,

    pub storage: ChartMuseumStorageSpec,

    #[serde(default)]
    pub disable: ChartMuseumDisableSpec,
}

fn default_true() -> bool {
    true
}

fn default_timestamp_tolerance() -> GoDuration {
    GoDuration::new("1s")
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumStorageSpec {
    #[serde(flatten)]
    pub driver: ChartStorageDriver,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumDisableSpec {
    #[serde(default)]
    pub api: bool,

    #[serde(default)]
    pub delete: bool,

    #[serde(default)]
    pub force_overwrite: bool,

    #[serde(default)]
    pub metrics: bool,

    #[serde(default)]
    pub statefiles: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumCacheSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConnection>,
}

impl Defaults for ChartMuseumSpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
    }
}

impl Invariants for ChartMuseumSpec {
    fn invariants(&self) -> Vec<FieldError> {
        let spec = FieldPath::spec();
        let mut errors = Vec::new();
        errors.extend(check_http_url(spec.child("chart").child("url"), &self.chart.url));
        errors.extend(check_duration(spec.child("server").child("readTimeout"), &self.server.read_timeout));
        errors.extend(check_duration(
            spec.child("server").child("writeTimeout"),
            &self.server.write_timeout,
        ));
        errors.extend(check_duration(
            spec.child("chart").child("storageTimestampTolerance"),
            &self.chart.storage_timestamp_tolerance,
        ));
        if self.authentication.basic.is_some() && self.authentication.bearer.is_some() {
            errors.push(FieldError::forbidden(
                spec.child("authentication"),
                "basic and bearer authentication are mutually exclusive",
            ));
        }
        errors
    }
}

impl SecretReferences for ChartMuseumSpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let auth = spec.child("authentication");
        let mut refs = tls_references(&spec, self.tls.as_ref(), &self.certificate_injection);
        if let Some(basic) = &self.authentication.basic {
            refs.push(SecretReference::typed(
                auth.child("basic").child("passwordRef"),
                &basic.password_ref,
                SecretType::SingleSecret,
            ));
        }
        if let Some(bearer) = &self.authentication.bearer {
            refs.push(SecretReference::tls(
                auth.child("bearer").child("certificateRef"),
                &bearer.certificate_ref,
            ));
        }
        if let Some(password) = self
            .cache
            .as_ref()
            .and_then(|c| c.redis.as_ref())
            .and_then(|r| r.password_ref.as_ref())
        {
            refs.push(SecretReference::typed(
                spec.child("cache").child("redis").child("passwordRef"),
                password,
                SecretType::Redis,
            ));
        }
        let backend = match &self.chart.storage.driver {
            ChartStorageDriver::S3(s3) => Some(StorageBackend::S3(s3.clone())),
            ChartStorageDriver::Swift(swift) => Some(StorageBackend::Swift(swift.clone())),
            ChartStorageDriver::Azure(azure) => Some(StorageBackend::Azure(azure.clone())),
            ChartStorageDriver::Gcs(gcs) => Some(StorageBackend::Gcs(gcs.clone())),
            ChartStorageDriver::Oss(oss) => Some(StorageBackend::Oss(oss.clone())),
            ChartStorageDriver::FileSystem(_) => None,
        };
        if let Some(backend) = backend {
            for (field, name) in backend.secret_refs(&spec.child("chart").child("storage")) {
                refs.push(SecretReference::typed(field, name, SecretType::SingleSecret));
            }
        }
        refs
    }
}
