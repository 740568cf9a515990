//! Trivy CRD
//!
//! Vulnerability scanner adapter. Trivy reads its Redis URLs from a secret
//! because they embed the Redis password.

use super::{LogSpec, tls_references};
use crate::common::{CertificateInjection, ComponentSpec, ComponentTls, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::duration::GoDuration;
use crate::field::{FieldError, FieldPath};
use crate::proxy::ProxySpec;
use crate::redis::RedisConnection;
use crate::references::{SecretReference, SecretReferences};
use crate::secret_types::SecretType;
use crate::storage::PersistentVolumeRef;
use crate::validation::check_duration;
use crate::{Defaults, Invariants};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Trivy",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TrivySpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ComponentTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,

    #[serde(default)]
    pub log: LogSpec,

    pub redis: TrivyRedisSpec,

    #[serde(default)]
    pub server: TrivyServerSpec,

    #[serde(default)]
    pub update: TrivyUpdateSpec,

    #[serde(default)]
    pub storage: TrivyStorageSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrivyRedisSpec {
    #[serde(flatten)]
    pub connection: RedisConnection,

    #[serde(default = "default_store_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub jobs: TrivyRedisJobsSpec,

    #[serde(default)]
    pub pool: TrivyRedisPoolSpec,
}

fn default_store_namespace() -> String {
    "harbor.scanner.trivy:store".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrivyRedisJobsSpec {
    #[serde(default = "default_job_namespace")]
    pub namespace: String,

    #[serde(default = "default_scan_job_ttl")]
    pub scan_job_ttl: GoDuration,
}

fn default_job_namespace() -> String {
    "harbor.scanner.trivy:job-queue".to_string()
}

fn default_scan_job_ttl() -> GoDuration {
    GoDuration::new("1h")
}

impl Default for TrivyRedisJobsSpec {
    fn default() -> Self {
        Self {
            namespace: default_job_namespace(),
            scan_job_ttl: default_scan_job_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrivyRedisPoolSpec {
    #[serde(default = "default_pool_size")]
    pub max_active: i32,

    #[serde(default = "default_pool_size")]
    pub max_idle: i32,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout: GoDuration,

    #[serde(default = "default_pool_io_timeout")]
    pub connection_timeout: GoDuration,

    #[serde(default = "default_pool_io_timeout")]
    pub read_timeout: GoDuration,

    #[serde(default = "default_pool_io_timeout")]
    pub write_timeout: GoDuration,
}

fn default_pool_size() -> i32 {
    5
}

fn default_pool_idle_timeout() -> GoDuration {
    GoDuration::new("5m")
}

fn default_pool_io_timeout() -> GoDuration {
    GoDuration::new("1s")
}

impl Default for TrivyRedisPoolSpec {
    fn default() -> Self {
        Self {
            max_active: default_pool_size(),
            max_idle: default_pool_size(),
            idle_timeout: default_pool_idle_timeout(),
            connection_timeout: default_pool_io_timeout(),
            read_timeout: default_pool_io_timeout(),
            write_timeout: default_pool_io_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrivyServerSpec {
    #[serde(default = "default_read_write_timeout")]
    pub read_timeout: GoDuration,

    #[serde(default = "default_read_write_timeout")]
    pub write_timeout: GoDuration,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: GoDuration,

    /// Timeout of a single scan
    #[serde(default = "default_scan_timeout")]
    pub timeout: GoDuration,

    #[serde(default = "default_vulnerability_types")]
    pub vulnerability_types: Vec<String>,

    #[serde(default = "default_severities")]
    pub severities: Vec<String>,

    #[serde(default)]
    pub ignore_unfixed: bool,

    /// Skip registry certificate verification
    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub offline_scan: bool,

    #[serde(default)]
    pub debug_mode: bool,
}

fn default_read_write_timeout() -> GoDuration {
    GoDuration::new("15s")
}

fn default_idle_timeout() -> GoDuration {
    GoDuration::new("60s")
}

fn default_scan_timeout() -> GoDuration {
    GoDuration::new("5m0s")
}

fn default_vulnerability_types() -> Vec<String> {
    vec!["os".to_string(), "library".to_string()]
}

fn default_severities() -> Vec<String> {
    ["UNKNOWN", "LOW", "MEDIUM", "HIGH", "CRITICAL"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for TrivyServerSpec {
    fn default() -> Self {
        Self {
            read_timeout: default_read_write_timeout(),
            write_timeout: default_read_write_timeout(),
            idle_timeout: default_idle_timeout(),
            timeout: default_scan_timeout(),
            vulnerability_types: default_vulnerability_types(),
            severities: default_severities(),
            ignore_unfixed: false,
            insecure: false,
            offline_scan: false,
            debug_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrivyUpdateSpec {
    /// Do not download vulnerability database updates
    #[serde(default)]
    pub skip: bool,

    /// Secret of type `goharbor.io/github` used to raise the GitHub rate limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrivyStorageSpec {
    /// Vulnerability database cache; `emptyDir` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<PersistentVolumeRef>,

    /// Scan reports; `emptyDir` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports: Option<PersistentVolumeRef>,
}

impl Defaults for TrivySpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
    }
}

impl Invariants for TrivySpec {
    fn invariants(&self) -> Vec<FieldError> {
        let spec = FieldPath::spec();
        let server = spec.child("server");
        let pool = spec.child("redis").child("pool");
        let mut errors = Vec::new();
        errors.extend(check_duration(server.child("readTimeout"), &self.server.read_timeout));
        errors.extend(check_duration(server.child("writeTimeout"), &self.server.write_timeout));
        errors.extend(check_duration(server.child("idleTimeout"), &self.server.idle_timeout));
        errors.extend(check_duration(server.child("timeout"), &self.server.timeout));
        errors.extend(check_duration(
            spec.child("redis").child("jobs").child("scanJobTtl"),
            &self.redis.jobs.scan_job_ttl,
        ));
        errors.extend(check_duration(pool.child("idleTimeout"), &self.redis.pool.idle_timeout));
        errors.extend(check_duration(
            pool.child("connectionTimeout"),
            &self.redis.pool.connection_timeout,
        ));
        errors.extend(check_duration(pool.child("readTimeout"), &self.redis.pool.read_timeout));
        errors.extend(check_duration(pool.child("writeTimeout"), &self.redis.pool.write_timeout));
        if self.server.vulnerability_types.is_empty() {
            errors.push(FieldError::required(
                server.child("vulnerabilityTypes"),
                "at least one vulnerability type is required",
            ));
        }
        errors
    }
}

impl SecretReferences for TrivySpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let mut refs = tls_references(&spec, self.tls.as_ref(), &self.certificate_injection);
        if let Some(password) = &self.redis.connection.password_ref {
            refs.push(SecretReference::typed(
                spec.child("redis").child("passwordRef"),
                password,
                SecretType::Redis,
            ));
        }
        if let Some(token) = &self.update.github_token_ref {
            refs.push(SecretReference::typed(
                spec.child("update").child("githubTokenRef"),
                token,
                SecretType::Github,
            ));
        }
        refs
    }
}
