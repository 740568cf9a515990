//! JobService CRD
//!
//! Harbor's asynchronous job runner (replication, garbage collection, scans).

use super::{LogSpec, RegistryCredentials, tls_references};
use crate::common::{CertificateInjection, ComponentSpec, ComponentTls, LogLevel, MetricsSpec, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::duration::GoDuration;
use crate::field::{FieldError, FieldPath};
use crate::proxy::ProxySpec;
use crate::redis::RedisConnection;
use crate::references::{SecretReference, SecretReferences};
use crate::secret_types::SecretType;
use crate::storage::PersistentVolumeRef;
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
    kind = "JobService",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct JobServiceSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ComponentTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,

    #[serde(default)]
    pub log: LogSpec,

    pub core: JobServiceCoreSpec,

    pub registry: JobServiceRegistrySpec,

    pub token_service: super::UrlSpec,

    /// Secret of type `goharbor.io/single-secret` identifying the job service to core
    pub secret_ref: String,

    pub worker_pool: WorkerPoolSpec,

    #[serde(default)]
    pub job_loggers: JobLoggersSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobServiceCoreSpec {
    pub url: String,

    /// Secret of type `goharbor.io/single-secret` shared with core
    pub secret_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobServiceRegistrySpec {
    pub url: String,
    pub controller_url: String,
    pub credentials: RegistryCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolSpec {
    #[serde(default = "default_workers")]
    pub workers: i32,

    pub redis: RedisConnection,
}

fn default_workers() -> i32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobLoggersSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileLoggerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseLoggerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<StdoutLoggerSpec>,
}

impl JobLoggersSpec {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.database.is_none() && self.stdout.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileLoggerSpec {
    /// Volume holding the log files; `emptyDir` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<PersistentVolumeRef>,

    #[serde(default)]
    pub level: LogLevel,

    /// How long job logs are kept
    #[serde(default = "default_sweeper")]
    pub sweeper: GoDuration,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseLoggerSpec {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default = "default_sweeper")]
    pub sweeper: GoDuration,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StdoutLoggerSpec {
    #[serde(default)]
    pub level: LogLevel,
}

fn default_sweeper() -> GoDuration {
    GoDuration::new("24h")
}

impl Defaults for JobServiceSpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
    }
}

impl Invariants for JobServiceSpec {
    fn invariants(&self) -> Vec<FieldError> {
        let spec = FieldPath::spec();
        let mut errors = Vec::new();
        errors.extend(check_http_url(spec.child("core").child("url"), &self.core.url));
        errors.extend(check_http_url(spec.child("registry").child("url"), &self.registry.url));
        errors.extend(check_http_url(
            spec.child("registry").child("controllerUrl"),
            &self.registry.controller_url,
        ));
        errors.extend(check_http_url(spec.child("tokenService").child("url"), &self.token_service.url));

        let loggers = spec.child("jobLoggers");
        if self.job_loggers.is_empty() {
            errors.push(FieldError::required(
                loggers.clone(),
                "at least one job logger (files, database or stdout) is required",
            ));
        }
        for (i, file) in self.job_loggers.files.iter().enumerate() {
            errors.extend(check_duration(loggers.child("files").index(i).child("sweeper"), &file.sweeper));
        }
        if let Some(database) = &self.job_loggers.database {
            errors.extend(check_duration(loggers.child("database").child("sweeper"), &database.sweeper));
        }
        if self.worker_pool.workers < 1 {
            errors.push(FieldError::invalid(
                spec.child("workerPool").child("workers"),
                "must be at least 1",
            ));
        }
        errors
    }
}

impl SecretReferences for JobServiceSpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let mut refs = tls_references(&spec, self.tls.as_ref(), &self.certificate_injection);
        refs.push(SecretReference::typed(
            spec.child("core").child("secretRef"),
            &self.core.secret_ref,
            SecretType::SingleSecret,
        ));
        refs.push(SecretReference::typed(
            spec.child("secretRef"),
            &self.secret_ref,
            SecretType::SingleSecret,
        ));
        refs.push(SecretReference::typed(
            spec.child("registry").child("credentials").child("passwordRef"),
            &self.registry.credentials.password_ref,
            SecretType::SingleSecret,
        ));
        if let Some(password) = &self.worker_pool.redis.password_ref {
            refs.push(SecretReference::typed(
                spec.child("workerPool").child("redis").child("passwordRef"),
                password,
                SecretType::Redis,
            ));
        }
        refs
    }
}
