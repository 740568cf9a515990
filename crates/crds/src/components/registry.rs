//! Registry CRD
//!
//! The distribution registry serving image layers and manifests.

use super::tls_references;
use crate::common::{CertificateInjection, ComponentSpec, ComponentTls, LogLevel, MetricsSpec, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::field::{FieldError, FieldPath};
use crate::proxy::ProxySpec;
use crate::redis::RedisConnection;
use crate::references::{SecretReference, SecretReferences};
use crate::secret_types::SecretType;
use crate::storage::{RegistryStorageDriver, StorageBackend, StorageRedirect};
use crate::trace::TraceSpec;
use crate::{Defaults, Invariants};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Registry",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
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
    pub log: RegistryLogSpec,

    pub http: RegistryHttpSpec,

    pub authentication: RegistryAuthenticationSpec,

    pub storage: RegistryStorageSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConnection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryLogSpec {
    #[serde(default)]
    pub level: LogLevel,

    /// `text`, `json` or `logstash`
    #[serde(default = "default_formatter")]
    pub formatter: String,
}

fn default_formatter() -> String {
    "text".to_string()
}

impl Default for RegistryLogSpec {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            formatter: default_formatter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryHttpSpec {
    /// Secret of type `goharbor.io/registry`
    pub secret_ref: String,

    #[serde(default)]
    pub relative_urls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryAuthenticationSpec {
    pub htpasswd: HtpasswdSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HtpasswdSpec {
    #[serde(default = "default_realm")]
    pub realm: String,

    /// Secret of type `goharbor.io/htpasswd`
    pub secret_ref: String,
}

fn default_realm() -> String {
    "harbor-registry-basic-realm".to_string()
}

impl Default for HtpasswdSpec {
    fn default() -> Self {
        Self {
            realm: default_realm(),
            secret_ref: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlobDescriptorCache {
    Redis,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStorageCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blobdescriptor: Option<BlobDescriptorCache>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStorageSpec {
    #[serde(flatten)]
    pub driver: RegistryStorageDriver,

    #[serde(default)]
    pub cache: RegistryStorageCache,

    #[serde(default)]
    pub redirect: StorageRedirect,

    /// Allow deleting blobs and manifests through the API
    #[serde(default = "default_true")]
    pub delete_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Defaults for RegistrySpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
        if self.storage.cache.blobdescriptor.is_none() {
            self.storage.cache.blobdescriptor = Some(if self.redis.is_some() {
                BlobDescriptorCache::Redis
            } else {
                BlobDescriptorCache::InMemory
            });
        }
    }
}

impl Invariants for RegistrySpec {
    fn invariants(&self) -> Vec<FieldError> {
        let spec = FieldPath::spec();
        let mut errors = Vec::new();
        if self.storage.cache.blobdescriptor == Some(BlobDescriptorCache::Redis) && self.redis.is_none() {
            errors.push(FieldError::invalid(
                spec.child("storage").child("cache").child("blobdescriptor"),
                "redis blob descriptor cache requires spec.redis",
            ));
        }
        if self.authentication.htpasswd.secret_ref.is_empty() {
            errors.push(FieldError::required(
                spec.child("authentication").child("htpasswd").child("secretRef"),
                "htpasswd secret is required",
            ));
        }
        errors
    }
}

impl SecretReferences for RegistrySpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let mut refs = tls_references(&spec, self.tls.as_ref(), &self.certificate_injection);
        refs.push(SecretReference::typed(
            spec.child("http").child("secretRef"),
            &self.http.secret_ref,
            SecretType::RegistryHttp,
        ));
        refs.push(SecretReference::typed(
            spec.child("authentication").child("htpasswd").child("secretRef"),
            &self.authentication.htpasswd.secret_ref,
            SecretType::HtPasswd,
        ));
        if let Some(password) = self.redis.as_ref().and_then(|r| r.password_ref.as_ref()) {
            refs.push(SecretReference::typed(
                spec.child("redis").child("passwordRef"),
                password,
                SecretType::Redis,
            ));
        }
        let backend = match &self.storage.driver {
            RegistryStorageDriver::S3(s3) => Some(StorageBackend::S3(s3.clone())),
            RegistryStorageDriver::Swift(swift) => Some(StorageBackend::Swift(swift.clone())),
            RegistryStorageDriver::Azure(azure) => Some(StorageBackend::Azure(azure.clone())),
            RegistryStorageDriver::Gcs(gcs) => Some(StorageBackend::Gcs(gcs.clone())),
            RegistryStorageDriver::Oss(oss) => Some(StorageBackend::Oss(oss.clone())),
            RegistryStorageDriver::FileSystem(_) | RegistryStorageDriver::InMemory(_) => None,
        };
        if let Some(backend) = backend {
            for (field, name) in backend.secret_refs(&spec.child("storage")) {
                refs.push(SecretReference::typed(field, name, SecretType::SingleSecret));
            }
        }
        refs
    }
}
