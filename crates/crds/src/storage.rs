//! Image and chart storage backends
//!
//! A cluster declares exactly one backend for images and charts. The registry
//! and ChartMuseum each receive a driver derived from it; the registry also
//! accepts an in-memory driver for throwaway deployments.
//!
//! Backends are externally tagged and flattened (`{"s3": {...}}`), which means
//! typed deserialization silently keeps only one of several tags. Admission
//! therefore counts the tags on the raw object first, see
//! [`check_storage_variants`].

use crate::field::{FieldError, FieldPath};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend tags accepted on `HarborCluster`.
pub const CLUSTER_STORAGE_VARIANTS: [&str; 6] = ["filesystem", "s3", "swift", "azure", "gcs", "oss"];

/// Backend tags accepted on `Registry`.
pub const REGISTRY_STORAGE_VARIANTS: [&str; 7] =
    ["filesystem", "inmemory", "s3", "swift", "azure", "gcs", "oss"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageConfigurationError {
    #[error("ErrNoStorageConfiguration: no storage backend configured, expected one of {0}")]
    NoStorageConfiguration(String),

    #[error("Err2StorageConfiguration: only one storage backend may be configured, found {0}")]
    TooManyStorageConfigurations(String),

    #[error("storage configuration must be an object")]
    NotAnObject,
}

impl StorageConfigurationError {
    pub fn field_error(&self, path: FieldPath) -> FieldError {
        match self {
            StorageConfigurationError::NoStorageConfiguration(_) => FieldError::required(path, self.to_string()),
            StorageConfigurationError::TooManyStorageConfigurations(_) => {
                FieldError::too_many(path, self.to_string())
            }
            StorageConfigurationError::NotAnObject => FieldError::invalid(path, self.to_string()),
        }
    }
}

/// Counts the backend tags present (and non-null) on a raw storage object.
///
/// Returns the single tag found.
pub fn check_storage_variants(
    raw: &serde_json::Value,
    allowed: &[&str],
) -> Result<String, StorageConfigurationError> {
    let object = raw.as_object().ok_or(StorageConfigurationError::NotAnObject)?;
    let found: Vec<&str> = allowed
        .iter()
        .copied()
        .filter(|tag| object.get(*tag).is_some_and(|v| !v.is_null()))
        .collect();
    match found.as_slice() {
        [] => Err(StorageConfigurationError::NoStorageConfiguration(allowed.join(", "))),
        [one] => Ok((*one).to_string()),
        many => Err(StorageConfigurationError::TooManyStorageConfigurations(many.join(", "))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeRef {
    pub claim_name: String,

    /// Sub-path inside the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemStorage {
    pub registry_persistent_volume: PersistentVolumeRef,

    /// Defaults to the registry volume under the `chartmuseum` prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_persistent_volume: Option<PersistentVolumeRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct S3Storage {
    pub region: String,
    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// Secret of type `goharbor.io/single-secret` holding the secret key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_endpoint: Option<String>,

    #[serde(default)]
    pub encrypt: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,

    #[serde(default)]
    pub skip_verify: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v4_auth: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwiftStorage {
    pub auth_url: String,
    pub username: String,

    /// Secret of type `goharbor.io/single-secret`
    pub password_ref: String,

    pub container: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_version: Option<String>,

    #[serde(default)]
    pub insecure_skip_verify: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AzureStorage {
    pub account_name: String,

    /// Secret of type `goharbor.io/single-secret`
    pub account_key_ref: String,

    pub container: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GcsStorage {
    pub bucket: String,

    /// Secret of type `goharbor.io/single-secret` holding the service account key
    pub key_data_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OssStorage {
    pub access_key_id: String,

    /// Secret of type `goharbor.io/single-secret`
    pub access_secret_ref: String,

    pub region: String,
    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub internal: bool,

    #[serde(default)]
    pub encrypt: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<String>,
}

/// Backend declared on a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum StorageBackend {
    #[serde(rename = "filesystem")]
    FileSystem(FileSystemStorage),

    #[serde(rename = "s3")]
    S3(S3Storage),

    #[serde(rename = "swift")]
    Swift(SwiftStorage),

    #[serde(rename = "azure")]
    Azure(AzureStorage),

    #[serde(rename = "gcs")]
    Gcs(GcsStorage),

    #[serde(rename = "oss")]
    Oss(OssStorage),
}

impl StorageBackend {
    pub fn variant_name(&self) -> &'static str {
        match self {
            StorageBackend::FileSystem(_) => "filesystem",
            StorageBackend::S3(_) => "s3",
            StorageBackend::Swift(_) => "swift",
            StorageBackend::Azure(_) => "azure",
            StorageBackend::Gcs(_) => "gcs",
            StorageBackend::Oss(_) => "oss",
        }
    }

    /// Filesystem storage lives on a node-local, single-writer volume.
    pub fn is_node_local(&self) -> bool {
        matches!(self, StorageBackend::FileSystem(_))
    }

    /// Secrets holding backend credentials, with the field naming them.
    pub fn secret_refs(&self, path: &FieldPath) -> Vec<(FieldPath, String)> {
        let path = path.child(self.variant_name());
        match self {
            StorageBackend::FileSystem(_) => Vec::new(),
            StorageBackend::S3(s3) => s3
                .secret_key_ref
                .iter()
                .map(|r| (path.child("secretKeyRef"), r.clone()))
                .collect(),
            StorageBackend::Swift(swift) => vec![(path.child("passwordRef"), swift.password_ref.clone())],
            StorageBackend::Azure(azure) => vec![(path.child("accountKeyRef"), azure.account_key_ref.clone())],
            StorageBackend::Gcs(gcs) => vec![(path.child("keyDataRef"), gcs.key_data_ref.clone())],
            StorageBackend::Oss(oss) => vec![(path.child("accessSecretRef"), oss.access_secret_ref.clone())],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageRedirect {
    /// Serve blobs through the registry instead of redirecting to the backend
    #[serde(default)]
    pub disable: bool,
}

/// `spec.imageChartStorage` of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageChartStorage {
    #[serde(flatten)]
    pub backend: StorageBackend,

    #[serde(default)]
    pub redirect: StorageRedirect,
}

impl ImageChartStorage {
    pub fn registry_driver(&self) -> RegistryStorageDriver {
        match &self.backend {
            StorageBackend::FileSystem(fs) => RegistryStorageDriver::FileSystem(FileSystemDriver {
                volume: Some(fs.registry_persistent_volume.clone()),
                max_threads: fs.max_threads,
            }),
            StorageBackend::S3(s3) => RegistryStorageDriver::S3(s3.clone()),
            StorageBackend::Swift(swift) => RegistryStorageDriver::Swift(swift.clone()),
            StorageBackend::Azure(azure) => RegistryStorageDriver::Azure(azure.clone()),
            StorageBackend::Gcs(gcs) => RegistryStorageDriver::Gcs(gcs.clone()),
            StorageBackend::Oss(oss) => RegistryStorageDriver::Oss(oss.clone()),
        }
    }

    pub fn chart_driver(&self) -> ChartStorageDriver {
        match &self.backend {
            StorageBackend::FileSystem(fs) => {
                let volume = fs.chart_persistent_volume.clone().unwrap_or_else(|| PersistentVolumeRef {
                    claim_name: fs.registry_persistent_volume.claim_name.clone(),
                    prefix: Some("chartmuseum".to_string()),
                    read_only: false,
                });
                ChartStorageDriver::FileSystem(FileSystemDriver {
                    volume: Some(volume),
                    max_threads: None,
                })
            }
            StorageBackend::S3(s3) => ChartStorageDriver::S3(s3.clone()),
            StorageBackend::Swift(swift) => ChartStorageDriver::Swift(swift.clone()),
            StorageBackend::Azure(azure) => ChartStorageDriver::Azure(azure.clone()),
            StorageBackend::Gcs(gcs) => ChartStorageDriver::Gcs(gcs.clone()),
            StorageBackend::Oss(oss) => ChartStorageDriver::Oss(oss.clone()),
        }
    }
}

/// Filesystem driver of a single component; `emptyDir` when no volume is given.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemDriver {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<PersistentVolumeRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct InMemoryDriver {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum RegistryStorageDriver {
    #[serde(rename = "filesystem")]
    FileSystem(FileSystemDriver),

    #[serde(rename = "inmemory")]
    InMemory(InMemoryDriver),

    #[serde(rename = "s3")]
    S3(S3Storage),

    #[serde(rename = "swift")]
    Swift(SwiftStorage),

    #[serde(rename = "azure")]
    Azure(AzureStorage),

    #[serde(rename = "gcs")]
    Gcs(GcsStorage),

    #[serde(rename = "oss")]
    Oss(OssStorage),
}

impl RegistryStorageDriver {
    pub fn variant_name(&self) -> &'static str {
        match self {
            RegistryStorageDriver::FileSystem(_) => "filesystem",
            RegistryStorageDriver::InMemory(_) => "inmemory",
            RegistryStorageDriver::S3(_) => "s3",
            RegistryStorageDriver::Swift(_) => "swift",
            RegistryStorageDriver::Azure(_) => "azure",
            RegistryStorageDriver::Gcs(_) => "gcs",
            RegistryStorageDriver::Oss(_) => "oss",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ChartStorageDriver {
    #[serde(rename = "filesystem")]
    FileSystem(FileSystemDriver),

    #[serde(rename = "s3")]
    S3(S3Storage),

    #[serde(rename = "swift")]
    Swift(SwiftStorage),

    #[serde(rename = "azure")]
    Azure(AzureStorage),

    #[serde(rename = "gcs")]
    Gcs(GcsStorage),

    #[serde(rename = "oss")]
    Oss(OssStorage),
}

impl ChartStorageDriver {
    /// Value of ChartMuseum's `STORAGE` setting.
    pub fn storage_name(&self) -> &'static str {
        match self {
            ChartStorageDriver::FileSystem(_) => "local",
            ChartStorageDriver::S3(_) => "amazon",
            ChartStorageDriver::Swift(_) => "openstack",
            ChartStorageDriver::Azure(_) => "microsoft",
            ChartStorageDriver::Gcs(_) => "google",
            ChartStorageDriver::Oss(_) => "alibaba",
        }
    }
}
