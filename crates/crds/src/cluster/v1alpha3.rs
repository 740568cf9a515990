//! HarborCluster v1alpha3
//!
//! Older shape kept for objects created before `v1beta1`. It differs from the
//! hub in storage (optional pointer per backend, only filesystem, s3 and
//! swift), database (a single host), Redis (no sentinel) and core (no token
//! certificate override). It has a `priority` field the hub lacks; it lacks
//! tracing, network settings and the exporter.

use super::v1beta1::{
    ChartMuseumComponentSpec, InternalTlsSpec, JobServiceComponentSpec, NotaryComponentSpec,
    RegistryComponentSpec, TrivyComponentSpec, UpdateStrategyType,
};
use crate::common::{ComponentSpec, ImageSourceSpec, LogLevel, MetricsSpec};
use crate::conditions::ComponentStatus;
use crate::database::SslMode;
use crate::expose::ExposeSpec;
use crate::proxy::HarborProxySpec;
use crate::references::IssuerReference;
use crate::storage::{FileSystemStorage, S3Storage, StorageRedirect, SwiftStorage};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "goharbor.io",
    version = "v1alpha3",
    kind = "HarborCluster",
    namespaced,
    status = "ComponentStatus",
    derive = "PartialEq",
    category = "goharbor",
    shortname = "hc"
)]
#[serde(rename_all = "camelCase")]
pub struct HarborClusterSpec {
    #[serde(rename = "externalURL")]
    pub external_url: String,

    pub version: String,

    pub harbor_admin_password_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy_type: Option<UpdateStrategyType>,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_source: Option<ImageSourceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<HarborProxySpec>,

    #[serde(default, rename = "internalTLS")]
    pub internal_tls: InternalTlsSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_ref: Option<String>,

    #[serde(default)]
    pub expose: ExposeSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal: Option<ComponentSpec>,

    #[serde(default)]
    pub core: CoreComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobservice: Option<JobServiceComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registryctl: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chartmuseum: Option<ChartMuseumComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trivy: Option<TrivyComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notary: Option<NotaryComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_chart_storage: Option<ImageChartStorage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisSpec>,

    /// Scheduling priority of the cluster's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_issuer: Option<IssuerReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSpec>,
}

/// One optional field per backend; at most one may be set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageChartStorage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FileSystemStorage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Storage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift: Option<SwiftStorage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<StorageRedirect>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ref: Option<String>,

    #[serde(default)]
    pub ssl_mode: SslMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_ref: Option<String>,
}
