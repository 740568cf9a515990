//! Conversion between stored `HarborCluster` versions
//!
//! Every version converts to and from the hub (`v1beta1`) only. Sub-records
//! with the same shape in both versions are copied as-is; the ones that
//! diverge are translated field by field. A `v1alpha3` object survives a
//! round trip through the hub unchanged: its `priority` field, which the hub
//! lacks, travels in the `goharbor.io/v1alpha3-priority` annotation.

use crate::cluster::{V1ALPHA3_PRIORITY_ANNOTATION, v1alpha3, v1beta1};
use crate::database::{DatabaseSpec, PostgresHost};
use crate::redis::{RedisServer, RedisSpec};
use crate::storage::{ImageChartStorage, StorageBackend};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub const V1ALPHA3_API_VERSION: &str = "goharbor.io/v1alpha3";
pub const V1BETA1_API_VERSION: &str = "goharbor.io/v1beta1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("{union} variant {tag:?} cannot be represented in {target}")]
    UnknownVariant {
        union: &'static str,
        tag: String,
        target: &'static str,
    },

    #[error("{union}: only one variant may be set, found {found}")]
    AmbiguousVariant { union: &'static str, found: String },

    #[error("{0} is required")]
    MissingRequired(&'static str),

    #[error("unsupported apiVersion {0:?}")]
    UnsupportedVersion(String),

    #[error("invalid object: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ConversionError {
    fn from(e: serde_json::Error) -> Self {
        ConversionError::Decode(e.to_string())
    }
}

/// Converts a `v1alpha3` cluster to the hub version.
pub fn to_hub(src: &v1alpha3::HarborCluster) -> Result<v1beta1::HarborCluster, ConversionError> {
    let mut metadata = src.metadata.clone();
    if let Some(priority) = src.spec.priority {
        metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(V1ALPHA3_PRIORITY_ANNOTATION.to_string(), priority.to_string());
    }

    let s = &src.spec;
    let spec = v1beta1::HarborClusterSpec {
        external_url: s.external_url.clone(),
        version: s.version.clone(),
        harbor_admin_password_ref: s.harbor_admin_password_ref.clone(),
        update_strategy_type: s.update_strategy_type,
        log_level: s.log_level,
        image_source: s.image_source.clone(),
        proxy: s.proxy.clone(),
        trace: None,
        network: None,
        internal_tls: s.internal_tls.clone(),
        encryption_key_ref: s.encryption_key_ref.clone(),
        expose: s.expose.clone(),
        portal: s.portal.clone(),
        core: v1beta1::CoreComponentSpec {
            component: s.core.component.clone(),
            token_issuer: s.core.token_issuer.clone(),
            token_certificate_ref: None,
            metrics: s.core.metrics.clone(),
        },
        jobservice: s.jobservice.clone(),
        registry: s.registry.clone(),
        registryctl: s.registryctl.clone(),
        chartmuseum: s.chartmuseum.clone(),
        trivy: s.trivy.clone(),
        notary: s.notary.clone(),
        exporter: None,
        image_chart_storage: s.image_chart_storage.as_ref().map(storage_to_hub).transpose()?.flatten(),
        database: s.database.as_ref().map(database_to_hub),
        redis: s.redis.as_ref().map(redis_to_hub),
    };

    Ok(v1beta1::HarborCluster {
        metadata,
        spec,
        status: src.status.clone(),
    })
}

/// Converts a hub cluster to `v1alpha3`.
///
/// Hub-only optional fields (tracing, network, exporter, database prefix and
/// parameters, extra database hosts, redis sentinel master set, token
/// certificate override) are dropped.
pub fn from_hub(hub: &v1beta1::HarborCluster) -> Result<v1alpha3::HarborCluster, ConversionError> {
    let mut metadata = hub.metadata.clone();
    let mut priority = None;
    if let Some(annotations) = metadata.annotations.as_mut() {
        if let Some(raw) = annotations.remove(V1ALPHA3_PRIORITY_ANNOTATION) {
            match raw.parse::<i32>() {
                Ok(value) => priority = Some(value),
                Err(e) => warn!(
                    "Ignoring annotation {}={:?} on {}: {}",
                    V1ALPHA3_PRIORITY_ANNOTATION,
                    raw,
                    metadata.name.as_deref().unwrap_or_default(),
                    e
                ),
            }
        }
        if annotations.is_empty() {
            metadata.annotations = None;
        }
    }

    let s = &hub.spec;
    let spec = v1alpha3::HarborClusterSpec {
        external_url: s.external_url.clone(),
        version: s.version.clone(),
        harbor_admin_password_ref: s.harbor_admin_password_ref.clone(),
        update_strategy_type: s.update_strategy_type,
        log_level: s.log_level,
        image_source: s.image_source.clone(),
        proxy: s.proxy.clone(),
        internal_tls: s.internal_tls.clone(),
        encryption_key_ref: s.encryption_key_ref.clone(),
        expose: s.expose.clone(),
        portal: s.portal.clone(),
        core: v1alpha3::CoreComponentSpec {
            component: s.core.component.clone(),
            token_issuer: s.core.token_issuer.clone(),
            metrics: s.core.metrics.clone(),
        },
        jobservice: s.jobservice.clone(),
        registry: s.registry.clone(),
        registryctl: s.registryctl.clone(),
        chartmuseum: s.chartmuseum.clone(),
        trivy: s.trivy.clone(),
        notary: s.notary.clone(),
        image_chart_storage: s.image_chart_storage.as_ref().map(storage_from_hub).transpose()?,
        database: s.database.as_ref().map(database_from_hub).transpose()?,
        redis: s.redis.as_ref().map(redis_from_hub),
        priority,
    };

    Ok(v1alpha3::HarborCluster {
        metadata,
        spec,
        status: hub.status.clone(),
    })
}

fn storage_to_hub(src: &v1alpha3::ImageChartStorage) -> Result<Option<ImageChartStorage>, ConversionError> {
    let mut backends = Vec::new();
    if let Some(fs) = &src.filesystem {
        backends.push(StorageBackend::FileSystem(fs.clone()));
    }
    if let Some(s3) = &src.s3 {
        backends.push(StorageBackend::S3(s3.clone()));
    }
    if let Some(swift) = &src.swift {
        backends.push(StorageBackend::Swift(swift.clone()));
    }
    if backends.len() > 1 {
        return Err(ConversionError::AmbiguousVariant {
            union: "imageChartStorage",
            found: backends
                .iter()
                .map(StorageBackend::variant_name)
                .collect::<Vec<_>>()
                .join(", "),
        });
    }
    Ok(backends.pop().map(|backend| ImageChartStorage {
        backend,
        redirect: src.redirect.clone().unwrap_or_default(),
    }))
}

fn storage_from_hub(hub: &ImageChartStorage) -> Result<v1alpha3::ImageChartStorage, ConversionError> {
    let mut dst = v1alpha3::ImageChartStorage {
        redirect: hub.redirect.disable.then(|| hub.redirect.clone()),
        ..Default::default()
    };
    match &hub.backend {
        StorageBackend::FileSystem(fs) => dst.filesystem = Some(fs.clone()),
        StorageBackend::S3(s3) => dst.s3 = Some(s3.clone()),
        StorageBackend::Swift(swift) => dst.swift = Some(swift.clone()),
        other => {
            return Err(ConversionError::UnknownVariant {
                union: "imageChartStorage",
                tag: other.variant_name().to_string(),
                target: V1ALPHA3_API_VERSION,
            });
        }
    }
    Ok(dst)
}

fn database_to_hub(src: &v1alpha3::DatabaseSpec) -> DatabaseSpec {
    DatabaseSpec {
        hosts: vec![PostgresHost {
            host: src.host.clone(),
            port: src.port,
        }],
        username: src.username.clone(),
        password_ref: src.password_ref.clone(),
        ssl_mode: src.ssl_mode,
        parameters: Default::default(),
        prefix: None,
    }
}

fn database_from_hub(hub: &DatabaseSpec) -> Result<v1alpha3::DatabaseSpec, ConversionError> {
    let primary = hub
        .hosts
        .first()
        .ok_or(ConversionError::MissingRequired("spec.database.hosts"))?;
    Ok(v1alpha3::DatabaseSpec {
        host: primary.host.clone(),
        port: primary.port,
        username: hub.username.clone(),
        password_ref: hub.password_ref.clone(),
        ssl_mode: hub.ssl_mode,
    })
}

fn redis_to_hub(src: &v1alpha3::RedisSpec) -> RedisSpec {
    RedisSpec {
        server: RedisServer {
            host: src.host.clone(),
            port: src.port,
            sentinel_master_set: None,
        },
        password_ref: src.password_ref.clone(),
        certificate_ref: src.certificate_ref.clone(),
    }
}

fn redis_from_hub(hub: &RedisSpec) -> v1alpha3::RedisSpec {
    v1alpha3::RedisSpec {
        host: hub.server.host.clone(),
        port: hub.server.port,
        password_ref: hub.password_ref.clone(),
        certificate_ref: hub.certificate_ref.clone(),
    }
}

/// Converts a raw `HarborCluster` object to `desired_api_version`.
pub fn convert_object(object: &Value, desired_api_version: &str) -> Result<Value, ConversionError> {
    let source = object
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or(ConversionError::MissingRequired("apiVersion"))?;
    if source == desired_api_version {
        return Ok(object.clone());
    }

    let hub: v1beta1::HarborCluster = match source {
        V1BETA1_API_VERSION => serde_json::from_value(object.clone())?,
        V1ALPHA3_API_VERSION => to_hub(&serde_json::from_value(object.clone())?)?,
        other => return Err(ConversionError::UnsupportedVersion(other.to_string())),
    };

    let mut converted = match desired_api_version {
        V1BETA1_API_VERSION => serde_json::to_value(&hub)?,
        V1ALPHA3_API_VERSION => serde_json::to_value(from_hub(&hub)?)?,
        other => return Err(ConversionError::UnsupportedVersion(other.to_string())),
    };
    converted["apiVersion"] = Value::String(desired_api_version.to_string());
    converted["kind"] = Value::String("HarborCluster".to_string());
    Ok(converted)
}

/// `apiextensions.k8s.io/v1` ConversionReview envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReview {
    pub api_version: String,
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ConversionRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ConversionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub uid: String,

    #[serde(rename = "desiredAPIVersion")]
    pub desired_api_version: String,

    #[serde(default)]
    pub objects: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResponse {
    pub uid: String,

    #[serde(default)]
    pub converted_objects: Vec<Value>,

    pub result: ConversionResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    /// `Success` or `Failure`
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Answers a conversion review. Any object failing to convert fails the whole review.
pub fn review(request: &ConversionRequest) -> ConversionResponse {
    let converted: Result<Vec<Value>, ConversionError> = request
        .objects
        .iter()
        .map(|object| convert_object(object, &request.desired_api_version))
        .collect();
    match converted {
        Ok(converted_objects) => ConversionResponse {
            uid: request.uid.clone(),
            converted_objects,
            result: ConversionResult {
                status: "Success".to_string(),
                message: None,
            },
        },
        Err(e) => ConversionResponse {
            uid: request.uid.clone(),
            converted_objects: Vec::new(),
            result: ConversionResult {
                status: "Failure".to_string(),
                message: Some(e.to_string()),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ComponentSpec;
    use crate::database::SslMode;
    use crate::expose::{ExposeComponentSpec, ExposeSpec, IngressSpec};
    use crate::storage::{AzureStorage, S3Storage, StorageRedirect};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;

    fn spoke() -> v1alpha3::HarborCluster {
        v1alpha3::HarborCluster {
            metadata: ObjectMeta {
                name: Some("demo".to_string()),
                namespace: Some("harbor".to_string()),
                ..Default::default()
            },
            spec: v1alpha3::HarborClusterSpec {
                external_url: "https://harbor.example.com".to_string(),
                version: "2.3.0".to_string(),
                harbor_admin_password_ref: "admin-pw".to_string(),
                update_strategy_type: None,
                log_level: Default::default(),
                image_source: None,
                proxy: None,
                internal_tls: Default::default(),
                encryption_key_ref: None,
                expose: ExposeSpec {
                    core: ExposeComponentSpec {
                        ingress: Some(IngressSpec {
                            host: "harbor.example.com".to_string(),
                            ..Default::default()
                        }),
                        tls: None,
                    },
                    notary: None,
                },
                portal: Some(ComponentSpec {
                    replicas: Some(2),
                    ..Default::default()
                }),
                core: Default::default(),
                jobservice: None,
                registry: None,
                registryctl: None,
                chartmuseum: None,
                trivy: None,
                notary: None,
                image_chart_storage: Some(v1alpha3::ImageChartStorage {
                    s3: Some(S3Storage {
                        region: "us-east-1".to_string(),
                        bucket: "images".to_string(),
                        ..Default::default()
                    }),
                    redirect: Some(StorageRedirect { disable: true }),
                    ..Default::default()
                }),
                database: Some(v1alpha3::DatabaseSpec {
                    host: "pg".to_string(),
                    port: Some(5432),
                    username: "harbor".to_string(),
                    password_ref: Some("db-pw".to_string()),
                    ssl_mode: SslMode::Require,
                }),
                redis: Some(v1alpha3::RedisSpec {
                    host: "redis".to_string(),
                    port: None,
                    password_ref: None,
                    certificate_ref: None,
                }),
                priority: Some(7),
            },
            status: None,
        }
    }

    #[test]
    fn test_spoke_round_trips_through_hub() {
        let original = spoke();
        let hub = to_hub(&original).unwrap();
        assert_eq!(
            hub.metadata.annotations.as_ref().unwrap()[V1ALPHA3_PRIORITY_ANNOTATION],
            "7"
        );
        assert_eq!(hub.spec.database.as_ref().unwrap().hosts.len(), 1);
        assert_eq!(from_hub(&hub).unwrap(), original);
    }

    #[test]
    fn test_hub_round_trip_keeps_shared_fields() {
        let hub = to_hub(&spoke()).unwrap();
        let again = to_hub(&from_hub(&hub).unwrap()).unwrap();
        assert_eq!(again, hub);
    }

    #[test]
    fn test_sentinel_master_set_is_dropped_for_spoke() {
        let mut hub = to_hub(&spoke()).unwrap();
        if let Some(redis) = hub.spec.redis.as_mut() {
            redis.server.sentinel_master_set = Some("mymaster".to_string());
        }
        let converted = from_hub(&hub).unwrap();
        assert_eq!(converted, spoke());

        let back = to_hub(&converted).unwrap();
        assert_eq!(back.spec.redis.as_ref().unwrap().server.sentinel_master_set, None);
        assert_eq!(back.spec.redis.as_ref().unwrap().server.host, "redis");
        assert_eq!(back.spec.database, hub.spec.database);
    }

    #[test]
    fn test_unparsable_priority_annotation_is_ignored() {
        let mut hub = to_hub(&spoke()).unwrap();
        hub.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(V1ALPHA3_PRIORITY_ANNOTATION.to_string(), "high".to_string());
        let converted = from_hub(&hub).unwrap();
        assert_eq!(converted.spec.priority, None);
        assert!(converted.metadata.annotations.is_none());
        assert_eq!(converted.spec.external_url, "https://harbor.example.com");
    }

    #[test]
    fn test_unknown_storage_variant_is_reported() {
        let mut hub = to_hub(&spoke()).unwrap();
        hub.spec.image_chart_storage = Some(ImageChartStorage {
            backend: StorageBackend::Azure(AzureStorage {
                account_name: "acct".to_string(),
                account_key_ref: "key".to_string(),
                container: "c".to_string(),
                ..Default::default()
            }),
            redirect: Default::default(),
        });
        assert_eq!(
            from_hub(&hub),
            Err(ConversionError::UnknownVariant {
                union: "imageChartStorage",
                tag: "azure".to_string(),
                target: V1ALPHA3_API_VERSION,
            })
        );
    }

    #[test]
    fn test_two_spoke_backends_are_ambiguous() {
        let mut src = spoke();
        if let Some(storage) = src.spec.image_chart_storage.as_mut() {
            storage.swift = Some(Default::default());
        }
        assert!(matches!(to_hub(&src), Err(ConversionError::AmbiguousVariant { .. })));
    }

    #[test]
    fn test_review_converts_raw_objects() {
        let raw = serde_json::to_value(spoke()).unwrap();
        let request = ConversionRequest {
            uid: "uid-1".to_string(),
            desired_api_version: V1BETA1_API_VERSION.to_string(),
            objects: vec![raw],
        };
        let response = review(&request);
        assert_eq!(response.result.status, "Success");
        assert_eq!(response.uid, "uid-1");
        let converted = &response.converted_objects[0];
        assert_eq!(converted["apiVersion"], json!(V1BETA1_API_VERSION));
        assert_eq!(converted["spec"]["database"]["hosts"][0]["host"], json!("pg"));
        assert_eq!(converted["spec"]["imageChartStorage"]["s3"]["bucket"], json!("images"));
    }

    #[test]
    fn test_review_fails_on_unknown_version() {
        let request = ConversionRequest {
            uid: "uid-2".to_string(),
            desired_api_version: "goharbor.io/v2".to_string(),
            objects: vec![serde_json::to_value(spoke()).unwrap()],
        };
        let response = review(&request);
        assert_eq!(response.result.status, "Failure");
        assert!(response.converted_objects.is_empty());
    }
}
