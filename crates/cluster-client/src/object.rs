//! Addressing objects of any kind
//!
//! [`ResourceType`] describes a kind (group, version, plural and scope) and
//! [`ObjectKey`] points at one object of that kind.

use crate::error::ClusterClientError;
use kube::Resource;
use kube::core::{ApiResource, DynamicObject};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// A kind the operator reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceType {
    pub api: ApiResource,
    pub namespaced: bool,
}

impl ResourceType {
    /// A namespaced kind known at compile time.
    pub fn namespaced<K: Resource<DynamicType = ()>>() -> Self {
        Self {
            api: ApiResource::erase::<K>(&()),
            namespaced: true,
        }
    }

    /// A cluster-scoped kind known at compile time.
    pub fn cluster<K: Resource<DynamicType = ()>>() -> Self {
        Self {
            api: ApiResource::erase::<K>(&()),
            namespaced: false,
        }
    }

    pub fn kind(&self) -> &str {
        &self.api.kind
    }

    pub fn api_version(&self) -> &str {
        &self.api.api_version
    }
}

/// Identity of a single object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub resource: ResourceType,
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(resource: ResourceType, namespace: Option<&str>, name: impl Into<String>) -> Self {
        let namespace = if resource.namespaced {
            namespace.map(str::to_string)
        } else {
            None
        };
        Self {
            resource,
            namespace,
            name: name.into(),
        }
    }

    /// Key of a sibling object in the same namespace.
    pub fn sibling(&self, resource: ResourceType, name: impl Into<String>) -> Self {
        Self::new(resource, self.namespace.as_deref(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.resource.kind(), ns, self.name),
            None => write!(f, "{} {}", self.resource.kind(), self.name),
        }
    }
}

/// Key of an existing object, read from its metadata.
pub fn key_of(resource: &ResourceType, object: &DynamicObject) -> Result<ObjectKey, ClusterClientError> {
    let name = object
        .metadata
        .name
        .clone()
        .ok_or_else(|| ClusterClientError::InvalidObject(format!("{} without a name", resource.kind())))?;
    Ok(ObjectKey::new(
        resource.clone(),
        object.metadata.namespace.as_deref(),
        name,
    ))
}

/// Converts a typed object into its dynamic form, filling in `apiVersion` and `kind`.
pub fn to_dynamic<K>(object: &K) -> Result<DynamicObject, ClusterClientError>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(object)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), K::api_version(&()).into());
        map.insert("kind".to_string(), K::kind(&()).into());
    }
    Ok(serde_json::from_value(value)?)
}

/// Converts a dynamic object into a typed one.
pub fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> Result<K, ClusterClientError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::api::core::v1::Namespace;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn test_cluster_scoped_keys_drop_namespace() {
        let key = ObjectKey::new(ResourceType::cluster::<Namespace>(), Some("ignored"), "harbor");
        assert_eq!(key.namespace, None);
        assert_eq!(key.to_string(), "Namespace harbor");
    }

    #[test]
    fn test_dynamic_round_trip() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo-core".to_string()),
                namespace: Some("harbor".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("LOG_LEVEL".to_string(), "info".to_string())])),
            ..Default::default()
        };
        let dynamic = to_dynamic(&cm).unwrap();
        assert_eq!(dynamic.types.as_ref().unwrap().kind, "ConfigMap");
        assert_eq!(dynamic.data["data"]["LOG_LEVEL"], "info");

        let key = key_of(&ResourceType::namespaced::<ConfigMap>(), &dynamic).unwrap();
        assert_eq!(key.to_string(), "ConfigMap harbor/demo-core");

        let back: ConfigMap = from_dynamic(dynamic).unwrap();
        assert_eq!(back, cm);
    }
}
