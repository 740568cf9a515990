//! ClusterClient trait for mocking
//!
//! This trait abstracts the API server so reconcilers and the webhook can be
//! unit tested against `MockClusterClient`.

use crate::error::ClusterClientError;
use crate::object::{ObjectKey, ResourceType, from_dynamic};
use kube::core::DynamicObject;
use serde::de::DeserializeOwned;

/// Trait for API server operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Reads one object; `Ok(None)` when it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterClientError>;

    /// Lists objects of a kind, in one namespace or across all of them.
    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterClientError>;

    /// Creates or updates an object to match `object` (server-side apply).
    async fn apply(
        &self,
        resource: &ResourceType,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterClientError>;

    /// Replaces the status subresource.
    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: &serde_json::Value,
    ) -> Result<DynamicObject, ClusterClientError>;

    /// Deletes an object; deleting an absent object succeeds.
    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterClientError>;
}

/// [`ClusterClientTrait::get`] decoded into a typed object.
pub async fn get_typed<K, C>(client: &C, key: &ObjectKey) -> Result<Option<K>, ClusterClientError>
where
    K: DeserializeOwned,
    C: ClusterClientTrait + ?Sized,
{
    client.get(key).await?.map(from_dynamic).transpose()
}

/// [`ClusterClientTrait::list`] decoded into typed objects.
pub async fn list_typed<K, C>(
    client: &C,
    resource: &ResourceType,
    namespace: Option<&str>,
) -> Result<Vec<K>, ClusterClientError>
where
    K: DeserializeOwned,
    C: ClusterClientTrait + ?Sized,
{
    client
        .list(resource, namespace)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}
