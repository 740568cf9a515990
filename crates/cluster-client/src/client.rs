//! API server backed client
//!
//! Writes go through server-side apply under a single field manager, so the
//! operator owns exactly the fields it renders and leaves the rest alone.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterClientError;
use crate::object::{ObjectKey, ResourceType, key_of};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::Client;
use tracing::debug;

/// Client for a live API server
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    field_manager: String,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl ClusterClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Connects with the in-cluster or kubeconfig credentials.
    pub async fn try_default(field_manager: impl Into<String>) -> Result<Self, ClusterClientError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, field_manager))
    }

    /// The underlying kube client, for watches.
    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }

    fn api(&self, resource: &ResourceType, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if resource.namespaced => Api::namespaced_with(self.client.clone(), ns, &resource.api),
            _ => Api::all_with(self.client.clone(), &resource.api),
        }
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for ClusterClient {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterClientError> {
        self.api(&key.resource, key.namespace.as_deref())
            .get_opt(&key.name)
            .await
            .map_err(|e| ClusterClientError::from_kube(e, &key.to_string()))
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterClientError> {
        let list = self
            .api(resource, namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterClientError::from_kube(e, resource.kind()))?;
        Ok(list.items)
    }

    async fn apply(
        &self,
        resource: &ResourceType,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterClientError> {
        let key = key_of(resource, object)?;
        debug!(object = %key, "applying");
        let params = PatchParams::apply(&self.field_manager).force();
        self.api(resource, key.namespace.as_deref())
            .patch(&key.name, &params, &Patch::Apply(object))
            .await
            .map_err(|e| ClusterClientError::from_kube(e, &key.to_string()))
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: &serde_json::Value,
    ) -> Result<DynamicObject, ClusterClientError> {
        let patch = serde_json::json!({ "status": status });
        self.api(&key.resource, key.namespace.as_deref())
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterClientError::from_kube(e, &key.to_string()))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterClientError> {
        match self
            .api(&key.resource, key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(ClusterClientError::from_kube(e, &key.to_string())),
        }
    }
}
