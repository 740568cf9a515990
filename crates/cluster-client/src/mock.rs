//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory implementation of `ClusterClientTrait`
//! that behaves enough like an API server for reconciler tests:
//!
//! - creating through `apply` assigns uid, generation and resource version
//! - `apply` merges onto the stored object (JSON merge semantics) and bumps
//!   the generation only when something outside metadata and status changed
//! - `apply` also removes fields the previous apply set and this one omits,
//!   the way server-side apply drops fields a manager stops owning
//! - `delete` cascades to every object owned by the deleted one
//! - writes can be made to fail with a transient error

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterClientError;
use crate::object::{ObjectKey, ResourceType, key_of, to_dynamic};
use kube::Resource;
use kube::core::DynamicObject;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// (apiVersion, kind, namespace, name)
type StoreKey = (String, String, Option<String>, String);

fn store_key(key: &ObjectKey) -> StoreKey {
    (
        key.resource.api_version().to_string(),
        key.resource.kind().to_string(),
        key.namespace.clone(),
        key.name.clone(),
    )
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<StoreKey, DynamicObject>,
    /// Last configuration applied to each object
    applied: BTreeMap<StoreKey, Value>,
    resource_version: u64,
    writes: usize,
    failing_writes: usize,
}

/// Mock ClusterClient for testing
///
/// Clones share the same store.
#[derive(Clone, Debug, Default)]
pub struct MockClusterClient {
    state: Arc<Mutex<State>>,
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Adds a typed object to the store (for test setup).
    ///
    /// Setup does not count as a write.
    pub fn insert<K>(&self, resource: &ResourceType, object: &K) -> DynamicObject
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let mut dynamic = match to_dynamic(object) {
            Ok(dynamic) => dynamic,
            Err(e) => panic!("test object does not serialize: {e}"),
        };
        let key = match key_of(resource, &dynamic) {
            Ok(key) => key,
            Err(e) => panic!("test object has no key: {e}"),
        };
        let mut state = self.state();
        let status = dynamic.data.get("status").cloned();
        stamp_new(&mut state, &mut dynamic);
        if let Some(status) = status {
            dynamic.data["status"] = status;
        }
        state.applied.remove(&store_key(&key));
        state.objects.insert(store_key(&key), dynamic.clone());
        dynamic
    }

    /// Removes an object without cascading, as if deleted out of band.
    pub fn remove(&self, key: &ObjectKey) -> Option<DynamicObject> {
        let mut state = self.state();
        state.applied.remove(&store_key(key));
        state.objects.remove(&store_key(key))
    }

    /// Every stored object of a kind, ordered by namespace and name.
    pub fn objects(&self, resource: &ResourceType) -> Vec<DynamicObject> {
        self.state()
            .objects
            .iter()
            .filter(|((api_version, kind, _, _), _)| {
                api_version == resource.api_version() && kind == resource.kind()
            })
            .map(|(_, object)| object.clone())
            .collect()
    }

    /// Overwrites an object's status, as another controller would.
    pub fn set_status(&self, key: &ObjectKey, status: Value) {
        let mut state = self.state();
        state.resource_version += 1;
        let version = state.resource_version.to_string();
        if let Some(object) = state.objects.get_mut(&store_key(key)) {
            object.data["status"] = status;
            object.metadata.resource_version = Some(version);
        }
    }

    /// Number of successful writes (apply, status patch, delete).
    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    /// Makes the next `count` writes fail with a timeout.
    pub fn fail_next_writes(&self, count: usize) {
        self.state().failing_writes = count;
    }

    fn begin_write(state: &mut State, what: &str) -> Result<(), ClusterClientError> {
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(ClusterClientError::Timeout(format!("injected failure writing {what}")));
        }
        state.writes += 1;
        Ok(())
    }
}

fn stamp_new(state: &mut State, object: &mut DynamicObject) {
    state.resource_version += 1;
    object.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
    object.metadata.generation = Some(1);
    object.metadata.resource_version = Some(state.resource_version.to_string());
    if let Some(data) = object.data.as_object_mut() {
        data.remove("status");
    }
}

/// RFC 7386 merge of `patch` onto `target`.
fn merge(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            if v.is_null() {
                target.remove(k);
            } else {
                merge(target.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        return;
    }
    *target = patch.clone();
}

/// Drops from `target` what `previous` set and `current` no longer sets.
fn prune(target: &mut Value, previous: &Value, current: &Value) {
    let (Some(target), Some(previous)) = (target.as_object_mut(), previous.as_object()) else {
        return;
    };
    for (k, was) in previous {
        match current.get(k) {
            None => {
                target.remove(k);
            }
            Some(now) => {
                if let Some(field) = target.get_mut(k) {
                    prune(field, was, now);
                }
            }
        }
    }
}

/// Everything the generation tracks: the object minus metadata and status.
fn generation_content(object: &DynamicObject) -> Value {
    let mut data = object.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

fn cascade(state: &mut State, uid: &str) {
    let owned: Vec<(StoreKey, Option<String>)> = state
        .objects
        .iter()
        .filter(|(_, object)| {
            object
                .metadata
                .owner_references
                .iter()
                .flatten()
                .any(|owner| owner.uid == uid)
        })
        .map(|(key, object)| (key.clone(), object.metadata.uid.clone()))
        .collect();
    for (key, child_uid) in owned {
        state.objects.remove(&key);
        if let Some(child_uid) = child_uid {
            cascade(state, &child_uid);
        }
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterClientError> {
        Ok(self.state().objects.get(&store_key(key)).cloned())
    }

    async fn list(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterClientError> {
        Ok(self
            .objects(resource)
            .into_iter()
            .filter(|object| namespace.is_none() || object.metadata.namespace.as_deref() == namespace)
            .collect())
    }

    async fn apply(
        &self,
        resource: &ResourceType,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterClientError> {
        let key = key_of(resource, object)?;
        let mut state = self.state();
        Self::begin_write(&mut state, &key.to_string())?;

        let mut patch = serde_json::to_value(object)?;
        if let Some(patch) = patch.as_object_mut() {
            patch.remove("status");
            if let Some(metadata) = patch.get_mut("metadata").and_then(Value::as_object_mut) {
                for server_owned in ["uid", "generation", "resourceVersion", "creationTimestamp"] {
                    metadata.remove(server_owned);
                }
            }
        }

        let Some(existing) = state.objects.get(&store_key(&key)).cloned() else {
            let mut created = object.clone();
            stamp_new(&mut state, &mut created);
            state.applied.insert(store_key(&key), patch);
            state.objects.insert(store_key(&key), created.clone());
            return Ok(created);
        };

        let mut merged = serde_json::to_value(&existing)?;
        if let Some(previous) = state.applied.get(&store_key(&key)) {
            prune(&mut merged, previous, &patch);
        }
        merge(&mut merged, &patch);
        let mut updated: DynamicObject = serde_json::from_value(merged)?;

        state.resource_version += 1;
        updated.metadata.resource_version = Some(state.resource_version.to_string());
        if generation_content(&updated) != generation_content(&existing) {
            updated.metadata.generation = Some(existing.metadata.generation.unwrap_or(0) + 1);
        }
        state.applied.insert(store_key(&key), patch);
        state.objects.insert(store_key(&key), updated.clone());
        Ok(updated)
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: &Value,
    ) -> Result<DynamicObject, ClusterClientError> {
        let mut state = self.state();
        if !state.objects.contains_key(&store_key(key)) {
            return Err(ClusterClientError::NotFound(key.to_string()));
        }
        Self::begin_write(&mut state, &key.to_string())?;
        state.resource_version += 1;
        let version = state.resource_version.to_string();
        let object = state
            .objects
            .get_mut(&store_key(key))
            .ok_or_else(|| ClusterClientError::NotFound(key.to_string()))?;
        object.data["status"] = status.clone();
        object.metadata.resource_version = Some(version);
        Ok(object.clone())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterClientError> {
        let mut state = self.state();
        if !state.objects.contains_key(&store_key(key)) {
            return Ok(());
        }
        Self::begin_write(&mut state, &key.to_string())?;
        state.applied.remove(&store_key(key));
        if let Some(removed) = state.objects.remove(&store_key(key)) {
            if let Some(uid) = removed.metadata.uid {
                cascade(&mut state, &uid);
            }
        }
        Ok(())
    }
}
