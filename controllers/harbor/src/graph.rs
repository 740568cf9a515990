//! Per-pass work graph.
//!
//! A reconciler does not create children directly. It registers each child it
//! wants as a node, together with the nodes that must be ready before it, and
//! the framework applies the nodes in dependency order.
//!
//! Every node is stamped with the pass namespace, a controller owner reference
//! to the aggregate and the aggregate's common labels when it is added, so the
//! builders only describe what is specific to the child.

use cluster_client::{ObjectKey, ResourceType, key_of, to_dynamic};
use crds::{Certificate, Issuer};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use kube::core::DynamicObject;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Errors in graph construction. All of them are bugs in a builder.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("two nodes target {0}")]
    DuplicateKey(String),

    #[error("{node} depends on unknown node #{dependency}")]
    UnknownDependency { node: String, dependency: usize },

    #[error("dependency cycle between {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("cannot encode {kind}: {reason}")]
    Encode { kind: String, reason: String },
}

/// Handle of a node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// How the framework decides that an applied child is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Ready as soon as it exists
    Exists,
    /// Rolled out: observed generation caught up and enough replicas available
    Deployment,
    /// cert-manager reports `Ready=True`
    Certificate,
    /// A Harbor component resource reporting `Ready` for its current generation
    Component,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub key: ObjectKey,
    pub object: DynamicObject,
    pub readiness: Readiness,
    pub dependencies: Vec<NodeId>,
}

/// Children one pass wants to exist, with their ordering constraints.
#[derive(Debug)]
pub struct WorkGraph {
    namespace: String,
    owner: OwnerReference,
    labels: BTreeMap<String, String>,
    nodes: Vec<Node>,
    index: HashMap<ObjectKey, NodeId>,
}

impl WorkGraph {
    pub fn new(namespace: impl Into<String>, owner: OwnerReference, labels: BTreeMap<String, String>) -> Self {
        Self {
            namespace: namespace.into(),
            owner,
            labels,
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Labels every child carries.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    /// Looks up the node targeting `key`.
    pub fn find(&self, key: &ObjectKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    /// Registers a typed child.
    pub fn add<K>(&mut self, object: &K, readiness: Readiness, dependencies: &[NodeId]) -> Result<NodeId, GraphError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let dynamic = to_dynamic(object).map_err(|e| GraphError::Encode {
            kind: K::kind(&()).to_string(),
            reason: e.to_string(),
        })?;
        self.add_object(ResourceType::namespaced::<K>(), dynamic, readiness, dependencies)
    }

    /// Registers an untyped child.
    pub fn add_object(
        &mut self,
        resource: ResourceType,
        mut object: DynamicObject,
        readiness: Readiness,
        dependencies: &[NodeId],
    ) -> Result<NodeId, GraphError> {
        object.metadata.namespace = Some(self.namespace.clone());
        object.metadata.owner_references = Some(vec![self.owner.clone()]);
        let mut labels = self.labels.clone();
        labels.extend(object.metadata.labels.take().unwrap_or_default());
        object.metadata.labels = Some(labels);

        let key = key_of(&resource, &object).map_err(|e| GraphError::Encode {
            kind: resource.kind().to_string(),
            reason: e.to_string(),
        })?;
        if self.index.contains_key(&key) {
            return Err(GraphError::DuplicateKey(key.to_string()));
        }
        let mut deps: Vec<NodeId> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if dep.0 >= self.nodes.len() {
                return Err(GraphError::UnknownDependency {
                    node: key.to_string(),
                    dependency: dep.0,
                });
            }
            if !deps.contains(dep) {
                deps.push(*dep);
            }
        }

        let id = NodeId(self.nodes.len());
        self.index.insert(key.clone(), id);
        self.nodes.push(Node {
            key,
            object,
            readiness,
            dependencies: deps,
        });
        Ok(id)
    }

    pub fn add_config_map(&mut self, object: &ConfigMap, dependencies: &[NodeId]) -> Result<NodeId, GraphError> {
        self.add(object, Readiness::Exists, dependencies)
    }

    pub fn add_secret(&mut self, object: &Secret, dependencies: &[NodeId]) -> Result<NodeId, GraphError> {
        self.add(object, Readiness::Exists, dependencies)
    }

    pub fn add_service(&mut self, object: &Service, dependencies: &[NodeId]) -> Result<NodeId, GraphError> {
        self.add(object, Readiness::Exists, dependencies)
    }

    pub fn add_deployment(&mut self, object: &Deployment, dependencies: &[NodeId]) -> Result<NodeId, GraphError> {
        self.add(object, Readiness::Deployment, dependencies)
    }

    pub fn add_network_policy(
        &mut self,
        object: &NetworkPolicy,
        dependencies: &[NodeId],
    ) -> Result<NodeId, GraphError> {
        self.add(object, Readiness::Exists, dependencies)
    }

    pub fn add_ingress(&mut self, object: &Ingress, dependencies: &[NodeId]) -> Result<NodeId, GraphError> {
        self.add(object, Readiness::Exists, dependencies)
    }

    pub fn add_certificate(&mut self, object: &Certificate, dependencies: &[NodeId]) -> Result<NodeId, GraphError> {
        self.add(object, Readiness::Certificate, dependencies)
    }

    pub fn add_issuer(&mut self, object: &Issuer, dependencies: &[NodeId]) -> Result<NodeId, GraphError> {
        self.add(object, Readiness::Exists, dependencies)
    }

    /// Registers a Harbor component resource owned by a cluster.
    pub fn add_component<K>(&mut self, object: &K, dependencies: &[NodeId]) -> Result<NodeId, GraphError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        self.add(object, Readiness::Component, dependencies)
    }

    /// Adds an edge after the fact: `node` waits for `on`.
    pub fn depend(&mut self, node: NodeId, on: NodeId) -> Result<(), GraphError> {
        for id in [node, on] {
            if id.0 >= self.nodes.len() {
                return Err(GraphError::UnknownDependency {
                    node: format!("#{}", node.0),
                    dependency: id.0,
                });
            }
        }
        let deps = &mut self.nodes[node.0].dependencies;
        if !deps.contains(&on) {
            deps.push(on);
        }
        Ok(())
    }

    /// Topological order, ties broken by insertion order.
    pub fn sorted(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut remaining: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.dependencies {
                dependents[dep.0].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(NodeId(next));
            for &dependent in &dependents[next] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck = remaining
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(i, _)| self.nodes[i].key.to_string())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn graph() -> WorkGraph {
        let owner = OwnerReference {
            api_version: "goharbor.io/v1beta1".to_string(),
            kind: "Portal".to_string(),
            name: "demo-portal".to_string(),
            uid: "1234".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        let labels = BTreeMap::from([("app.kubernetes.io/name".to_string(), "harbor".to_string())]);
        WorkGraph::new("harbor", owner, labels)
    }

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([("extra".to_string(), "yes".to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_nodes_are_stamped() {
        let mut g = graph();
        let id = g.add_config_map(&config_map("a"), &[]).unwrap();
        let node = g.node(id);
        assert_eq!(node.object.metadata.namespace.as_deref(), Some("harbor"));
        assert_eq!(node.object.metadata.owner_references.as_ref().unwrap()[0].uid, "1234");
        let labels = node.object.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["app.kubernetes.io/name"], "harbor");
        assert_eq!(labels["extra"], "yes");
        assert_eq!(node.key.to_string(), "ConfigMap harbor/a");
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let mut g = graph();
        g.add_config_map(&config_map("a"), &[]).unwrap();
        let err = g.add_config_map(&config_map("a"), &[]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateKey(_)));
    }

    #[test]
    fn test_order_follows_dependencies_then_insertion() {
        let mut g = graph();
        let a = g.add_config_map(&config_map("a"), &[]).unwrap();
        let b = g.add_config_map(&config_map("b"), &[]).unwrap();
        let c = g.add_config_map(&config_map("c"), &[]).unwrap();
        g.depend(a, c).unwrap();
        assert_eq!(g.sorted().unwrap(), vec![b, c, a]);
    }

    #[test]
    fn test_cycles_are_reported() {
        let mut g = graph();
        let a = g.add_config_map(&config_map("a"), &[]).unwrap();
        let b = g.add_config_map(&config_map("b"), &[a]).unwrap();
        g.add_config_map(&config_map("free"), &[]).unwrap();
        g.depend(a, b).unwrap();
        match g.sorted().unwrap_err() {
            GraphError::Cycle(keys) => {
                assert_eq!(keys, vec!["ConfigMap harbor/a".to_string(), "ConfigMap harbor/b".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let mut g = graph();
        let err = g.add_config_map(&config_map("a"), &[NodeId(3)]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { dependency: 3, .. }));
    }
}
