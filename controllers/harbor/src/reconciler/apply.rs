//! Applies a work graph to the cluster.

use super::diff;
use super::readiness::{Observation, observe};
use crate::error::ControllerError;
use crate::graph::{Node, NodeId, Readiness, WorkGraph};
use cluster_client::{ClusterClientTrait, ObjectKey};
use kube::core::DynamicObject;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one node.
#[derive(Debug)]
pub enum NodeState {
    /// Applied (or already up to date) and observed
    Applied(Observation),
    /// Not applied because a dependency is not ready
    Waiting(String),
    /// Applying failed
    Error(ControllerError),
}

#[derive(Debug)]
pub struct NodeOutcome {
    pub key: ObjectKey,
    pub readiness: Readiness,
    pub state: NodeState,
    /// Stored object after the apply
    pub object: Option<DynamicObject>,
}

impl NodeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(&self.state, NodeState::Applied(observation) if observation.is_ready())
    }
}

/// Applies every node in dependency order.
///
/// A node whose dependencies are not ready is left alone this pass. A failing
/// node does not stop the others; only cancellation does.
pub async fn apply_graph(
    client: &dyn ClusterClientTrait,
    graph: &WorkGraph,
    cancel: &CancellationToken,
) -> Result<Vec<NodeOutcome>, ControllerError> {
    let order = graph.sorted()?;
    let mut ready: HashMap<NodeId, bool> = HashMap::with_capacity(order.len());
    let mut outcomes = Vec::with_capacity(order.len());

    for id in order {
        if cancel.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        let node = graph.node(id);
        let blocked = node
            .dependencies
            .iter()
            .find(|dep| !ready.get(dep).copied().unwrap_or(false))
            .map(|dep| graph.node(*dep).key.to_string());

        let outcome = match blocked {
            Some(dependency) => {
                debug!("{} waits for {}", node.key, dependency);
                NodeOutcome {
                    key: node.key.clone(),
                    readiness: node.readiness,
                    state: NodeState::Waiting(format!("waiting for {dependency}")),
                    object: None,
                }
            }
            None => match apply_node(client, node).await {
                Ok(object) => NodeOutcome {
                    key: node.key.clone(),
                    readiness: node.readiness,
                    state: NodeState::Applied(observe(node.readiness, &object)),
                    object: Some(object),
                },
                Err(e) => {
                    warn!("Failed to apply {}: {}", node.key, e);
                    NodeOutcome {
                        key: node.key.clone(),
                        readiness: node.readiness,
                        state: NodeState::Error(e),
                        object: None,
                    }
                }
            },
        };
        ready.insert(id, outcome.is_ready());
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Server-side applies a node unless the stored child is up to date.
///
/// Apply creates a missing child, and removes fields an earlier apply set
/// that the desired object no longer carries.
async fn apply_node(client: &dyn ClusterClientTrait, node: &Node) -> Result<DynamicObject, ControllerError> {
    let existing = client.get(&node.key).await?;
    if let Some(actual) = existing.as_ref() {
        if diff::is_up_to_date(&node.object, actual)? {
            debug!("{} is up to date", node.key);
            return Ok(actual.clone());
        }
    }
    let stored = client.apply(&node.key.resource, &diff::with_applied_hash(&node.object)?).await?;
    if existing.is_some() {
        info!("Updated {}", node.key);
    } else {
        info!("Created {}", node.key);
    }
    Ok(stored)
}
