//! Cluster reconciler.
//!
//! A `HarborCluster` is reconciled into shared secrets, cert-manager
//! certificates, one resource per enabled component and the Ingresses
//! publishing it. Components are created tier by tier so that each one only
//! starts once everything it talks to is ready:
//!
//! 1. portal
//! 2. registry, registry controller, ChartMuseum, Trivy, notary signer and server
//! 3. job service and core
//! 4. exporter
//!
//! The component resources carry the cluster's version in an annotation and
//! are reconciled by their own controllers.

pub mod certificates;
pub mod ingress;
pub mod secrets;
pub mod specs;
pub mod urls;

#[cfg(test)]
mod cluster_test;

use crate::config::CLUSTER_CONTROLLER;
use crate::error::ControllerError;
use crate::graph::{NodeId, WorkGraph};
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use certificates::add_certificates;
use crds::{ComponentName, HarborCluster, HarborClusterSpec};
use ingress::add_ingresses;
use secrets::add_secrets;
use specs::ComponentSpecs;
use std::collections::BTreeMap;
use tracing::debug;
use urls::derive_urls;

impl Aggregate for HarborCluster {
    const NAME: &'static str = CLUSTER_CONTROLLER;
}

/// Creation order of the components.
pub const TIERS: [&[ComponentName]; 4] = [
    &[ComponentName::Portal],
    &[
        ComponentName::Registry,
        ComponentName::RegistryController,
        ComponentName::ChartMuseum,
        ComponentName::Trivy,
        ComponentName::NotarySigner,
        ComponentName::NotaryServer,
    ],
    &[ComponentName::JobService, ComponentName::Core],
    &[ComponentName::Exporter],
];

/// Reconciles `HarborCluster` resources.
#[derive(Debug, Default)]
pub struct HarborClusterResources;

fn add_component(
    graph: &mut WorkGraph,
    specs: &ComponentSpecs<'_>,
    component: ComponentName,
    dependencies: &[NodeId],
) -> Result<NodeId, ControllerError> {
    let id = match component {
        ComponentName::Portal => graph.add_component(&specs.portal(), dependencies)?,
        ComponentName::Core => graph.add_component(&specs.core()?, dependencies)?,
        ComponentName::JobService => graph.add_component(&specs.jobservice()?, dependencies)?,
        ComponentName::Registry => graph.add_component(&specs.registry()?, dependencies)?,
        ComponentName::RegistryController => graph.add_component(&specs.registryctl(), dependencies)?,
        ComponentName::ChartMuseum => graph.add_component(&specs.chartmuseum()?, dependencies)?,
        ComponentName::Trivy => graph.add_component(&specs.trivy()?, dependencies)?,
        ComponentName::NotaryServer => graph.add_component(&specs.notary_server()?, dependencies)?,
        ComponentName::NotarySigner => graph.add_component(&specs.notary_signer()?, dependencies)?,
        ComponentName::Exporter => graph.add_component(&specs.exporter()?, dependencies)?,
    };
    Ok(id)
}

#[async_trait]
impl ResourceBuilder<HarborCluster> for HarborClusterResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        cluster: &HarborCluster,
        spec: &HarborClusterSpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let name = cluster.metadata.name.as_deref().unwrap_or_default();
        let (Some(database), Some(redis), Some(storage)) = (&spec.database, &spec.redis, &spec.image_chart_storage)
        else {
            return Err(ControllerError::Render(
                "cluster needs a database, redis and image storage".to_string(),
            ));
        };

        let urls = derive_urls(name, spec);
        let secrets = add_secrets(ctx, graph, name, spec).await?;
        let certificates = add_certificates(graph, name, spec)?;
        let specs = ComponentSpecs {
            cluster: name,
            spec,
            config: &ctx.config,
            database,
            redis,
            storage,
            urls: &urls,
            secrets: &secrets,
            certificates: &certificates,
        };

        let mut nodes: BTreeMap<ComponentName, NodeId> = BTreeMap::new();
        let mut previous_tier: Vec<NodeId> = Vec::new();
        for tier in TIERS {
            ctx.check_cancelled()?;
            let mut current = Vec::new();
            for &component in tier.iter().filter(|c| spec.is_enabled(**c)) {
                let mut dependencies = previous_tier.clone();
                dependencies.extend(&secrets.nodes);
                dependencies.extend(certificates.nodes_for(component));
                let id = add_component(graph, &specs, component, &dependencies)?;
                nodes.insert(component, id);
                current.push(id);
            }
            previous_tier = current;
        }

        // Peers in the same tier that read each other's resources.
        for (component, on) in [
            (ComponentName::RegistryController, ComponentName::Registry),
            (ComponentName::NotaryServer, ComponentName::NotarySigner),
        ] {
            if let (Some(&node), Some(&on)) = (nodes.get(&component), nodes.get(&on)) {
                graph.depend(node, on)?;
            }
        }

        let ingresses = add_ingresses(graph, name, spec, |c| nodes.get(&c).copied())?;
        debug!(
            "Cluster {} deploys {} components and {} ingresses",
            name,
            nodes.len(),
            ingresses.len()
        );
        Ok(())
    }
}
