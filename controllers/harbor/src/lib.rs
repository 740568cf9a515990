//! Harbor Operator
//!
//! Reconciles `HarborCluster` resources into the component resources of a
//! Harbor registry (portal, core, job service, registry, registry controller,
//! ChartMuseum, Trivy, notary server and signer, exporter) and each component
//! into its ConfigMaps, Secrets, Deployments, Services and NetworkPolicies.
//!
//! Every kind is reconciled by the same framework (`reconciler`): build a work
//! graph of desired objects, apply it in dependency order, then derive the
//! aggregate's conditions from what the children report. The binary also
//! serves the admission and conversion webhooks (`webhook`) and the health and
//! metrics endpoints (`health`).

pub mod backoff;
pub mod cluster;
pub mod components;
pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
pub mod health;
pub mod metrics;
pub mod reconciler;
pub mod watcher;
pub mod webhook;
