//! Attributes shared by every component
//!
//! These blocks are flattened into each component spec and into the
//! per-component sections of `HarborCluster`. They use plain types rather than
//! the core API types so that the generated schemas stay self-contained; the
//! controllers translate them into pod templates.

use crate::duration::GoDuration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum PullPolicy {
    Always,
    IfNotPresent,
    Never,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// `Exists` or `Equal`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// `NoSchedule`, `PreferNoSchedule` or `NoExecute`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Compute resources as quantity strings (`"500m"`, `"1Gi"`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// Deployment and pod template attributes common to all components.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Full image reference; derived from the version when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<PullPolicy>,

    /// Names of pull secrets in the resource's namespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,

    /// Annotations added to the pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

impl ComponentSpec {
    pub fn apply_defaults(&mut self) {
        if self.replicas.is_none() {
            self.replicas = Some(1);
        }
    }

    /// Whether pods of `self` and `other` can land on the same nodes.
    ///
    /// Either side being unconstrained is enough; otherwise selectors and
    /// tolerations must be identical.
    pub fn can_be_co_scheduled_with(&self, other: &ComponentSpec) -> bool {
        let self_free = self.node_selector.is_empty() && self.tolerations.is_empty();
        let other_free = other.node_selector.is_empty() && other.tolerations.is_empty();
        self_free
            || other_free
            || (self.node_selector == other.node_selector && self.tolerations == other.tolerations)
    }
}

/// TLS served by the component.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentTls {
    /// Secret of type `kubernetes.io/tls`
    pub certificate_ref: String,
}

/// CA bundles added to the component's trust store.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInjection {
    /// Secrets whose `ca.crt` is mounted under `/harbor_cust_cert`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificate_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: i32,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_port() -> i32 {
    8001
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum IpFamily {
    IPv4,
    IPv6,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_families: Vec<IpFamily>,
}

impl NetworkSpec {
    /// Address components bind to.
    pub fn bind_address(&self) -> &'static str {
        if self.ip_families.contains(&IpFamily::IPv6) { "::" } else { "0.0.0.0" }
    }
}

/// Where the component's images come from when no explicit image is set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSourceSpec {
    /// Registry and organisation, e.g. `ghcr.io/goharbor`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_suffix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<PullPolicy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

/// Periodic task cadence used by loggers and caches.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweeperSpec {
    #[serde(default = "default_sweep_duration")]
    pub duration: GoDuration,
}

fn default_sweep_duration() -> GoDuration {
    GoDuration::new("24h")
}

impl Default for SweeperSpec {
    fn default() -> Self {
        Self {
            duration: default_sweep_duration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinned(zone: &str) -> ComponentSpec {
        ComponentSpec {
            node_selector: BTreeMap::from([("zone".to_string(), zone.to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_co_scheduling() {
        let free = ComponentSpec::default();
        assert!(pinned("a").can_be_co_scheduled_with(&free));
        assert!(free.can_be_co_scheduled_with(&pinned("a")));
        assert!(pinned("a").can_be_co_scheduled_with(&pinned("a")));
        assert!(!pinned("a").can_be_co_scheduled_with(&pinned("b")));
    }

    #[test]
    fn test_defaults_are_idempotent() {
        let mut spec = ComponentSpec::default();
        spec.apply_defaults();
        let once = spec.clone();
        spec.apply_defaults();
        assert_eq!(spec, once);
        assert_eq!(spec.replicas, Some(1));
    }

    #[test]
    fn test_metrics_defaults() {
        let metrics: MetricsSpec = serde_json::from_str(r#"{"enabled":true}"#).unwrap();
        assert_eq!(metrics.port, 8001);
        assert_eq!(metrics.path, "/metrics");
    }
}
