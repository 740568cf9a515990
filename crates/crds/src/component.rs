//! Harbor component identities
//!
//! Static facts about each component: image name, listening ports, health
//! endpoint, Redis database index and PostgreSQL database name.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ComponentName {
    Core,
    JobService,
    Registry,
    RegistryController,
    Portal,
    ChartMuseum,
    Trivy,
    NotaryServer,
    NotarySigner,
    Exporter,
}

/// How a component's liveness and readiness are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    Http { path: &'static str },
    Tcp,
}

impl ComponentName {
    pub const ALL: [ComponentName; 10] = [
        ComponentName::Core,
        ComponentName::JobService,
        ComponentName::Registry,
        ComponentName::RegistryController,
        ComponentName::Portal,
        ComponentName::ChartMuseum,
        ComponentName::Trivy,
        ComponentName::NotaryServer,
        ComponentName::NotarySigner,
        ComponentName::Exporter,
    ];

    /// Short name used in child object names and labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ComponentName::Core => "core",
            ComponentName::JobService => "jobservice",
            ComponentName::Registry => "registry",
            ComponentName::RegistryController => "registryctl",
            ComponentName::Portal => "portal",
            ComponentName::ChartMuseum => "chartmuseum",
            ComponentName::Trivy => "trivy",
            ComponentName::NotaryServer => "notaryserver",
            ComponentName::NotarySigner => "notarysigner",
            ComponentName::Exporter => "exporter",
        }
    }

    /// Kind of the component resource.
    pub const fn kind(&self) -> &'static str {
        match self {
            ComponentName::Core => "Core",
            ComponentName::JobService => "JobService",
            ComponentName::Registry => "Registry",
            ComponentName::RegistryController => "RegistryController",
            ComponentName::Portal => "Portal",
            ComponentName::ChartMuseum => "ChartMuseum",
            ComponentName::Trivy => "Trivy",
            ComponentName::NotaryServer => "NotaryServer",
            ComponentName::NotarySigner => "NotarySigner",
            ComponentName::Exporter => "Exporter",
        }
    }

    /// Image repository name under the `goharbor` organisation.
    pub const fn image_name(&self) -> &'static str {
        match self {
            ComponentName::Core => "harbor-core",
            ComponentName::JobService => "harbor-jobservice",
            ComponentName::Registry => "registry-photon",
            ComponentName::RegistryController => "harbor-registryctl",
            ComponentName::Portal => "harbor-portal",
            ComponentName::ChartMuseum => "chartmuseum-photon",
            ComponentName::Trivy => "trivy-adapter-photon",
            ComponentName::NotaryServer => "notary-server-photon",
            ComponentName::NotarySigner => "notary-signer-photon",
            ComponentName::Exporter => "harbor-exporter",
        }
    }

    /// Port the container listens on.
    pub const fn container_port(&self, tls: bool) -> i32 {
        match (self, tls) {
            (ComponentName::Registry, false) => 5000,
            (ComponentName::Registry, true) => 5443,
            (ComponentName::ChartMuseum, false) => 9999,
            (ComponentName::ChartMuseum, true) => 9443,
            (ComponentName::NotaryServer, _) => 4443,
            (ComponentName::NotarySigner, _) => 7899,
            (ComponentName::Exporter, _) => 8001,
            (_, false) => 8080,
            (_, true) => 8443,
        }
    }

    /// Port the component's service exposes.
    pub const fn service_port(&self, tls: bool) -> i32 {
        match (self, tls) {
            (ComponentName::Registry, _)
            | (ComponentName::NotaryServer, _)
            | (ComponentName::NotarySigner, _)
            | (ComponentName::Exporter, _) => self.container_port(tls),
            (_, false) => 80,
            (_, true) => 443,
        }
    }

    pub const fn health_check(&self) -> HealthCheck {
        match self {
            ComponentName::Core => HealthCheck::Http { path: "/api/v2.0/ping" },
            ComponentName::JobService => HealthCheck::Http { path: "/api/v1/stats" },
            ComponentName::Registry => HealthCheck::Http { path: "/" },
            ComponentName::RegistryController => HealthCheck::Http { path: "/api/health" },
            ComponentName::Portal => HealthCheck::Http { path: "/" },
            ComponentName::ChartMuseum => HealthCheck::Http { path: "/health" },
            ComponentName::Trivy => HealthCheck::Http { path: "/probe/healthy" },
            ComponentName::NotaryServer => HealthCheck::Http { path: "/_notary_server/health" },
            ComponentName::NotarySigner => HealthCheck::Tcp,
            ComponentName::Exporter => HealthCheck::Http { path: "/" },
        }
    }

    /// Redis database index the component uses, if it uses Redis.
    pub const fn redis_database_index(&self) -> Option<i32> {
        match self {
            ComponentName::Core => Some(0),
            ComponentName::JobService => Some(1),
            ComponentName::Registry => Some(2),
            ComponentName::ChartMuseum => Some(3),
            ComponentName::Trivy => Some(5),
            _ => None,
        }
    }

    /// PostgreSQL database the component uses, if it uses one.
    pub const fn database_name(&self) -> Option<&'static str> {
        match self {
            ComponentName::Core | ComponentName::Exporter => Some("core"),
            ComponentName::NotaryServer => Some("notaryserver"),
            ComponentName::NotarySigner => Some("notarysigner"),
            _ => None,
        }
    }

    /// Name of the container within the component's pod.
    pub const fn container_name(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_redis_indexes_are_distinct() {
        let indexes: Vec<i32> = ComponentName::ALL
            .iter()
            .filter_map(ComponentName::redis_database_index)
            .collect();
        let unique: HashSet<_> = indexes.iter().collect();
        assert_eq!(indexes.len(), unique.len());
        assert_eq!(ComponentName::Trivy.redis_database_index(), Some(5));
    }

    #[test]
    fn test_ports_follow_tls() {
        assert_eq!(ComponentName::Core.service_port(false), 80);
        assert_eq!(ComponentName::Core.service_port(true), 443);
        assert_eq!(ComponentName::Core.container_port(true), 8443);
        assert_eq!(ComponentName::Registry.service_port(true), 5443);
        assert_eq!(ComponentName::NotarySigner.service_port(false), 7899);
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_value(ComponentName::JobService).unwrap(),
            serde_json::json!("jobservice")
        );
        assert_eq!(
            serde_json::from_value::<ComponentName>(serde_json::json!("trivy")).unwrap(),
            ComponentName::Trivy
        );
    }
}
