//! In-cluster URLs between components.
//!
//! Each component is reached through the Service of its resource, named
//! `<cluster>-<component>`. Scheme and port follow the cluster's internal TLS
//! setting, so every URL here is a pure function of the cluster name and spec.

use crds::{ComponentName, HarborClusterSpec};

/// Name of the component resource (and of its Service) within a cluster.
pub fn component_name(cluster: &str, component: ComponentName) -> String {
    format!("{cluster}-{}", component.as_str())
}

/// URL of a component's Service; default ports are left out.
pub fn service_url(cluster: &str, component: ComponentName, tls: bool) -> String {
    let scheme = if tls { "https" } else { "http" };
    let host = component_name(cluster, component);
    match component.service_port(tls) {
        80 | 443 => format!("{scheme}://{host}"),
        port => format!("{scheme}://{host}:{port}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterUrls {
    pub core: String,
    pub token_service: String,
    pub portal: String,
    pub registry: String,
    pub registryctl: String,
    pub jobservice: String,
    pub chartmuseum: Option<String>,
    pub trivy: Option<String>,
    pub notary_server: Option<String>,
    /// Public URL Docker clients and Helm use for charts
    pub public_chart_repository: String,
    /// Public token realm advertised by the notary server
    pub public_token_realm: String,
}

pub fn derive_urls(cluster: &str, spec: &HarborClusterSpec) -> ClusterUrls {
    let tls = spec.internal_tls.enabled;
    let url = |component| service_url(cluster, component, tls);
    let enabled = |component| spec.is_enabled(component).then(|| url(component));
    let core = url(ComponentName::Core);
    let public = spec.external_url.trim_end_matches('/');

    ClusterUrls {
        token_service: format!("{core}/service/token"),
        core,
        portal: url(ComponentName::Portal),
        registry: url(ComponentName::Registry),
        registryctl: url(ComponentName::RegistryController),
        jobservice: url(ComponentName::JobService),
        chartmuseum: enabled(ComponentName::ChartMuseum),
        trivy: enabled(ComponentName::Trivy),
        notary_server: enabled(ComponentName::NotaryServer),
        public_chart_repository: format!("{public}/chartrepo"),
        public_token_realm: format!("{public}/service/token"),
    }
}

/// Host names of every enabled component, kept off any outgoing proxy.
pub fn internal_hosts(cluster: &str, spec: &HarborClusterSpec) -> Vec<String> {
    spec.enabled_components()
        .into_iter()
        .map(|component| component_name(cluster, component))
        .collect()
}
