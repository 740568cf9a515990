//! Outbound HTTP proxy settings

use crate::component::ComponentName;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Proxy settings handed to a single component.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_proxy: Vec<String>,
}

impl ProxySpec {
    /// `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY` for the component's environment.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(http) = &self.http_proxy {
            env.insert("HTTP_PROXY".to_string(), http.clone());
        }
        if let Some(https) = &self.https_proxy {
            env.insert("HTTPS_PROXY".to_string(), https.clone());
        }
        if !self.no_proxy.is_empty() {
            env.insert("NO_PROXY".to_string(), self.no_proxy.join(","));
        }
        env
    }
}

/// Cluster-level proxy, applied to the listed components only.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HarborProxySpec {
    #[serde(flatten)]
    pub proxy: ProxySpec,

    #[serde(default = "default_proxy_components")]
    pub components: Vec<ComponentName>,
}

fn default_proxy_components() -> Vec<ComponentName> {
    vec![ComponentName::Core, ComponentName::JobService, ComponentName::Trivy]
}

pub fn default_no_proxy() -> Vec<String> {
    ["127.0.0.1", "localhost", ".local", ".internal"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl HarborProxySpec {
    pub fn apply_defaults(&mut self) {
        if self.proxy.no_proxy.is_empty() {
            self.proxy.no_proxy = default_no_proxy();
        }
    }

    /// Proxy for `component`, `None` when the component is not proxied.
    ///
    /// In-cluster service names are always added to `NO_PROXY`.
    pub fn for_component(&self, component: ComponentName, internal_hosts: &[String]) -> Option<ProxySpec> {
        if !self.components.contains(&component) {
            return None;
        }
        let mut proxy = self.proxy.clone();
        for host in internal_hosts {
            if !proxy.no_proxy.contains(host) {
                proxy.no_proxy.push(host.clone());
            }
        }
        Some(proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_listed_components_are_proxied() {
        let spec: HarborProxySpec =
            serde_json::from_str(r#"{"httpProxy":"http://proxy:3128"}"#).unwrap();
        let internal = vec!["demo-core".to_string()];
        assert!(spec.for_component(ComponentName::Portal, &internal).is_none());

        let core = spec.for_component(ComponentName::Core, &internal).unwrap();
        let env = core.env();
        assert_eq!(env["HTTP_PROXY"], "http://proxy:3128");
        assert_eq!(env["NO_PROXY"], "demo-core");
        assert!(!env.contains_key("HTTPS_PROXY"));
    }

    #[test]
    fn test_defaults_fill_no_proxy_once() {
        let mut spec: HarborProxySpec = serde_json::from_str(r#"{}"#).unwrap();
        spec.apply_defaults();
        spec.apply_defaults();
        assert_eq!(spec.proxy.no_proxy, default_no_proxy());
    }
}
