//! External exposure of a cluster
//!
//! Core (and, when enabled, the notary server) are published through an
//! Ingress. Each supported ingress controller needs a few annotations on the
//! Ingress and on the backing Service to behave; those quirks live here so
//! every reconciler applies them the same way.

use crate::common::ComponentTls;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IngressController {
    /// ingress-nginx
    #[default]
    Default,
    Gce,
    Ncp,
    Contour,
}

impl IngressController {
    /// Serialized name, as written in annotations.
    pub fn as_str(&self) -> &'static str {
        match self {
            IngressController::Default => "default",
            IngressController::Gce => "gce",
            IngressController::Ncp => "ncp",
            IngressController::Contour => "contour",
        }
    }

    /// Annotations the Ingress needs for this controller.
    pub fn ingress_annotations(&self, tls: bool, backend_tls: bool) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        match self {
            IngressController::Default => {
                annotations.insert(
                    "nginx.ingress.kubernetes.io/proxy-body-size".to_string(),
                    "0".to_string(),
                );
                annotations.insert(
                    "nginx.ingress.kubernetes.io/ssl-redirect".to_string(),
                    tls.to_string(),
                );
                if backend_tls {
                    annotations.insert(
                        "nginx.ingress.kubernetes.io/backend-protocol".to_string(),
                        "HTTPS".to_string(),
                    );
                }
            }
            IngressController::Gce => {
                annotations.insert("kubernetes.io/ingress.class".to_string(), "gce".to_string());
            }
            IngressController::Ncp => {
                annotations.insert("ncp/use-regex".to_string(), "true".to_string());
                if tls {
                    annotations.insert("ncp/http-redirect".to_string(), "true".to_string());
                }
            }
            IngressController::Contour => {
                annotations.insert(
                    "ingress.kubernetes.io/force-ssl-redirect".to_string(),
                    tls.to_string(),
                );
            }
        }
        annotations
    }

    /// Annotations the backing Service needs for this controller.
    pub fn service_annotations(&self, backend_tls: bool, port_name: &str) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        if !backend_tls {
            return annotations;
        }
        match self {
            IngressController::Gce => {
                annotations.insert(
                    "cloud.google.com/app-protocols".to_string(),
                    format!(r#"{{"{port_name}":"HTTPS"}}"#),
                );
            }
            IngressController::Contour => {
                annotations.insert(
                    "projectcontour.io/upstream-protocol.tls".to_string(),
                    port_name.to_string(),
                );
            }
            IngressController::Default | IngressController::Ncp => {}
        }
        annotations
    }

    /// Whether paths must be written as regular expressions.
    pub fn regex_paths(&self) -> bool {
        matches!(self, IngressController::Ncp | IngressController::Gce)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    pub host: String,

    #[serde(default)]
    pub controller: IngressController,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// How one externally reachable component is published.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExposeComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSpec>,

    /// TLS terminated by the ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ComponentTls>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExposeSpec {
    pub core: ExposeComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notary: Option<ExposeComponentSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nginx_annotations() {
        let a = IngressController::Default.ingress_annotations(true, true);
        assert_eq!(a["nginx.ingress.kubernetes.io/proxy-body-size"], "0");
        assert_eq!(a["nginx.ingress.kubernetes.io/ssl-redirect"], "true");
        assert_eq!(a["nginx.ingress.kubernetes.io/backend-protocol"], "HTTPS");
    }

    #[test]
    fn test_service_quirks_only_apply_to_tls_backends() {
        assert!(IngressController::Gce.service_annotations(false, "https").is_empty());
        let a = IngressController::Gce.service_annotations(true, "https");
        assert_eq!(a["cloud.google.com/app-protocols"], r#"{"https":"HTTPS"}"#);
        let a = IngressController::Contour.service_annotations(true, "https");
        assert_eq!(a["projectcontour.io/upstream-protocol.tls"], "https");
    }

    #[test]
    fn test_controller_names() {
        let spec: IngressSpec = serde_json::from_str(r#"{"host":"h","controller":"ncp"}"#).unwrap();
        assert_eq!(spec.controller, IngressController::Ncp);
        assert!(spec.controller.regex_paths());
    }
}
