//! Ingresses publishing a cluster.

use super::urls::component_name;
use crate::components::metadata;
use crate::error::ControllerError;
use crate::graph::{NodeId, WorkGraph};
use crds::{ComponentName, ExposeComponentSpec, HarborClusterSpec, IngressSpec as ExposedIngress};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    IngressTLS, ServiceBackendPort,
};

/// Paths core answers; everything else goes to the portal.
const CORE_PATHS: [&str; 5] = ["/api/", "/service/", "/v2/", "/chartrepo/", "/c/"];

fn path(controller_regex: bool, prefix: &str, service: String, port: i32) -> HTTPIngressPath {
    let (path, path_type) = if controller_regex {
        (format!("{prefix}.*"), "ImplementationSpecific")
    } else {
        (prefix.to_string(), "Prefix")
    };
    HTTPIngressPath {
        path: Some(path),
        path_type: path_type.to_string(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: service,
                port: Some(ServiceBackendPort {
                    number: Some(port),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        },
    }
}

fn ingress(
    name: String,
    exposed: &ExposedIngress,
    expose: &ExposeComponentSpec,
    backend_tls: bool,
    paths: Vec<HTTPIngressPath>,
) -> Ingress {
    let mut annotations = exposed
        .controller
        .ingress_annotations(expose.tls.is_some(), backend_tls);
    annotations.extend(exposed.annotations.clone());

    let mut meta = metadata(name);
    meta.annotations = Some(annotations);
    Ingress {
        metadata: meta,
        spec: Some(IngressSpec {
            ingress_class_name: exposed.ingress_class_name.clone(),
            rules: Some(vec![IngressRule {
                host: Some(exposed.host.clone()),
                http: Some(HTTPIngressRuleValue { paths }),
            }]),
            tls: expose.tls.as_ref().map(|tls| {
                vec![IngressTLS {
                    hosts: Some(vec![exposed.host.clone()]),
                    secret_name: Some(tls.certificate_ref.clone()),
                }]
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Adds the core Ingress and, with an exposed notary, the notary one.
///
/// Each Ingress waits for the component resources it routes to.
pub fn add_ingresses(
    graph: &mut WorkGraph,
    cluster: &str,
    spec: &HarborClusterSpec,
    component_node: impl Fn(ComponentName) -> Option<NodeId>,
) -> Result<Vec<NodeId>, ControllerError> {
    let tls = spec.internal_tls.enabled;
    let mut nodes = Vec::new();

    if let Some(exposed) = &spec.expose.core.ingress {
        let regex = exposed.controller.regex_paths();
        let core = component_name(cluster, ComponentName::Core);
        let core_port = ComponentName::Core.service_port(tls);
        let mut paths = vec![path(
            regex,
            "/",
            component_name(cluster, ComponentName::Portal),
            ComponentName::Portal.service_port(tls),
        )];
        paths.extend(CORE_PATHS.iter().map(|prefix| path(regex, prefix, core.clone(), core_port)));

        let object = ingress(format!("{cluster}-core"), exposed, &spec.expose.core, tls, paths);
        let dependencies: Vec<NodeId> = [ComponentName::Core, ComponentName::Portal]
            .into_iter()
            .filter_map(&component_node)
            .collect();
        nodes.push(graph.add_ingress(&object, &dependencies)?);
    }

    let notary = spec
        .expose
        .notary
        .as_ref()
        .filter(|_| spec.is_enabled(ComponentName::NotaryServer));
    if let Some((expose, exposed)) = notary.and_then(|n| n.ingress.as_ref().map(|i| (n, i))) {
        let paths = vec![path(
            exposed.controller.regex_paths(),
            "/",
            component_name(cluster, ComponentName::NotaryServer),
            ComponentName::NotaryServer.service_port(true),
        )];
        let object = ingress(format!("{cluster}-notary"), exposed, expose, true, paths);
        let dependencies: Vec<NodeId> = component_node(ComponentName::NotaryServer).into_iter().collect();
        nodes.push(graph.add_ingress(&object, &dependencies)?);
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing;
    use serde_json::json;

    fn spec(expose: serde_json::Value, extra: serde_json::Value) -> HarborClusterSpec {
        let mut raw = json!({
            "externalURL": "https://harbor.example.com",
            "version": "2.4.0",
            "harborAdminPasswordRef": "admin",
            "expose": expose,
        });
        if let (Some(raw), Some(extra)) = (raw.as_object_mut(), extra.as_object()) {
            raw.extend(extra.clone());
        }
        serde_json::from_value(raw).unwrap()
    }

    fn backends(ingress: &Ingress) -> Vec<(String, String, i32)> {
        let rule = &ingress.spec.as_ref().unwrap().rules.as_ref().unwrap()[0];
        rule.http
            .as_ref()
            .unwrap()
            .paths
            .iter()
            .map(|p| {
                let service = p.backend.service.as_ref().unwrap();
                (
                    p.path.clone().unwrap(),
                    service.name.clone(),
                    service.port.as_ref().unwrap().number.unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_no_ingress_without_expose() {
        let mut graph = testing::graph();
        let nodes = add_ingresses(&mut graph, "demo", &spec(json!({"core": {}}), json!({})), |_| None).unwrap();
        assert!(nodes.is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_core_ingress_splits_portal_and_core() {
        let cluster = spec(
            json!({"core": {
                "ingress": {"host": "harbor.example.com", "ingressClassName": "nginx", "annotations": {"team": "infra"}},
                "tls": {"certificateRef": "public-tls"},
            }}),
            json!({}),
        );
        let mut graph = testing::graph();
        add_ingresses(&mut graph, "demo", &cluster, |_| None).unwrap();
        let ingress: Ingress = testing::node_object(&graph, "Ingress", "demo-core");

        let routes = backends(&ingress);
        assert_eq!(routes[0], ("/".to_string(), "demo-portal".to_string(), 80));
        assert!(routes.contains(&("/v2/".to_string(), "demo-core".to_string(), 80)));
        assert_eq!(routes.len(), 6);

        let annotations = ingress.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations["team"], "infra");
        assert_eq!(annotations["nginx.ingress.kubernetes.io/ssl-redirect"], "true");
        let spec = ingress.spec.unwrap();
        assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));
        assert_eq!(spec.tls.unwrap()[0].secret_name.as_deref(), Some("public-tls"));
    }

    #[test]
    fn test_regex_controllers_get_regex_paths() {
        let cluster = spec(
            json!({"core": {"ingress": {"host": "harbor.example.com", "controller": "ncp"}}}),
            json!({"internalTLS": {"enabled": true}}),
        );
        let mut graph = testing::graph();
        add_ingresses(&mut graph, "demo", &cluster, |_| None).unwrap();
        let ingress: Ingress = testing::node_object(&graph, "Ingress", "demo-core");
        let routes = backends(&ingress);
        assert_eq!(routes[0], ("/.*".to_string(), "demo-portal".to_string(), 443));
        let path = &ingress.spec.unwrap().rules.unwrap()[0].http.clone().unwrap().paths[1];
        assert_eq!(path.path_type, "ImplementationSpecific");
    }

    #[test]
    fn test_notary_ingress_needs_notary_enabled() {
        let expose = json!({
            "core": {"ingress": {"host": "harbor.example.com"}},
            "notary": {"ingress": {"host": "notary.example.com"}},
        });
        let mut graph = testing::graph();
        let nodes = add_ingresses(&mut graph, "demo", &spec(expose.clone(), json!({})), |_| None).unwrap();
        assert_eq!(nodes.len(), 1);

        let mut graph = testing::graph();
        let nodes = add_ingresses(&mut graph, "demo", &spec(expose, json!({"notary": {}})), |_| None).unwrap();
        assert_eq!(nodes.len(), 2);
        let ingress: Ingress = testing::node_object(&graph, "Ingress", "demo-notary");
        assert_eq!(backends(&ingress), vec![("/".to_string(), "demo-notaryserver".to_string(), 4443)]);
    }
}
