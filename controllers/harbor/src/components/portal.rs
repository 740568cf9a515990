//! Portal: nginx serving the web UI.

use super::{PodParts, Workload, add_config, add_workload, template, tls_paths};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::{ComponentName, Portal, PortalSpec};
use std::collections::BTreeMap;

impl Aggregate for Portal {
    const NAME: &'static str = ComponentName::Portal.as_str();
}

const NGINX_CONF: &str = "nginx.conf";

const NGINX_TEMPLATE: &str = r#"worker_processes auto;
pid /tmp/nginx.pid;

events {
    worker_connections {{ MAX_CONNECTIONS }};
    use epoll;
    multi_accept on;
}

http {
    client_body_temp_path /tmp/client_body_temp;
    proxy_temp_path /tmp/proxy_temp;
    fastcgi_temp_path /tmp/fastcgi_temp;
    uwsgi_temp_path /tmp/uwsgi_temp;
    scgi_temp_path /tmp/scgi_temp;
    server_tokens off;

    server {
        listen {{ LISTEN }};
{{ TLS }}
        server_name localhost;
        root /usr/share/nginx/html;
        index index.html index.htm;
        include /etc/nginx/mime.types;

        gzip on;
        gzip_min_length 1000;
        gzip_proxied expired no-cache no-store private auth;
        gzip_types text/plain text/css application/json application/javascript application/x-javascript text/xml application/xml application/xml+rss text/javascript;

        location /devcenter-api-2.0 {
            try_files $uri $uri/ /swagger-ui-index.html;
        }

        location / {
            try_files $uri $uri/ /index.html;
        }

        location = /index.html {
            add_header Cache-Control "no-store, no-cache, must-revalidate";
        }
    }
}
"#;

/// Reconciles `Portal` resources.
#[derive(Debug, Default)]
pub struct PortalResources;

fn nginx_values(workload: &Workload<'_>, max_connections: i32) -> BTreeMap<&'static str, String> {
    let port = workload.container_port();
    let listen = match (workload.bind_address(), workload.has_tls()) {
        ("::", tls) => format!("[::]:{port}{}", if tls { " ssl" } else { "" }),
        (_, tls) => format!("{port}{}", if tls { " ssl" } else { "" }),
    };
    let tls = if workload.has_tls() {
        let paths = tls_paths(workload.component);
        format!(
            "        ssl_certificate {};\n        ssl_certificate_key {};\n        ssl_protocols TLSv1.2 TLSv1.3;",
            paths.cert, paths.key
        )
    } else {
        String::new()
    };
    BTreeMap::from([
        ("MAX_CONNECTIONS", max_connections.to_string()),
        ("LISTEN", listen),
        ("TLS", tls),
    ])
}

#[async_trait]
impl ResourceBuilder<Portal> for PortalResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        portal: &Portal,
        spec: &PortalSpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let workload = Workload::new(ComponentName::Portal, &portal.metadata, &spec.component)
            .tls(spec.tls.as_ref())
            .network(spec.network.as_ref());
        let name = workload.name;

        let values = nginx_values(&workload, spec.max_connections);
        let nginx = template::render_for(&ctx.config, Portal::NAME, NGINX_TEMPLATE, &values).await?;

        let mut parts = PodParts::default();
        let files = BTreeMap::from([(NGINX_CONF.to_string(), nginx)]);
        let consumes = add_config(graph, name, BTreeMap::new(), files, BTreeMap::new(), &mut parts)?;
        parts.mount_config_file(name, NGINX_CONF, "/etc/nginx/nginx.conf");
        add_workload(graph, &ctx.config, &workload, parts, &consumes, Vec::new())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing;
    use crate::config::OperatorConfig;
    use cluster_client::MockClusterClient;
    use crds::ComponentTls;

    fn portal(tls: bool) -> Portal {
        let mut portal = Portal::new(
            "demo-portal",
            PortalSpec {
                component: Default::default(),
                tls: tls.then(|| ComponentTls {
                    certificate_ref: "portal-tls".to_string(),
                }),
                network: None,
                max_connections: 2048,
            },
        );
        portal.metadata = testing::meta("demo-portal");
        portal
    }

    async fn build(portal: &Portal, config: OperatorConfig) -> WorkGraph {
        let client = MockClusterClient::new();
        let ctx = testing::context(&client, config);
        let mut graph = testing::graph();
        PortalResources
            .add_resources(&ctx, portal, &portal.spec, &mut graph)
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_portal_renders_nginx_conf() {
        let graph = build(&portal(false), OperatorConfig::default()).await;
        let conf = testing::config_data(&graph, "demo-portal");
        let nginx = &conf[NGINX_CONF];
        assert!(nginx.contains("worker_connections 2048;"));
        assert!(nginx.contains("listen 8080;"));
        assert!(!nginx.contains("ssl_certificate"));
        assert_eq!(graph.len(), 3);
        testing::assert_deployments_depend_on_their_config(&graph);
    }

    #[tokio::test]
    async fn test_portal_with_tls_listens_on_https() {
        let graph = build(&portal(true), OperatorConfig::default()).await;
        let nginx = &testing::config_data(&graph, "demo-portal")[NGINX_CONF];
        assert!(nginx.contains("listen 8443 ssl;"));
        assert!(nginx.contains("ssl_certificate /etc/harbor/ssl/portal/tls.crt;"));

        let deployment = testing::deployment(&graph, "demo-portal");
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        let port = &container.ports.as_ref().unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("https"));
        let probe = container.readiness_probe.as_ref().unwrap().http_get.as_ref().unwrap();
        assert_eq!(probe.scheme.as_deref(), Some("HTTPS"));
    }

    #[tokio::test]
    async fn test_network_policies_follow_config() {
        let config = OperatorConfig {
            network_policies: true,
            ..Default::default()
        };
        let graph = build(&portal(false), config).await;
        // ConfigMap, Deployment, Service and the policy pair
        assert_eq!(graph.len(), 5);
    }
}
