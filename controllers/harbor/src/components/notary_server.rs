//! Notary server: content trust metadata.

use super::{
    PodParts, Workload, add_config, add_workload, common_settings, env, env_from_secret, migration_container,
    template, tls_paths,
};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::secret_types::{CA_CERT_KEY, POSTGRESQL_PASSWORD_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use crds::{ComponentName, NotaryServer, NotaryServerSpec};
use serde_json::json;
use std::collections::BTreeMap;

impl Aggregate for NotaryServer {
    const NAME: &'static str = ComponentName::NotaryServer.as_str();
}

const CONFIG_FILE: &str = "server.json";
const CONFIG_PATH: &str = "/etc/notary/server.json";
const TRUST_DIR: &str = "/etc/notary/trust-service";
const AUTH_CERT_PATH: &str = "/etc/notary/auth-token/tls.crt";

const CONFIG_TEMPLATE: &str = r#"{
  "server": {{ SERVER }},
  "trust_service": {{ TRUST_SERVICE }},
  "logging": {"level": "{{ LOG_LEVEL }}"},
  "storage": {"backend": "postgres", "db_url": ""}{{ AUTH }}
}
"#;

/// Reconciles `NotaryServer` resources.
#[derive(Debug, Default)]
pub struct NotaryServerResources;

fn config_values(workload: &Workload<'_>, spec: &NotaryServerSpec) -> BTreeMap<&'static str, String> {
    let mut server = json!({"http_addr": format!(":{}", workload.container_port())});
    if workload.has_tls() {
        let paths = tls_paths(ComponentName::NotaryServer);
        server["tls_cert_file"] = paths.cert.into();
        server["tls_key_file"] = paths.key.into();
    }
    let remote = &spec.trust_service.remote;
    let trust = json!({
        "type": "remote",
        "hostname": remote.host,
        "port": remote.port.to_string(),
        "key_algorithm": remote.key_algorithm,
        "tls_ca_file": format!("{TRUST_DIR}/{CA_CERT_KEY}"),
        "tls_client_cert": format!("{TRUST_DIR}/{TLS_CERT_KEY}"),
        "tls_client_key": format!("{TRUST_DIR}/{TLS_PRIVATE_KEY_KEY}"),
    });
    let auth = spec.authentication.as_ref().map_or_else(String::new, |auth| {
        let token = json!({
            "type": "token",
            "options": {
                "realm": auth.token.realm,
                "service": auth.token.service,
                "issuer": auth.token.issuer,
                "rootcertbundle": AUTH_CERT_PATH,
            },
        });
        format!(",\n  \"auth\": {token}")
    });
    BTreeMap::from([
        ("SERVER", server.to_string()),
        ("TRUST_SERVICE", trust.to_string()),
        ("LOG_LEVEL", spec.logging.level.as_str().to_string()),
        ("AUTH", auth),
    ])
}

#[async_trait]
impl ResourceBuilder<NotaryServer> for NotaryServerResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        server: &NotaryServer,
        spec: &NotaryServerSpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let workload = Workload::new(ComponentName::NotaryServer, &server.metadata, &spec.component)
            .tls(spec.tls.as_ref())
            .injection(&spec.certificate_injection)
            .network(spec.network.as_ref());
        let name = workload.name;
        let mut parts = PodParts::default();

        let config = template::render_for(
            &ctx.config,
            NotaryServer::NAME,
            CONFIG_TEMPLATE,
            &config_values(&workload, spec),
        )
        .await?;

        let postgres = &spec.storage.postgres;
        if let Some(password) = &postgres.password_ref {
            parts.env.push(env_from_secret("POSTGRESQL_PASSWORD", password, POSTGRESQL_PASSWORD_KEY));
        }
        // Must follow POSTGRESQL_PASSWORD for the kubelet to expand it.
        parts.env.push(env("NOTARY_SERVER_STORAGE_DB_URL", postgres.dsn(None)));

        let mut vars = BTreeMap::new();
        common_settings(
            ComponentName::NotaryServer,
            None,
            spec.trace.as_ref(),
            &mut vars,
            &mut parts.env,
        );

        parts.mount_secret_dir("trust-service", &spec.trust_service.remote.certificate_ref, TRUST_DIR);
        if let Some(auth) = &spec.authentication {
            parts.mount_secret_file("auth-token", &auth.token.certificate_ref, TLS_CERT_KEY, AUTH_CERT_PATH);
        }
        if spec.migration_enabled {
            parts.init_containers.push(migration_container(&ctx.config, &workload, postgres, "notary_server"));
        }

        let files = BTreeMap::from([(CONFIG_FILE.to_string(), config)]);
        let consumes = add_config(graph, name, vars, files, BTreeMap::new(), &mut parts)?;
        parts.mount_config_file(name, CONFIG_FILE, CONFIG_PATH);
        parts.command = Some(vec!["/bin/notary-server".to_string()]);
        parts.args = Some(vec!["-config".to_string(), CONFIG_PATH.to_string(), "-logf=logfmt".to_string()]);
        add_workload(graph, &ctx.config, &workload, parts, &consumes, Vec::new())?;
        Ok(())
    }
}
