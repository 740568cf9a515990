//! Notary signer: holds the signing keys, always behind TLS.

use super::{
    PodParts, Workload, add_config, add_workload, env, env_from_secret, migration_container, template, tls_paths,
};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::secret_types::{NOTARY_SIGNER_DEFAULT_ALIAS_KEY, POSTGRESQL_PASSWORD_KEY};
use crds::{ComponentName, ComponentTls, NotarySigner, NotarySignerSpec};
use std::collections::BTreeMap;

impl Aggregate for NotarySigner {
    const NAME: &'static str = ComponentName::NotarySigner.as_str();
}

const CONFIG_FILE: &str = "signer.json";
const CONFIG_PATH: &str = "/etc/notary/signer.json";
const DEFAULT_ALIAS: &str = "defaultalias";

const CONFIG_TEMPLATE: &str = r#"{
  "server": {
    "grpc_addr": ":{{ PORT }}",
    "tls_cert_file": "{{ CERT }}",
    "tls_key_file": "{{ KEY }}"
  },
  "logging": {"level": "{{ LOG_LEVEL }}"},
  "storage": {"backend": "postgres", "db_url": "", "default_alias": "{{ ALIAS }}"}
}
"#;

/// Reconciles `NotarySigner` resources.
#[derive(Debug, Default)]
pub struct NotarySignerResources;

#[async_trait]
impl ResourceBuilder<NotarySigner> for NotarySignerResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        signer: &NotarySigner,
        spec: &NotarySignerSpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let tls = ComponentTls {
            certificate_ref: spec.certificate_ref.clone(),
        };
        let workload = Workload::new(ComponentName::NotarySigner, &signer.metadata, &spec.component)
            .tls(Some(&tls))
            .injection(&spec.certificate_injection)
            .network(spec.network.as_ref());
        let name = workload.name;
        let mut parts = PodParts::default();

        let paths = tls_paths(ComponentName::NotarySigner);
        let values = BTreeMap::from([
            ("PORT", workload.container_port().to_string()),
            ("CERT", paths.cert),
            ("KEY", paths.key),
            ("LOG_LEVEL", spec.logging.level.as_str().to_string()),
            ("ALIAS", DEFAULT_ALIAS.to_string()),
        ]);
        let config = template::render_for(&ctx.config, NotarySigner::NAME, CONFIG_TEMPLATE, &values).await?;

        let postgres = &spec.storage.postgres;
        if let Some(password) = &postgres.password_ref {
            parts.env.push(env_from_secret("POSTGRESQL_PASSWORD", password, POSTGRESQL_PASSWORD_KEY));
        }
        parts.env.push(env("NOTARY_SIGNER_STORAGE_DB_URL", postgres.dsn(None)));
        parts.env.push(env_from_secret(
            &format!("NOTARY_SIGNER_{}", DEFAULT_ALIAS.to_uppercase()),
            &spec.storage.alias_secret_ref,
            NOTARY_SIGNER_DEFAULT_ALIAS_KEY,
        ));
        if spec.migration_enabled {
            parts.init_containers.push(migration_container(&ctx.config, &workload, postgres, "notary_signer"));
        }

        let files = BTreeMap::from([(CONFIG_FILE.to_string(), config)]);
        let consumes = add_config(graph, name, BTreeMap::new(), files, BTreeMap::new(), &mut parts)?;
        parts.mount_config_file(name, CONFIG_FILE, CONFIG_PATH);
        parts.command = Some(vec!["/bin/notary-signer".to_string()]);
        parts.args = Some(vec!["-config".to_string(), CONFIG_PATH.to_string(), "-logf=logfmt".to_string()]);
        add_workload(graph, &ctx.config, &workload, parts, &consumes, Vec::new())?;
        Ok(())
    }
}
