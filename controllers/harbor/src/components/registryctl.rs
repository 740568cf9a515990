//! Registry controller: the sidecar API core drives garbage collection with.
//!
//! It runs against the storage of the `Registry` it references and mounts
//! that registry's configuration next to its own.

use super::registry::{self, registry_pod};
use super::{
    PodParts, Workload, add_config, add_workload, common_settings, env_from_secret, internal_tls_settings, template,
    tls_paths,
};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::secret_types::SHARED_SECRET_KEY;
use crds::{ComponentName, Registry, RegistryController, RegistryControllerSpec, defaults_for};
use std::collections::BTreeMap;

impl Aggregate for RegistryController {
    const NAME: &'static str = ComponentName::RegistryController.as_str();
}

const CONFIG_FILE: &str = "config.yml";
const REGISTRY_CONFIG_FILE: &str = "registry-config.yml";

const CONFIG_TEMPLATE: &str = r#"---
protocol: "{{ PROTOCOL }}"
port: {{ PORT }}
log_level: {{ LOG_LEVEL }}
registry_config: "{{ REGISTRY_CONFIG }}"
{{ HTTPS }}
"#;

/// Reconciles `RegistryController` resources.
#[derive(Debug, Default)]
pub struct RegistryControllerResources;

#[async_trait]
impl ResourceBuilder<RegistryController> for RegistryControllerResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        controller: &RegistryController,
        spec: &RegistryControllerSpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let registry = ctx
            .get::<Registry>(&spec.registry_ref)
            .await?
            .ok_or_else(|| ControllerError::MissingResource {
                kind: "Registry".to_string(),
                name: spec.registry_ref.clone(),
            })?;
        let registry_spec = defaults_for(&registry.spec);

        let workload = Workload::new(ComponentName::RegistryController, &controller.metadata, &spec.component)
            .tls(spec.tls.as_ref())
            .injection(&spec.certificate_injection)
            .network(spec.network.as_ref());
        let name = workload.name;

        let mut parts = PodParts::default();
        let registry_config = registry_pod(ctx, &registry_spec, &mut parts).await?;

        let https = if workload.has_tls() {
            let paths = tls_paths(ComponentName::RegistryController);
            format!("https_config:\n  cert: \"{}\"\n  key: \"{}\"", paths.cert, paths.key)
        } else {
            String::new()
        };
        let values = BTreeMap::from([
            ("PROTOCOL", if workload.has_tls() { "https" } else { "http" }.to_string()),
            ("PORT", workload.container_port().to_string()),
            ("LOG_LEVEL", spec.log.level.as_str().to_string()),
            ("REGISTRY_CONFIG", registry::CONFIG_PATH.to_string()),
            ("HTTPS", https),
        ]);
        let config = template::render_for(&ctx.config, RegistryController::NAME, CONFIG_TEMPLATE, &values).await?;

        let mut env = BTreeMap::new();
        internal_tls_settings(&workload, &mut env);
        common_settings(
            ComponentName::RegistryController,
            None,
            spec.trace.as_ref(),
            &mut env,
            &mut parts.env,
        );
        parts.env.push(env_from_secret(
            "CORE_SECRET",
            &spec.authentication.core_secret_ref,
            SHARED_SECRET_KEY,
        ));
        parts.env.push(env_from_secret(
            "JOBSERVICE_SECRET",
            &spec.authentication.jobservice_secret_ref,
            SHARED_SECRET_KEY,
        ));

        let files = BTreeMap::from([
            (CONFIG_FILE.to_string(), config),
            (REGISTRY_CONFIG_FILE.to_string(), registry_config),
        ]);
        let consumes = add_config(graph, name, env, files, BTreeMap::new(), &mut parts)?;
        parts.mount_config_file(name, CONFIG_FILE, "/etc/registryctl/config.yml");
        parts.mount_config_file(name, REGISTRY_CONFIG_FILE, registry::CONFIG_PATH);
        add_workload(graph, &ctx.config, &workload, parts, &consumes, Vec::new())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing;
    use crate::config::OperatorConfig;
    use cluster_client::{MockClusterClient, ResourceType};
    use serde_json::json;

    fn controller() -> RegistryController {
        let spec: RegistryControllerSpec = serde_json::from_value(json!({
            "registryRef": "demo-registry",
            "authentication": {"coreSecretRef": "core-secret", "jobserviceSecretRef": "js-secret"},
        }))
        .unwrap();
        let mut controller = RegistryController::new("demo-registryctl", spec);
        controller.metadata = testing::meta("demo-registryctl");
        controller
    }

    fn registry() -> Registry {
        let spec = serde_json::from_value(json!({
            "http": {"secretRef": "registry-http"},
            "authentication": {"htpasswd": {"secretRef": "registry-htpasswd"}},
            "storage": {"filesystem": {"volume": {"claimName": "reg-pvc"}}},
        }))
        .unwrap();
        let mut registry = Registry::new("demo-registry", spec);
        registry.metadata = testing::meta("demo-registry");
        registry
    }

    #[tokio::test]
    async fn test_missing_registry_is_referential() {
        let client = MockClusterClient::new();
        let ctx = testing::context(&client, OperatorConfig::default());
        let controller = controller();
        let mut graph = testing::graph();
        let error = RegistryControllerResources
            .add_resources(&ctx, &controller, &controller.spec, &mut graph)
            .await
            .unwrap_err();
        assert!(matches!(error, ControllerError::MissingResource { ref name, .. } if name == "demo-registry"));
        assert!(graph.is_empty());
    }

    #[tokio::test]
    async fn test_shares_the_registry_storage() {
        let client = MockClusterClient::new();
        client.insert(&ResourceType::namespaced::<Registry>(), &registry());
        let ctx = testing::context(&client, OperatorConfig::default());
        let controller = controller();
        let mut graph = testing::graph();
        RegistryControllerResources
            .add_resources(&ctx, &controller, &controller.spec, &mut graph)
            .await
            .unwrap();

        let data = testing::config_data(&graph, "demo-registryctl");
        assert!(data[CONFIG_FILE].contains("registry_config: \"/etc/registry/config.yml\""));
        assert!(data[REGISTRY_CONFIG_FILE].contains("rootdirectory: /storage"));
        assert_eq!(data["INTERNAL_TLS_ENABLED"], "false");

        let pod = testing::deployment(&graph, "demo-registryctl").spec.unwrap().template.spec.unwrap();
        let claims: Vec<_> = pod
            .volumes
            .unwrap()
            .into_iter()
            .filter_map(|v| v.persistent_volume_claim.map(|c| c.claim_name))
            .collect();
        assert_eq!(claims, vec!["reg-pvc".to_string()]);
        testing::assert_deployments_depend_on_their_config(&graph);
    }
}
