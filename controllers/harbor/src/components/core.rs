//! Core: Harbor's API server and token service.

use super::{
    PodParts, Workload, add_config, add_workload, common_settings, env_from_secret, internal_tls_settings,
    metrics_service_port, metrics_settings, postgres_settings, redis_url, template,
};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::secret_types::{CSRF_KEY, SHARED_SECRET_KEY, TLS_PRIVATE_KEY_KEY};
use crds::{ComponentName, Core, CoreSpec};
use std::collections::BTreeMap;

impl Aggregate for Core {
    const NAME: &'static str = ComponentName::Core.as_str();
}

const APP_CONF: &str = "app.conf";
const APP_CONF_PATH: &str = "/etc/core/app.conf";
const KEY_PATH: &str = "/etc/core/key";
const TOKEN_KEY_PATH: &str = "/etc/core/private_key.pem";

const APP_CONF_TEMPLATE: &str = r"appname = Harbor
runmode = prod
enablegzip = true

[prod]
httpport = {{ PORT }}
";

/// Reconciles `Core` resources.
#[derive(Debug, Default)]
pub struct CoreResources;

fn settings(workload: &Workload<'_>, spec: &CoreSpec) -> BTreeMap<String, String> {
    let components = &spec.components;
    let mut data = BTreeMap::from([
        ("CONFIG_PATH".to_string(), APP_CONF_PATH.to_string()),
        ("KEY_PATH".to_string(), KEY_PATH.to_string()),
        ("TOKEN_PRIVATE_KEY_PATH".to_string(), TOKEN_KEY_PATH.to_string()),
        ("PORT".to_string(), workload.container_port().to_string()),
        ("LOG_LEVEL".to_string(), spec.log.level.as_str().to_string()),
        ("EXT_ENDPOINT".to_string(), spec.external_endpoint.clone()),
        ("CORE_URL".to_string(), workload.internal_url()),
        ("CORE_LOCAL_URL".to_string(), workload.internal_url()),
        ("TOKEN_SERVICE_URL".to_string(), components.token_service.url.clone()),
        ("REGISTRY_URL".to_string(), components.registry.url.clone()),
        ("REGISTRY_CONTROLLER_URL".to_string(), components.registry.controller_url.clone()),
        (
            "REGISTRY_CREDENTIAL_USERNAME".to_string(),
            components.registry.credentials.username.clone(),
        ),
        ("JOBSERVICE_URL".to_string(), components.job_service.url.clone()),
        ("PORTAL_URL".to_string(), components.portal.url.clone()),
        ("AUTH_MODE".to_string(), spec.core_config.auth_mode.as_str().to_string()),
        ("TOKEN_EXPIRATION".to_string(), spec.core_config.token_expiration.to_string()),
        ("DATABASE_TYPE".to_string(), "postgresql".to_string()),
        ("SYNC_REGISTRY".to_string(), "false".to_string()),
        ("SYNC_QUOTA".to_string(), "true".to_string()),
    ]);
    if let Some(max) = spec.database.max_idle_connections {
        data.insert("POSTGRESQL_MAX_IDLE_CONNS".to_string(), max.to_string());
    }
    if let Some(max) = spec.database.max_open_connections {
        data.insert("POSTGRESQL_MAX_OPEN_CONNS".to_string(), max.to_string());
    }

    data.insert(
        "WITH_CHARTMUSEUM".to_string(),
        components.chart_repository.is_some().to_string(),
    );
    if let Some(charts) = &components.chart_repository {
        data.insert("CHART_REPOSITORY_URL".to_string(), charts.url.clone());
        data.insert("CHART_CACHE_DRIVER".to_string(), "redis".to_string());
        data.insert("CHART_ABSOLUTE_URL".to_string(), charts.absolute_url.to_string());
    }
    data.insert("WITH_TRIVY".to_string(), components.trivy.is_some().to_string());
    if let Some(trivy) = &components.trivy {
        data.insert("TRIVY_ADAPTER_URL".to_string(), trivy.url.clone());
    }
    data.insert("WITH_NOTARY".to_string(), components.notary_server.is_some().to_string());
    if let Some(notary) = &components.notary_server {
        data.insert("NOTARY_URL".to_string(), notary.url.clone());
    }
    data
}

#[async_trait]
impl ResourceBuilder<Core> for CoreResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        core: &Core,
        spec: &CoreSpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let workload = Workload::new(ComponentName::Core, &core.metadata, &spec.component)
            .tls(spec.tls.as_ref())
            .injection(&spec.certificate_injection)
            .network(spec.network.as_ref());
        let name = workload.name;
        let mut parts = PodParts::default();

        let mut env = settings(&workload, spec);
        internal_tls_settings(&workload, &mut env);
        metrics_settings(ComponentName::Core, spec.metrics.as_ref(), &mut env, &mut parts);
        common_settings(
            ComponentName::Core,
            spec.proxy.as_ref(),
            spec.trace.as_ref(),
            &mut env,
            &mut parts.env,
        );
        postgres_settings(&spec.database.connection, &mut env, &mut parts.env);

        // Redis URLs embed the password, so they live in the component secret.
        let mut registry_redis = spec.redis.clone();
        registry_redis.database = ComponentName::Registry.redis_database_index().unwrap_or(2);
        let secret_env = BTreeMap::from([
            ("_REDIS_URL_CORE".to_string(), redis_url(ctx, &spec.redis).await?),
            ("_REDIS_URL_REG".to_string(), redis_url(ctx, &registry_redis).await?),
        ]);

        let config = &spec.core_config;
        parts.env.push(env_from_secret("CORE_SECRET", &config.secret_ref, SHARED_SECRET_KEY));
        parts.env.push(env_from_secret(
            "JOBSERVICE_SECRET",
            &spec.components.job_service.secret_ref,
            SHARED_SECRET_KEY,
        ));
        parts.env.push(env_from_secret("CSRF_KEY", &config.csrf_key_ref, CSRF_KEY));
        parts.env.push(env_from_secret(
            "REGISTRY_CREDENTIAL_PASSWORD",
            &spec.components.registry.credentials.password_ref,
            SHARED_SECRET_KEY,
        ));
        if let Some(admin) = &config.admin_initial_password_ref {
            parts.env.push(env_from_secret("HARBOR_ADMIN_PASSWORD", admin, SHARED_SECRET_KEY));
        }
        parts.mount_secret_file(
            "encryption-key",
            &spec.database.encryption_key_ref,
            SHARED_SECRET_KEY,
            KEY_PATH,
        );
        parts.mount_secret_file(
            "token-service-private-key",
            &spec.components.token_service.certificate_ref,
            TLS_PRIVATE_KEY_KEY,
            TOKEN_KEY_PATH,
        );

        let values = BTreeMap::from([("PORT", workload.container_port().to_string())]);
        let app_conf = template::render_for(&ctx.config, Core::NAME, APP_CONF_TEMPLATE, &values).await?;
        let files = BTreeMap::from([(APP_CONF.to_string(), app_conf)]);

        let consumes = add_config(graph, name, env, files, secret_env, &mut parts)?;
        parts.mount_config_file(name, APP_CONF, APP_CONF_PATH);
        add_workload(
            graph,
            &ctx.config,
            &workload,
            parts,
            &consumes,
            metrics_service_port(spec.metrics.as_ref()),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing;
    use crate::config::OperatorConfig;
    use cluster_client::MockClusterClient;
    use serde_json::json;

    fn core() -> Core {
        let spec: CoreSpec = serde_json::from_value(json!({
            "externalEndpoint": "https://harbor.example",
            "coreConfig": {"secretRef": "core-secret", "csrfKeyRef": "csrf", "adminInitialPasswordRef": "admin-pw"},
            "components": {
                "tokenService": {"url": "http://demo-core/service/token", "certificateRef": "token-cert"},
                "registry": {
                    "url": "http://demo-registry:5000",
                    "controllerUrl": "http://demo-registryctl",
                    "credentials": {"username": "harbor_registry_user", "passwordRef": "registry-pw"},
                },
                "jobService": {"url": "http://demo-jobservice", "secretRef": "js-secret"},
                "portal": {"url": "http://demo-portal"},
                "trivy": {"url": "http://demo-trivy"},
            },
            "database": {
                "hosts": [{"host": "db", "port": 5432}],
                "username": "harbor",
                "passwordRef": "db-pw",
                "database": "core",
                "sslMode": "disable",
                "encryptionKeyRef": "encryption",
            },
            "redis": {"host": "redis", "port": 6379, "passwordRef": "redis-pw", "database": 0},
        }))
        .unwrap();
        let mut core = Core::new("demo-core", crds::defaults_for(&spec));
        core.metadata = testing::meta("demo-core");
        core
    }

    #[tokio::test]
    async fn test_core_settings_and_redis_secret() {
        let client = MockClusterClient::new();
        testing::insert_secret(
            &client,
            &testing::typed_secret("redis-pw", "goharbor.io/redis", &[("redis-password", "s3cret")]),
        );
        let ctx = testing::context(&client, OperatorConfig::default());
        let core = core();
        let mut graph = testing::graph();
        CoreResources
            .add_resources(&ctx, &core, &core.spec, &mut graph)
            .await
            .unwrap();

        let data = testing::config_data(&graph, "demo-core");
        assert_eq!(data["EXT_ENDPOINT"], "https://harbor.example");
        assert_eq!(data["POSTGRESQL_HOST"], "db");
        assert_eq!(data["POSTGRESQL_MAX_OPEN_CONNS"], "1000");
        assert_eq!(data["WITH_TRIVY"], "true");
        assert_eq!(data["WITH_CHARTMUSEUM"], "false");
        assert_eq!(data["CORE_URL"], "http://demo-core");
        assert!(data[APP_CONF].contains("httpport = 8080"));

        let secret = testing::secret_data(&graph, "demo-core");
        assert_eq!(secret["_REDIS_URL_CORE"], "redis://:s3cret@redis:6379/0");
        assert_eq!(secret["_REDIS_URL_REG"], "redis://:s3cret@redis:6379/2");

        let pod = testing::deployment(&graph, "demo-core").spec.unwrap().template.spec.unwrap();
        let env: Vec<_> = pod.containers[0].env.clone().unwrap().into_iter().map(|e| e.name).collect();
        for expected in ["CORE_SECRET", "CSRF_KEY", "HARBOR_ADMIN_PASSWORD", "POSTGRESQL_PASSWORD"] {
            assert!(env.contains(&expected.to_string()), "{expected} missing");
        }
        testing::assert_deployments_depend_on_their_config(&graph);
    }
}
