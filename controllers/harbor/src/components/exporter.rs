//! Exporter: Prometheus metrics about projects, quotas and jobs.

use super::{PodParts, Workload, add_config, add_workload, env_from_secret, tls_paths};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::secret_types::POSTGRESQL_PASSWORD_KEY;
use crds::{ComponentName, Exporter, ExporterSpec};
use std::collections::BTreeMap;
use url::Url;

impl Aggregate for Exporter {
    const NAME: &'static str = ComponentName::Exporter.as_str();
}

/// Reconciles `Exporter` resources.
#[derive(Debug, Default)]
pub struct ExporterResources;

fn settings(workload: &Workload<'_>, spec: &ExporterSpec) -> Result<BTreeMap<String, String>, ControllerError> {
    let core = Url::parse(&spec.core.url)
        .map_err(|e| ControllerError::Render(format!("invalid core URL {:?}: {e}", spec.core.url)))?;
    let database = &spec.database;
    let mut data: BTreeMap<String, String> = [
        ("LOG_LEVEL", spec.log.level.as_str().to_string()),
        ("HARBOR_EXPORTER_PORT", workload.container_port().to_string()),
        ("HARBOR_EXPORTER_METRICS_PATH", spec.path.clone()),
        ("HARBOR_EXPORTER_METRICS_ENABLED", "true".to_string()),
        ("HARBOR_EXPORTER_CACHE_TIME", spec.cache.duration.to_string()),
        ("HARBOR_EXPORTER_CACHE_CLEAN_INTERVAL", spec.cache.clean_period.to_string()),
        ("HARBOR_METRIC_NAMESPACE", "harbor".to_string()),
        ("HARBOR_METRIC_SUBSYSTEM", "exporter".to_string()),
        ("HARBOR_SERVICE_SCHEME", core.scheme().to_string()),
        ("HARBOR_SERVICE_HOST", core.host_str().unwrap_or_default().to_string()),
        (
            "HARBOR_SERVICE_PORT",
            core.port_or_known_default().unwrap_or(80).to_string(),
        ),
        ("HARBOR_DATABASE_USERNAME", database.connection.username.clone()),
        ("HARBOR_DATABASE_DBNAME", database.connection.database.clone()),
        ("HARBOR_DATABASE_SSLMODE", database.connection.ssl_mode.as_str().to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    if let Some(primary) = database.connection.primary() {
        data.insert("HARBOR_DATABASE_HOST".to_string(), primary.host.clone());
        data.insert("HARBOR_DATABASE_PORT".to_string(), primary.port().to_string());
    }
    if let Some(max) = database.max_idle_connections {
        data.insert("HARBOR_DATABASE_MAX_IDLE_CONNS".to_string(), max.to_string());
    }
    if let Some(max) = database.max_open_connections {
        data.insert("HARBOR_DATABASE_MAX_OPEN_CONNS".to_string(), max.to_string());
    }
    data.insert("HARBOR_EXPORTER_TLS_ENABLED".to_string(), workload.has_tls().to_string());
    if workload.has_tls() {
        let paths = tls_paths(ComponentName::Exporter);
        data.insert("HARBOR_EXPORTER_TLS_CERT".to_string(), paths.cert);
        data.insert("HARBOR_EXPORTER_TLS_KEY".to_string(), paths.key);
    }
    Ok(data)
}

#[async_trait]
impl ResourceBuilder<Exporter> for ExporterResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        exporter: &Exporter,
        spec: &ExporterSpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let workload = Workload::new(ComponentName::Exporter, &exporter.metadata, &spec.component)
            .tls(spec.tls.as_ref())
            .injection(&spec.certificate_injection)
            .network(spec.network.as_ref())
            .port(spec.port);
        let name = workload.name;
        let mut parts = PodParts::default();

        let env = settings(&workload, spec)?;
        if let Some(password) = &spec.database.connection.password_ref {
            parts.env.push(env_from_secret(
                "HARBOR_DATABASE_PASSWORD",
                password,
                POSTGRESQL_PASSWORD_KEY,
            ));
        }

        let consumes = add_config(graph, name, env, BTreeMap::new(), BTreeMap::new(), &mut parts)?;
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
    use k8s_openapi::api::core::v1::Service;
    use serde_json::json;

    fn exporter(core_url: &str) -> Exporter {
        let spec: ExporterSpec = serde_json::from_value(json!({
            "core": {"url": core_url},
            "database": {
                "hosts": [{"host": "db", "port": 6432}],
                "username": "harbor",
                "passwordRef": "db-pw",
                "database": "core",
            },
            "port": 9100,
        }))
        .unwrap();
        let mut exporter = Exporter::new("demo-exporter", crds::defaults_for(&spec));
        exporter.metadata = testing::meta("demo-exporter");
        exporter
    }

    async fn build(exporter: &Exporter) -> Result<WorkGraph, ControllerError> {
        let client = MockClusterClient::new();
        let ctx = testing::context(&client, OperatorConfig::default());
        let mut graph = testing::graph();
        ExporterResources
            .add_resources(&ctx, exporter, &exporter.spec, &mut graph)
            .await?;
        Ok(graph)
    }

    #[tokio::test]
    async fn test_exporter_reaches_core_and_database() {
        let graph = build(&exporter("https://demo-core")).await.unwrap();
        let data = testing::config_data(&graph, "demo-exporter");
        assert_eq!(data["HARBOR_SERVICE_SCHEME"], "https");
        assert_eq!(data["HARBOR_SERVICE_HOST"], "demo-core");
        assert_eq!(data["HARBOR_SERVICE_PORT"], "443");
        assert_eq!(data["HARBOR_DATABASE_PORT"], "6432");
        assert_eq!(data["HARBOR_DATABASE_MAX_OPEN_CONNS"], "10");
        assert_eq!(data["HARBOR_EXPORTER_PORT"], "9100");
        assert_eq!(data["HARBOR_EXPORTER_CACHE_TIME"], "23");

        let service: Service = testing::node_object(&graph, "Service", "demo-exporter");
        assert_eq!(service.spec.unwrap().ports.unwrap()[0].port, 9100);
        testing::assert_deployments_depend_on_their_config(&graph);
    }

    #[tokio::test]
    async fn test_invalid_core_url_fails_the_pass() {
        let error = build(&exporter("not a url")).await.unwrap_err();
        assert!(matches!(error, ControllerError::Render(_)));
    }
}
