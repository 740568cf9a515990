//! Trivy: the vulnerability scanner adapter.

use super::{
    PodParts, Workload, add_config, add_workload, common_settings, env_from_secret, redis_url, storage_volume,
    tls_paths,
};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::secret_types::GITHUB_TOKEN_KEY;
use crds::{ComponentName, Trivy, TrivySpec};
use std::collections::BTreeMap;

impl Aggregate for Trivy {
    const NAME: &'static str = ComponentName::Trivy.as_str();
}

const CACHE_DIR: &str = "/home/scanner/.cache/trivy";
const REPORTS_DIR: &str = "/home/scanner/.cache/reports";

/// Reconciles `Trivy` resources.
#[derive(Debug, Default)]
pub struct TrivyResources;

fn settings(workload: &Workload<'_>, spec: &TrivySpec) -> BTreeMap<String, String> {
    let server = &spec.server;
    let redis = &spec.redis;
    let mut data: BTreeMap<String, String> = [
        ("SCANNER_LOG_LEVEL", spec.log.level.as_str().to_string()),
        (
            "SCANNER_API_SERVER_ADDR",
            format!(":{}", workload.container_port()),
        ),
        ("SCANNER_API_SERVER_READ_TIMEOUT", server.read_timeout.to_string()),
        ("SCANNER_API_SERVER_WRITE_TIMEOUT", server.write_timeout.to_string()),
        ("SCANNER_API_SERVER_IDLE_TIMEOUT", server.idle_timeout.to_string()),
        ("SCANNER_TRIVY_CACHE_DIR", CACHE_DIR.to_string()),
        ("SCANNER_TRIVY_REPORTS_DIR", REPORTS_DIR.to_string()),
        ("SCANNER_TRIVY_DEBUG_MODE", server.debug_mode.to_string()),
        ("SCANNER_TRIVY_VULN_TYPE", server.vulnerability_types.join(",")),
        ("SCANNER_TRIVY_SEVERITY", server.severities.join(",")),
        ("SCANNER_TRIVY_IGNORE_UNFIXED", server.ignore_unfixed.to_string()),
        ("SCANNER_TRIVY_INSECURE", server.insecure.to_string()),
        ("SCANNER_TRIVY_OFFLINE_SCAN", server.offline_scan.to_string()),
        ("SCANNER_TRIVY_SKIP_UPDATE", spec.update.skip.to_string()),
        ("SCANNER_TRIVY_TIMEOUT", server.timeout.to_string()),
        ("SCANNER_STORE_REDIS_NAMESPACE", redis.namespace.clone()),
        ("SCANNER_STORE_REDIS_SCAN_JOB_TTL", redis.jobs.scan_job_ttl.to_string()),
        ("SCANNER_JOB_QUEUE_REDIS_NAMESPACE", redis.jobs.namespace.clone()),
        ("SCANNER_REDIS_POOL_MAX_ACTIVE", redis.pool.max_active.to_string()),
        ("SCANNER_REDIS_POOL_MAX_IDLE", redis.pool.max_idle.to_string()),
        ("SCANNER_REDIS_POOL_IDLE_TIMEOUT", redis.pool.idle_timeout.to_string()),
        (
            "SCANNER_REDIS_POOL_CONNECTION_TIMEOUT",
            redis.pool.connection_timeout.to_string(),
        ),
        ("SCANNER_REDIS_POOL_READ_TIMEOUT", redis.pool.read_timeout.to_string()),
        ("SCANNER_REDIS_POOL_WRITE_TIMEOUT", redis.pool.write_timeout.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    if workload.has_tls() {
        let paths = tls_paths(ComponentName::Trivy);
        data.insert("SCANNER_API_SERVER_TLS_CERTIFICATE".to_string(), paths.cert);
        data.insert("SCANNER_API_SERVER_TLS_KEY".to_string(), paths.key);
        data.insert("SCANNER_API_SERVER_CLIENTCAS".to_string(), paths.ca);
    }
    data
}

#[async_trait]
impl ResourceBuilder<Trivy> for TrivyResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        trivy: &Trivy,
        spec: &TrivySpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let workload = Workload::new(ComponentName::Trivy, &trivy.metadata, &spec.component)
            .tls(spec.tls.as_ref())
            .injection(&spec.certificate_injection)
            .network(spec.network.as_ref());
        let name = workload.name;
        let mut parts = PodParts::default();

        let mut env = settings(&workload, spec);
        common_settings(ComponentName::Trivy, spec.proxy.as_ref(), None, &mut env, &mut parts.env);

        // Store and job queue share one connection.
        let url = redis_url(ctx, &spec.redis.connection).await?;
        let secret_env = BTreeMap::from([
            ("SCANNER_REDIS_URL".to_string(), url.clone()),
            ("SCANNER_STORE_REDIS_URL".to_string(), url.clone()),
            ("SCANNER_JOB_QUEUE_REDIS_URL".to_string(), url),
        ]);
        if let Some(github) = &spec.update.github_token_ref {
            parts.env.push(env_from_secret("SCANNER_TRIVY_GITHUB_TOKEN", github, GITHUB_TOKEN_KEY));
        }

        let (cache, sub_path) = storage_volume("cache", spec.storage.cache.as_ref());
        parts.mount_volume(cache, CACHE_DIR, sub_path);
        let (reports, sub_path) = storage_volume("reports", spec.storage.reports.as_ref());
        parts.mount_volume(reports, REPORTS_DIR, sub_path);

        let consumes = add_config(graph, name, env, BTreeMap::new(), secret_env, &mut parts)?;
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
    use serde_json::json;

    fn trivy(extra: serde_json::Value) -> Trivy {
        let mut raw = json!({"redis": {"host": "redis", "passwordRef": "redis-pw", "database": 5}});
        if let (Some(raw), Some(extra)) = (raw.as_object_mut(), extra.as_object()) {
            raw.extend(extra.clone());
        }
        let mut trivy = Trivy::new("demo-trivy", serde_json::from_value(raw).unwrap());
        trivy.metadata = testing::meta("demo-trivy");
        trivy
    }

    async fn build(trivy: &Trivy) -> WorkGraph {
        let client = MockClusterClient::new();
        testing::insert_secret(
            &client,
            &testing::typed_secret("redis-pw", "goharbor.io/redis", &[("redis-password", "pw")]),
        );
        let ctx = testing::context(&client, OperatorConfig::default());
        let mut graph = testing::graph();
        TrivyResources
            .add_resources(&ctx, trivy, &trivy.spec, &mut graph)
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_defaults_and_redis_urls() {
        let graph = build(&trivy(json!({}))).await;
        let data = testing::config_data(&graph, "demo-trivy");
        assert_eq!(data["SCANNER_API_SERVER_ADDR"], ":8080");
        assert_eq!(data["SCANNER_TRIVY_VULN_TYPE"], "os,library");
        assert_eq!(data["SCANNER_TRIVY_SEVERITY"], "UNKNOWN,LOW,MEDIUM,HIGH,CRITICAL");
        assert_eq!(data["SCANNER_STORE_REDIS_NAMESPACE"], "harbor.scanner.trivy:store");

        let secret = testing::secret_data(&graph, "demo-trivy");
        assert_eq!(secret["SCANNER_REDIS_URL"], "redis://:pw@redis:6379/5");
        assert_eq!(secret["SCANNER_JOB_QUEUE_REDIS_URL"], secret["SCANNER_REDIS_URL"]);
        testing::assert_deployments_depend_on_their_config(&graph);
    }

    #[tokio::test]
    async fn test_storage_volumes_and_github_token() {
        let graph = build(&trivy(json!({
            "storage": {"reports": {"claimName": "trivy-reports"}},
            "update": {"githubTokenRef": "github"},
        })))
        .await;
        let pod = testing::deployment(&graph, "demo-trivy").spec.unwrap().template.spec.unwrap();
        let volumes = pod.volumes.unwrap();
        let cache = volumes.iter().find(|v| v.name == "cache").unwrap();
        assert!(cache.empty_dir.is_some());
        let reports = volumes.iter().find(|v| v.name == "reports").unwrap();
        assert_eq!(reports.persistent_volume_claim.as_ref().unwrap().claim_name, "trivy-reports");

        let env = pod.containers[0].env.as_ref().unwrap();
        let token = env.iter().find(|e| e.name == "SCANNER_TRIVY_GITHUB_TOKEN").unwrap();
        let selector = token.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(selector.name, "github");
        assert_eq!(selector.key, GITHUB_TOKEN_KEY);
    }
}
