//! ChartMuseum: Helm chart repository behind core.
//!
//! ChartMuseum is configured through its environment only.

use super::{
    PodParts, Workload, add_config, add_workload, common_settings, env_from_secret, redis_password, storage_volume,
    tls_paths,
};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::secret_types::{SHARED_SECRET_KEY, TLS_CERT_KEY};
use crds::{ChartMuseum, ChartMuseumSpec, ChartStorageDriver, ComponentName, GoDuration};
use std::collections::BTreeMap;

impl Aggregate for ChartMuseum {
    const NAME: &'static str = ComponentName::ChartMuseum.as_str();
}

const STORAGE_PATH: &str = "/chart_storage";
const GCS_KEY_PATH: &str = "/etc/chartmuseum/gcs-key.json";
const BEARER_CERT_PATH: &str = "/etc/chartmuseum/token/tls.crt";

/// Reconciles `ChartMuseum` resources.
#[derive(Debug, Default)]
pub struct ChartMuseumResources;

fn seconds(duration: &GoDuration) -> Result<String, ControllerError> {
    duration
        .parse()
        .map(|d| d.as_secs().to_string())
        .map_err(|e| ControllerError::Render(format!("invalid duration {duration}: {e}")))
}

fn set(data: &mut BTreeMap<String, String>, key: &str, value: impl ToString) {
    data.insert(key.to_string(), value.to_string());
}

fn set_opt(data: &mut BTreeMap<String, String>, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        set(data, key, value);
    }
}

/// `STORAGE_*` settings of the chart backend.
fn storage_settings(driver: &ChartStorageDriver, data: &mut BTreeMap<String, String>, parts: &mut PodParts) {
    set(data, "STORAGE", driver.storage_name());
    match driver {
        ChartStorageDriver::FileSystem(fs) => {
            set(data, "STORAGE_LOCAL_ROOTDIR", STORAGE_PATH);
            let (volume, sub_path) = storage_volume("chart-storage", fs.volume.as_ref());
            parts.mount_volume(volume, STORAGE_PATH, sub_path);
        }
        ChartStorageDriver::S3(s3) => {
            set(data, "STORAGE_AMAZON_BUCKET", &s3.bucket);
            set(data, "STORAGE_AMAZON_REGION", &s3.region);
            set_opt(data, "STORAGE_AMAZON_PREFIX", s3.root_directory.as_ref());
            set_opt(data, "STORAGE_AMAZON_ENDPOINT", s3.region_endpoint.as_ref());
            set_opt(data, "STORAGE_AMAZON_SSE", s3.key_id.as_ref());
            set_opt(data, "AWS_ACCESS_KEY_ID", s3.access_key.as_ref());
            if let Some(secret) = &s3.secret_key_ref {
                parts.env.push(env_from_secret("AWS_SECRET_ACCESS_KEY", secret, SHARED_SECRET_KEY));
            }
        }
        ChartStorageDriver::Swift(swift) => {
            set(data, "STORAGE_OPENSTACK_CONTAINER", &swift.container);
            set_opt(data, "STORAGE_OPENSTACK_PREFIX", swift.prefix.as_ref());
            set_opt(data, "STORAGE_OPENSTACK_REGION", swift.region.as_ref());
            set(data, "OS_AUTH_URL", &swift.auth_url);
            set(data, "OS_USERNAME", &swift.username);
            set_opt(data, "OS_PROJECT_NAME", swift.tenant.as_ref());
            set_opt(data, "OS_DOMAIN_NAME", swift.domain.as_ref());
            parts.env.push(env_from_secret("OS_PASSWORD", &swift.password_ref, SHARED_SECRET_KEY));
        }
        ChartStorageDriver::Azure(azure) => {
            set(data, "STORAGE_MICROSOFT_CONTAINER", &azure.container);
            set_opt(data, "STORAGE_MICROSOFT_PREFIX", azure.path_prefix.as_ref());
            set(data, "AZURE_STORAGE_ACCOUNT", &azure.account_name);
            parts.env.push(env_from_secret(
                "AZURE_STORAGE_ACCESS_KEY",
                &azure.account_key_ref,
                SHARED_SECRET_KEY,
            ));
        }
        ChartStorageDriver::Gcs(gcs) => {
            set(data, "STORAGE_GOOGLE_BUCKET", &gcs.bucket);
            set_opt(data, "STORAGE_GOOGLE_PREFIX", gcs.root_directory.as_ref());
            set(data, "GOOGLE_APPLICATION_CREDENTIALS", GCS_KEY_PATH);
            parts.mount_secret_file("gcs-key", &gcs.key_data_ref, SHARED_SECRET_KEY, GCS_KEY_PATH);
        }
        ChartStorageDriver::Oss(oss) => {
            set(data, "STORAGE_ALIBABA_BUCKET", &oss.bucket);
            set_opt(data, "STORAGE_ALIBABA_PREFIX", oss.root_directory.as_ref());
            set_opt(data, "STORAGE_ALIBABA_ENDPOINT", oss.endpoint.as_ref());
            if oss.encrypt {
                set(data, "STORAGE_ALIBABA_SSE", "AES256");
            }
            set(data, "ALIBABA_CLOUD_ACCESS_KEY_ID", &oss.access_key_id);
            parts.env.push(env_from_secret(
                "ALIBABA_CLOUD_ACCESS_KEY_SECRET",
                &oss.access_secret_ref,
                SHARED_SECRET_KEY,
            ));
        }
    }
}

fn server_settings(
    workload: &Workload<'_>,
    spec: &ChartMuseumSpec,
    data: &mut BTreeMap<String, String>,
) -> Result<(), ControllerError> {
    let chart = &spec.chart;
    set(data, "PORT", workload.container_port());
    set(data, "CHART_URL", &chart.url);
    set(data, "CONTEXT_PATH", "");
    set(data, "CHART_POST_FORM_FIELD_NAME", "chart");
    set(data, "PROV_POST_FORM_FIELD_NAME", "prov");
    set(data, "ALLOW_OVERWRITE", chart.allow_overwrite);
    set(data, "ENFORCE_SEMVER2", chart.semantic_versioning2_only);
    set(data, "DEPTH", chart.depth);
    set(data, "INDEX_LIMIT", chart.index_limit);
    set(data, "MAX_STORAGE_OBJECTS", chart.max_storage_objects);
    set(data, "STORAGE_TIMESTAMP_TOLERANCE", &chart.storage_timestamp_tolerance);
    set(data, "DISABLE_API", chart.disable.api);
    set(data, "DISABLE_DELETE", chart.disable.delete);
    set(data, "DISABLE_FORCE_OVERWRITE", chart.disable.force_overwrite);
    set(data, "DISABLE_METRICS", chart.disable.metrics);
    set(data, "DISABLE_STATEFILES", chart.disable.statefiles);

    set(data, "MAX_UPLOAD_SIZE", spec.server.max_upload_size);
    set(data, "READ_TIMEOUT", seconds(&spec.server.read_timeout)?);
    set(data, "WRITE_TIMEOUT", seconds(&spec.server.write_timeout)?);
    set_opt(data, "CORS_ALLOW_ORIGIN", spec.server.cors_allow_origin.as_ref());

    set(data, "DEBUG", spec.log.debug);
    set(data, "LOG_JSON", spec.log.json);
    set(data, "LOG_HEALTH", false);
    set(data, "LOG_LATENCY_INTEGER", false);

    if workload.has_tls() {
        let paths = tls_paths(ComponentName::ChartMuseum);
        set(data, "TLS_CERT", paths.cert);
        set(data, "TLS_KEY", paths.key);
    }
    Ok(())
}

fn auth_settings(spec: &ChartMuseumSpec, data: &mut BTreeMap<String, String>, parts: &mut PodParts) {
    let auth = &spec.authentication;
    set(data, "AUTH_ANONYMOUS_GET", auth.anonymous_get);
    if let Some(basic) = &auth.basic {
        set(data, "BASIC_AUTH_USER", &basic.username);
        parts.env.push(env_from_secret("BASIC_AUTH_PASS", &basic.password_ref, SHARED_SECRET_KEY));
    }
    if let Some(bearer) = &auth.bearer {
        set(data, "BEARER_AUTH", true);
        set(data, "AUTH_REALM", &bearer.realm);
        set(data, "AUTH_SERVICE", &bearer.service);
        set(data, "AUTH_CERT_PATH", BEARER_CERT_PATH);
        parts.mount_secret_file("token-certificate", &bearer.certificate_ref, TLS_CERT_KEY, BEARER_CERT_PATH);
    }
}

#[async_trait]
impl ResourceBuilder<ChartMuseum> for ChartMuseumResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        chartmuseum: &ChartMuseum,
        spec: &ChartMuseumSpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let workload = Workload::new(ComponentName::ChartMuseum, &chartmuseum.metadata, &spec.component)
            .tls(spec.tls.as_ref())
            .injection(&spec.certificate_injection)
            .network(spec.network.as_ref());
        let name = workload.name;
        let mut parts = PodParts::default();

        let mut env = BTreeMap::new();
        server_settings(&workload, spec, &mut env)?;
        auth_settings(spec, &mut env, &mut parts);
        storage_settings(&spec.chart.storage.driver, &mut env, &mut parts);
        common_settings(
            ComponentName::ChartMuseum,
            spec.proxy.as_ref(),
            spec.trace.as_ref(),
            &mut env,
            &mut parts.env,
        );

        let mut secret_env = BTreeMap::new();
        match spec.cache.as_ref().and_then(|c| c.redis.as_ref()) {
            Some(redis) => {
                set(&mut env, "CACHE", "redis");
                set(&mut env, "CACHE_REDIS_ADDR", redis.address());
                set(&mut env, "CACHE_REDIS_DB", redis.database);
                if let Some(password) = redis_password(ctx, redis).await? {
                    set(&mut secret_env, "CACHE_REDIS_PASSWORD", password);
                }
            }
            None => set(&mut env, "CACHE", ""),
        }

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
    use k8s_openapi::api::core::v1::EnvVar;
    use serde_json::{Value, json};

    fn secret_env_names(env: &[EnvVar]) -> Vec<&str> {
        env.iter()
            .filter(|e| e.value_from.is_some())
            .map(|e| e.name.as_str())
            .collect()
    }

    fn chartmuseum(storage: Value, extra: Value) -> ChartMuseum {
        let mut raw = json!({
            "chart": {"url": "https://harbor.example/chartrepo", "storage": storage},
            "authentication": {"basic": {"passwordRef": "chart-pw"}},
        });
        if let (Some(raw), Some(extra)) = (raw.as_object_mut(), extra.as_object()) {
            raw.extend(extra.clone());
        }
        let spec: ChartMuseumSpec = serde_json::from_value(raw).unwrap();
        let mut chartmuseum = ChartMuseum::new("demo-chartmuseum", spec);
        chartmuseum.metadata = testing::meta("demo-chartmuseum");
        chartmuseum
    }

    async fn build(chartmuseum: &ChartMuseum, client: &MockClusterClient) -> WorkGraph {
        let ctx = testing::context(client, OperatorConfig::default());
        let mut graph = testing::graph();
        ChartMuseumResources
            .add_resources(&ctx, chartmuseum, &chartmuseum.spec, &mut graph)
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_local_storage_uses_the_claim_prefix() {
        let chartmuseum = chartmuseum(
            json!({"filesystem": {"volume": {"claimName": "reg-pvc", "prefix": "chartmuseum"}}}),
            json!({}),
        );
        let graph = build(&chartmuseum, &MockClusterClient::new()).await;

        let data = testing::config_data(&graph, "demo-chartmuseum");
        assert_eq!(data["STORAGE"], "local");
        assert_eq!(data["STORAGE_LOCAL_ROOTDIR"], STORAGE_PATH);
        assert_eq!(data["BASIC_AUTH_USER"], "chart_controller");
        assert_eq!(data["MAX_UPLOAD_SIZE"], "20971520");
        assert_eq!(data["CACHE"], "");

        let pod = testing::deployment(&graph, "demo-chartmuseum").spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];
        let mount = container
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .find(|m| m.mount_path == STORAGE_PATH)
            .unwrap();
        assert_eq!(mount.sub_path.as_deref(), Some("chartmuseum"));
        assert_eq!(secret_env_names(container.env.as_ref().unwrap()), vec!["BASIC_AUTH_PASS"]);
        testing::assert_deployments_depend_on_their_config(&graph);
    }

    #[tokio::test]
    async fn test_s3_with_redis_cache() {
        let client = MockClusterClient::new();
        testing::insert_secret(
            &client,
            &testing::typed_secret("redis-pw", "goharbor.io/redis", &[("redis-password", "pw")]),
        );
        let chartmuseum = chartmuseum(
            json!({"s3": {"region": "eu-west-1", "bucket": "charts", "accessKey": "AK", "secretKeyRef": "s3-key"}}),
            json!({"cache": {"redis": {"host": "redis", "passwordRef": "redis-pw", "database": 3}}}),
        );
        let graph = build(&chartmuseum, &client).await;

        let data = testing::config_data(&graph, "demo-chartmuseum");
        assert_eq!(data["STORAGE"], "amazon");
        assert_eq!(data["STORAGE_AMAZON_BUCKET"], "charts");
        assert_eq!(data["AWS_ACCESS_KEY_ID"], "AK");
        assert_eq!(data["CACHE_REDIS_ADDR"], "redis:6379");
        assert_eq!(data["CACHE_REDIS_DB"], "3");
        assert_eq!(testing::secret_data(&graph, "demo-chartmuseum")["CACHE_REDIS_PASSWORD"], "pw");

        let pod = testing::deployment(&graph, "demo-chartmuseum").spec.unwrap().template.spec.unwrap();
        let names = secret_env_names(pod.containers[0].env.as_ref().unwrap());
        assert!(names.contains(&"AWS_SECRET_ACCESS_KEY"));
        testing::assert_deployments_depend_on_their_config(&graph);
    }
}
