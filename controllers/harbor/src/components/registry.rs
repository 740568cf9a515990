//! Registry: the distribution server.
//!
//! The storage driver, Redis cache and authentication end up in
//! `config.yml`; credentials stay in their secrets and reach the process as
//! `REGISTRY_*` overrides. `registryctl` mounts the same configuration, so the
//! pod contents are built by [`registry_pod`].

use super::{
    PodParts, Workload, add_config, add_workload, common_settings, env_from_secret, metrics_service_port, storage_volume,
    template, tls_paths,
};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::secret_types::{HTPASSWD_KEY, REDIS_PASSWORD_KEY, REGISTRY_HTTP_SECRET_KEY, SHARED_SECRET_KEY};
use crds::{BlobDescriptorCache, ComponentName, NetworkSpec, Registry, RegistrySpec, RegistryStorageDriver};
use k8s_openapi::api::core::v1::ContainerPort;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

impl Aggregate for Registry {
    const NAME: &'static str = ComponentName::Registry.as_str();
}

pub const CONFIG_FILE: &str = "config.yml";
pub const CONFIG_PATH: &str = "/etc/registry/config.yml";
const HTPASSWD_PATH: &str = "/etc/registry/passwd";
const GCS_KEY_PATH: &str = "/etc/registry/gcs-key.json";
const STORAGE_PATH: &str = "/storage";

const CONFIG_TEMPLATE: &str = r#"version: 0.1
log:
  level: {{ LOG_LEVEL }}
  formatter: {{ LOG_FORMATTER }}
  fields:
    service: registry
storage:
{{ STORAGE }}
  cache:
    blobdescriptor: {{ BLOB_CACHE }}
  maintenance:
    uploadpurging:
      enabled: true
      age: 168h
      interval: 24h
      dryrun: false
  delete:
    enabled: {{ DELETE_ENABLED }}
  redirect:
    disable: {{ REDIRECT_DISABLE }}
http:
  addr: "{{ ADDR }}"
  relativeurls: {{ RELATIVE_URLS }}
{{ HTTP_EXTRA }}
auth:
  htpasswd:
    realm: {{ REALM }}
    path: {{ HTPASSWD_PATH }}
validation:
  disabled: true
compatibility:
  schema1:
    enabled: true
{{ REDIS }}
"#;

/// Indents every non-empty line of `text`.
pub(crate) fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|line| if line.is_empty() { String::new() } else { format!("{pad}{line}") })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn yaml(value: &Value) -> Result<String, ControllerError> {
    serde_yaml::to_string(value).map_err(|e| ControllerError::Render(e.to_string()))
}

pub(crate) fn insert_opt<T: Into<Value>>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}

/// `storage.<driver>` section; credentials are added to `parts.env`.
fn storage_section(driver: &RegistryStorageDriver, parts: &mut PodParts) -> Map<String, Value> {
    let mut params = Map::new();
    match driver {
        RegistryStorageDriver::FileSystem(fs) => {
            params.insert("rootdirectory".into(), STORAGE_PATH.into());
            insert_opt(&mut params, "maxthreads", fs.max_threads);
            let (volume, sub_path) = storage_volume("registry-storage", fs.volume.as_ref());
            parts.mount_volume(volume, STORAGE_PATH, sub_path);
        }
        RegistryStorageDriver::InMemory(_) => {}
        RegistryStorageDriver::S3(s3) => {
            params.insert("region".into(), s3.region.clone().into());
            params.insert("bucket".into(), s3.bucket.clone().into());
            insert_opt(&mut params, "accesskey", s3.access_key.clone());
            insert_opt(&mut params, "regionendpoint", s3.region_endpoint.clone());
            params.insert("encrypt".into(), s3.encrypt.into());
            insert_opt(&mut params, "keyid", s3.key_id.clone());
            insert_opt(&mut params, "secure", s3.secure);
            params.insert("skipverify".into(), s3.skip_verify.into());
            insert_opt(&mut params, "v4auth", s3.v4_auth);
            insert_opt(&mut params, "chunksize", s3.chunk_size);
            insert_opt(&mut params, "rootdirectory", s3.root_directory.clone());
            insert_opt(&mut params, "storageclass", s3.storage_class.clone());
            if let Some(secret) = &s3.secret_key_ref {
                parts.env.push(env_from_secret("REGISTRY_STORAGE_S3_SECRETKEY", secret, SHARED_SECRET_KEY));
            }
        }
        RegistryStorageDriver::Swift(swift) => {
            params.insert("authurl".into(), swift.auth_url.clone().into());
            params.insert("username".into(), swift.username.clone().into());
            params.insert("container".into(), swift.container.clone().into());
            insert_opt(&mut params, "region", swift.region.clone());
            insert_opt(&mut params, "tenant", swift.tenant.clone());
            insert_opt(&mut params, "domain", swift.domain.clone());
            insert_opt(&mut params, "authversion", swift.auth_version.clone());
            params.insert("insecureskipverify".into(), swift.insecure_skip_verify.into());
            insert_opt(&mut params, "chunksize", swift.chunk_size.clone());
            insert_opt(&mut params, "prefix", swift.prefix.clone());
            parts.env.push(env_from_secret(
                "REGISTRY_STORAGE_SWIFT_PASSWORD",
                &swift.password_ref,
                SHARED_SECRET_KEY,
            ));
        }
        RegistryStorageDriver::Azure(azure) => {
            params.insert("accountname".into(), azure.account_name.clone().into());
            params.insert("container".into(), azure.container.clone().into());
            insert_opt(&mut params, "realm", azure.base_url.clone());
            insert_opt(&mut params, "rootdirectory", azure.path_prefix.clone());
            parts.env.push(env_from_secret(
                "REGISTRY_STORAGE_AZURE_ACCOUNTKEY",
                &azure.account_key_ref,
                SHARED_SECRET_KEY,
            ));
        }
        RegistryStorageDriver::Gcs(gcs) => {
            params.insert("bucket".into(), gcs.bucket.clone().into());
            params.insert("keyfile".into(), GCS_KEY_PATH.into());
            insert_opt(&mut params, "rootdirectory", gcs.root_directory.clone());
            insert_opt(&mut params, "chunksize", gcs.chunk_size);
            parts.mount_secret_file("gcs-key", &gcs.key_data_ref, SHARED_SECRET_KEY, GCS_KEY_PATH);
        }
        RegistryStorageDriver::Oss(oss) => {
            params.insert("accesskeyid".into(), oss.access_key_id.clone().into());
            params.insert("region".into(), oss.region.clone().into());
            params.insert("bucket".into(), oss.bucket.clone().into());
            insert_opt(&mut params, "endpoint", oss.endpoint.clone());
            params.insert("internal".into(), oss.internal.into());
            params.insert("encrypt".into(), oss.encrypt.into());
            insert_opt(&mut params, "secure", oss.secure);
            insert_opt(&mut params, "chunksize", oss.chunk_size.clone());
            insert_opt(&mut params, "rootdirectory", oss.root_directory.clone());
            parts.env.push(env_from_secret(
                "REGISTRY_STORAGE_OSS_ACCESSKEYSECRET",
                &oss.access_secret_ref,
                SHARED_SECRET_KEY,
            ));
        }
    }
    let mut section = Map::new();
    section.insert(driver.variant_name().to_string(), Value::Object(params));
    section
}

/// Renders `config.yml` of `spec` and adds the volumes and credentials it
/// needs to `parts`.
pub async fn registry_pod(ctx: &PassContext, spec: &RegistrySpec, parts: &mut PodParts) -> Result<String, ControllerError> {
    let tls = spec.tls.is_some();
    let bind = spec.network.as_ref().map_or("0.0.0.0", NetworkSpec::bind_address);
    let storage = yaml(&Value::Object(storage_section(&spec.storage.driver, parts)))?;

    let mut http_extra = String::new();
    if let Some(metrics) = spec.metrics.as_ref().filter(|m| m.enabled) {
        http_extra.push_str(&indent(
            &yaml(&json!({
                "debug": {
                    "addr": format!(":{}", metrics.port),
                    "prometheus": {"enabled": true, "path": metrics.path},
                }
            }))?,
            2,
        ));
        http_extra.push('\n');
    }
    if tls {
        let paths = tls_paths(ComponentName::Registry);
        http_extra.push_str(&indent(
            &yaml(&json!({
                "tls": {
                    "certificate": paths.cert,
                    "key": paths.key,
                    "clientcas": [paths.ca],
                }
            }))?,
            2,
        ));
    }

    let redis = match &spec.redis {
        Some(redis) => {
            let mut section = Map::new();
            section.insert("addr".into(), redis.address().into());
            section.insert("db".into(), redis.database.into());
            insert_opt(&mut section, "sentinelMasterSet", redis.server.sentinel_master_set.clone());
            if let Some(password) = &redis.password_ref {
                parts.env.push(env_from_secret("REGISTRY_REDIS_PASSWORD", password, REDIS_PASSWORD_KEY));
            }
            yaml(&json!({ "redis": section }))?
        }
        None => String::new(),
    };

    parts.env.push(env_from_secret(
        "REGISTRY_HTTP_SECRET",
        &spec.http.secret_ref,
        REGISTRY_HTTP_SECRET_KEY,
    ));
    parts.mount_secret_file(
        "htpasswd",
        &spec.authentication.htpasswd.secret_ref,
        HTPASSWD_KEY,
        HTPASSWD_PATH,
    );

    let blob_cache = match spec.storage.cache.blobdescriptor {
        Some(BlobDescriptorCache::Redis) => "redis",
        _ => "inmemory",
    };
    let values = BTreeMap::from([
        ("LOG_LEVEL", spec.log.level.as_str().to_string()),
        ("LOG_FORMATTER", spec.log.formatter.clone()),
        ("STORAGE", indent(&storage, 2)),
        ("BLOB_CACHE", blob_cache.to_string()),
        ("DELETE_ENABLED", spec.storage.delete_enabled.to_string()),
        ("REDIRECT_DISABLE", spec.storage.redirect.disable.to_string()),
        (
            "ADDR",
            format!(
                "{}:{}",
                if bind == "::" { "[::]" } else { "" },
                ComponentName::Registry.container_port(tls)
            ),
        ),
        ("RELATIVE_URLS", spec.http.relative_urls.to_string()),
        ("HTTP_EXTRA", http_extra),
        ("REALM", spec.authentication.htpasswd.realm.clone()),
        ("HTPASSWD_PATH", HTPASSWD_PATH.to_string()),
        ("REDIS", redis),
    ]);
    template::render_for(&ctx.config, Registry::NAME, CONFIG_TEMPLATE, &values).await
}

/// Reconciles `Registry` resources.
#[derive(Debug, Default)]
pub struct RegistryResources;

#[async_trait]
impl ResourceBuilder<Registry> for RegistryResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        registry: &Registry,
        spec: &RegistrySpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let workload = Workload::new(ComponentName::Registry, &registry.metadata, &spec.component)
            .tls(spec.tls.as_ref())
            .injection(&spec.certificate_injection)
            .network(spec.network.as_ref());
        let name = workload.name;

        let mut parts = PodParts::default();
        let config = registry_pod(ctx, spec, &mut parts).await?;

        let mut env = BTreeMap::new();
        common_settings(
            ComponentName::Registry,
            spec.proxy.as_ref(),
            spec.trace.as_ref(),
            &mut env,
            &mut parts.env,
        );
        if let Some(metrics) = spec.metrics.as_ref().filter(|m| m.enabled) {
            parts.extra_ports.push(ContainerPort {
                name: Some("metrics".to_string()),
                container_port: metrics.port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            });
        }

        let files = BTreeMap::from([(CONFIG_FILE.to_string(), config)]);
        let consumes = add_config(graph, name, env, files, BTreeMap::new(), &mut parts)?;
        parts.mount_config_file(name, CONFIG_FILE, CONFIG_PATH);
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

    fn registry(storage: Value, redis: bool) -> Registry {
        let mut raw = json!({
            "http": {"secretRef": "registry-http"},
            "authentication": {"htpasswd": {"secretRef": "registry-htpasswd"}},
            "storage": storage,
        });
        if redis {
            raw["redis"] = json!({"host": "redis", "port": 6379, "database": 2, "passwordRef": "redis-pw"});
        }
        let spec: RegistrySpec = serde_json::from_value(raw).unwrap();
        let mut registry = Registry::new("demo-registry", crds::defaults_for(&spec));
        registry.metadata = testing::meta("demo-registry");
        registry
    }

    async fn build(registry: &Registry) -> WorkGraph {
        let client = MockClusterClient::new();
        let ctx = testing::context(&client, OperatorConfig::default());
        let mut graph = testing::graph();
        RegistryResources
            .add_resources(&ctx, registry, &registry.spec, &mut graph)
            .await
            .unwrap();
        graph
    }

    #[test]
    fn test_indent_skips_blank_lines() {
        assert_eq!(indent("a:\n\n  b: 1", 2), "  a:\n\n    b: 1");
    }

    #[tokio::test]
    async fn test_filesystem_storage_mounts_the_claim() {
        let registry = registry(json!({"filesystem": {"volume": {"claimName": "reg-pvc"}}}), false);
        let graph = build(&registry).await;

        let config = &testing::config_data(&graph, "demo-registry")[CONFIG_FILE];
        let parsed: serde_yaml::Value = serde_yaml::from_str(config).unwrap();
        assert_eq!(parsed["storage"]["filesystem"]["rootdirectory"].as_str(), Some("/storage"));
        assert_eq!(parsed["storage"]["cache"]["blobdescriptor"].as_str(), Some("inmemory"));
        assert_eq!(parsed["http"]["addr"].as_str(), Some(":5000"));
        assert!(parsed.get("redis").is_none());

        let pod = testing::deployment(&graph, "demo-registry").spec.unwrap().template.spec.unwrap();
        let claims: Vec<_> = pod
            .volumes
            .unwrap()
            .into_iter()
            .filter_map(|v| v.persistent_volume_claim.map(|c| c.claim_name))
            .collect();
        assert_eq!(claims, vec!["reg-pvc".to_string()]);
        testing::assert_deployments_depend_on_their_config(&graph);
    }

    #[tokio::test]
    async fn test_redis_cache_and_s3_credentials() {
        let registry = registry(
            json!({"s3": {"region": "eu-west-1", "bucket": "images", "secretKeyRef": "s3-key"}}),
            true,
        );
        let graph = build(&registry).await;

        let config = &testing::config_data(&graph, "demo-registry")[CONFIG_FILE];
        let parsed: serde_yaml::Value = serde_yaml::from_str(config).unwrap();
        assert_eq!(parsed["storage"]["s3"]["bucket"].as_str(), Some("images"));
        assert_eq!(parsed["storage"]["cache"]["blobdescriptor"].as_str(), Some("redis"));
        assert_eq!(parsed["redis"]["addr"].as_str(), Some("redis:6379"));
        assert_eq!(parsed["redis"]["db"].as_i64(), Some(2));

        let pod = testing::deployment(&graph, "demo-registry").spec.unwrap().template.spec.unwrap();
        let env: Vec<_> = pod.containers[0]
            .env
            .clone()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(env.contains(&"REGISTRY_STORAGE_S3_SECRETKEY".to_string()));
        assert!(env.contains(&"REGISTRY_REDIS_PASSWORD".to_string()));
        assert!(env.contains(&"REGISTRY_HTTP_SECRET".to_string()));
    }
}
