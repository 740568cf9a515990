//! JobService: replication, garbage collection and scan jobs.

use super::registry::{indent, yaml};
use super::{
    PodParts, Workload, add_config, add_workload, common_settings, env_from_secret, internal_tls_settings,
    metrics_service_port, metrics_settings, redis_url, storage_volume, template, tls_paths,
};
use crate::error::ControllerError;
use crate::graph::WorkGraph;
use crate::reconciler::{Aggregate, PassContext, ResourceBuilder};
use async_trait::async_trait;
use crds::secret_types::SHARED_SECRET_KEY;
use crds::{ComponentName, GoDuration, JobLoggersSpec, JobService, JobServiceSpec, LogLevel};
use serde_json::{Value, json};
use std::collections::BTreeMap;

impl Aggregate for JobService {
    const NAME: &'static str = ComponentName::JobService.as_str();
}

const CONFIG_FILE: &str = "config.yml";
const CONFIG_PATH: &str = "/etc/jobservice/config.yml";
const LOG_DIR: &str = "/var/log/jobs";

const CONFIG_TEMPLATE: &str = r#"---
protocol: "{{ PROTOCOL }}"
port: {{ PORT }}
{{ HTTPS }}
worker_pool:
  workers: {{ WORKERS }}
  backend: "redis"
  redis_pool:
    # Overridden by JOB_SERVICE_POOL_REDIS_URL
    redis_url: ""
    namespace: "harbor_job_service_namespace"
    idle_timeout_second: 3600
job_loggers:
{{ JOB_LOGGERS }}
loggers:
{{ LOGGERS }}
metric:
  enabled: {{ METRIC_ENABLED }}
  path: {{ METRIC_PATH }}
  port: {{ METRIC_PORT }}
"#;

/// Reconciles `JobService` resources.
#[derive(Debug, Default)]
pub struct JobServiceResources;

fn level(level: LogLevel) -> String {
    level.as_str().to_uppercase()
}

/// Sweeper retention in whole days, at least one.
fn sweeper_days(duration: &GoDuration) -> Result<u64, ControllerError> {
    let duration = duration
        .parse()
        .map_err(|e| ControllerError::Render(format!("invalid sweeper duration {duration}: {e}")))?;
    Ok((duration.as_secs() / 86_400).max(1))
}

fn job_loggers(loggers: &JobLoggersSpec) -> Result<Value, ControllerError> {
    let mut entries = Vec::new();
    if let Some(stdout) = &loggers.stdout {
        entries.push(json!({"name": "STD_OUTPUT", "level": level(stdout.level)}));
    }
    // One FILE logger per pod; additional volumes only add retention.
    if let Some(file) = loggers.files.first() {
        entries.push(json!({
            "name": "FILE",
            "level": level(file.level),
            "settings": {"base_dir": LOG_DIR},
            "sweeper": {"duration": sweeper_days(&file.sweeper)?, "settings": {"work_dir": LOG_DIR}},
        }));
    }
    if let Some(database) = &loggers.database {
        entries.push(json!({
            "name": "DB",
            "level": level(database.level),
            "sweeper": {"duration": sweeper_days(&database.sweeper)?},
        }));
    }
    Ok(Value::Array(entries))
}

#[async_trait]
impl ResourceBuilder<JobService> for JobServiceResources {
    async fn add_resources(
        &self,
        ctx: &PassContext,
        jobservice: &JobService,
        spec: &JobServiceSpec,
        graph: &mut WorkGraph,
    ) -> Result<(), ControllerError> {
        let workload = Workload::new(ComponentName::JobService, &jobservice.metadata, &spec.component)
            .tls(spec.tls.as_ref())
            .injection(&spec.certificate_injection)
            .network(spec.network.as_ref());
        let name = workload.name;
        let mut parts = PodParts::default();

        let https = if workload.has_tls() {
            let paths = tls_paths(ComponentName::JobService);
            format!("https_config:\n  cert: \"{}\"\n  key: \"{}\"", paths.cert, paths.key)
        } else {
            String::new()
        };
        let metrics = spec.metrics.as_ref().filter(|m| m.enabled);
        let stdout = json!([{"name": "STD_OUTPUT", "level": level(spec.log.level)}]);
        let values = BTreeMap::from([
            ("PROTOCOL", workload.port_name().to_string()),
            ("PORT", workload.container_port().to_string()),
            ("HTTPS", https),
            ("WORKERS", spec.worker_pool.workers.to_string()),
            ("JOB_LOGGERS", indent(&yaml(&job_loggers(&spec.job_loggers)?)?, 2)),
            ("LOGGERS", indent(&yaml(&stdout)?, 2)),
            ("METRIC_ENABLED", metrics.is_some().to_string()),
            ("METRIC_PATH", metrics.map_or_else(|| "/metrics".to_string(), |m| m.path.clone())),
            ("METRIC_PORT", metrics.map_or(8001, |m| m.port).to_string()),
        ]);
        let config = template::render_for(&ctx.config, JobService::NAME, CONFIG_TEMPLATE, &values).await?;

        let mut env = BTreeMap::from([
            ("CORE_URL".to_string(), spec.core.url.clone()),
            ("TOKEN_SERVICE_URL".to_string(), spec.token_service.url.clone()),
            ("REGISTRY_URL".to_string(), spec.registry.url.clone()),
            ("REGISTRY_CONTROLLER_URL".to_string(), spec.registry.controller_url.clone()),
            (
                "REGISTRY_CREDENTIAL_USERNAME".to_string(),
                spec.registry.credentials.username.clone(),
            ),
            ("LOG_LEVEL".to_string(), spec.log.level.as_str().to_string()),
        ]);
        internal_tls_settings(&workload, &mut env);
        metrics_settings(ComponentName::JobService, spec.metrics.as_ref(), &mut env, &mut parts);
        common_settings(
            ComponentName::JobService,
            spec.proxy.as_ref(),
            spec.trace.as_ref(),
            &mut env,
            &mut parts.env,
        );

        let secret_env = BTreeMap::from([(
            "JOB_SERVICE_POOL_REDIS_URL".to_string(),
            redis_url(ctx, &spec.worker_pool.redis).await?,
        )]);
        parts.env.push(env_from_secret("CORE_SECRET", &spec.core.secret_ref, SHARED_SECRET_KEY));
        parts.env.push(env_from_secret("JOBSERVICE_SECRET", &spec.secret_ref, SHARED_SECRET_KEY));
        parts.env.push(env_from_secret(
            "REGISTRY_CREDENTIAL_PASSWORD",
            &spec.registry.credentials.password_ref,
            SHARED_SECRET_KEY,
        ));

        if let Some(file) = spec.job_loggers.files.first() {
            let (volume, sub_path) = storage_volume("job-logs", file.volume.as_ref());
            parts.mount_volume(volume, LOG_DIR, sub_path);
        }

        let files = BTreeMap::from([(CONFIG_FILE.to_string(), config)]);
        let consumes = add_config(graph, name, env, files, secret_env, &mut parts)?;
        parts.mount_config_file(name, CONFIG_FILE, CONFIG_PATH);
        parts.args = Some(vec!["-c".to_string(), CONFIG_PATH.to_string()]);
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
