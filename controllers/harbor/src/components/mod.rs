//! Component reconcilers.
//!
//! Every component follows the same shape: a ConfigMap with its flattened
//! settings, a Secret with whatever it must not see in clear text, a
//! Deployment consuming both, a Service, and optionally a NetworkPolicy pair.
//! The builders in this module produce those objects; each component module
//! only decides the settings.

pub mod chartmuseum;
pub mod core;
pub mod exporter;
pub mod jobservice;
pub mod notary_server;
pub mod notary_signer;
pub mod portal;
pub mod registry;
pub mod registryctl;
pub mod template;
pub mod trivy;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::graph::{NodeId, WorkGraph};
use crate::reconciler::{COMPONENT_LABEL, INSTANCE_LABEL, NAME_LABEL, PassContext};
use crds::component::HealthCheck;
use crds::secret_types::{
    CA_CERT_KEY, POSTGRESQL_PASSWORD_KEY, REDIS_PASSWORD_KEY, SHARED_SECRET_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use crds::version::DEFAULT_VERSION;
use crds::{
    CertificateInjection, ComponentName, ComponentSpec, ComponentTls, IngressController, MetricsSpec, NetworkSpec,
    PersistentVolumeRef, PostgresConnection, ProxySpec, RedisConnection, TraceSpec,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvFromSource, EnvVar, EnvVarSource, HTTPGetAction, KeyToPath, LocalObjectReference,
    PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, Secret, SecretEnvSource, SecretKeySelector, SecretVolumeSource, SecurityContext,
    Service, ServicePort, ServiceSpec, TCPSocketAction, Toleration, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use sha2::{Digest, Sha256};

/// Harbor version a component runs, set by the cluster reconciler.
pub const VERSION_ANNOTATION: &str = "goharbor.io/harbor-version";

/// Ingress controller in front of the component, set by the cluster reconciler.
pub const INGRESS_CONTROLLER_ANNOTATION: &str = "goharbor.io/ingress-controller";

/// Pod template annotation that changes whenever the rendered configuration does.
pub const CHECKSUM_ANNOTATION: &str = "goharbor.io/config-checksum";

/// uid and gid of every Harbor process.
pub const HARBOR_USER: i64 = 10000;

/// Where a component finds its own certificate.
pub const TLS_ROOT: &str = "/etc/harbor/ssl";

/// Directory of injected CA bundles.
pub const CUSTOM_CA_DIR: &str = "/harbor_cust_cert";

/// Harbor version from the component's annotations.
pub fn harbor_version(meta: &ObjectMeta) -> String {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(VERSION_ANNOTATION))
        .cloned()
        .unwrap_or_else(|| DEFAULT_VERSION.to_string())
}

/// Ingress controller from the component's annotations.
pub fn ingress_controller(meta: &ObjectMeta) -> IngressController {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(INGRESS_CONTROLLER_ANNOTATION))
        .and_then(|value| serde_json::from_value(serde_json::Value::String(value.clone())).ok())
        .unwrap_or_default()
}

/// Image of a component: explicit, configured default, then upstream.
pub fn image(config: &OperatorConfig, component: ComponentName, spec: &ComponentSpec, version: &str) -> String {
    if let Some(image) = &spec.image {
        return image.clone();
    }
    if let Some(image) = config.image(component, version) {
        return image.to_string();
    }
    format!("goharbor/{}:v{}", component.image_name(), version)
}

/// Labels selecting the pods of one component instance.
pub fn selector_labels(component: ComponentName, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), "harbor".to_string()),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
        (COMPONENT_LABEL.to_string(), component.as_str().to_string()),
    ])
}

pub fn metadata(name: impl Into<String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        ..Default::default()
    }
}

pub fn config_map(name: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: metadata(name),
        data: Some(data),
        ..Default::default()
    }
}

/// Secret with the given clear-text values.
pub fn secret(name: &str, type_: Option<&str>, data: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: metadata(name),
        type_: type_.map(str::to_string),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Digest of rendered configuration, used to roll pods on change.
///
/// SHA-256 over length-prefixed entries, so the value is the same for every
/// operator build and toolchain.
pub fn checksum<'a>(parts: impl IntoIterator<Item = &'a BTreeMap<String, String>>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        for (key, value) in part {
            for field in [key, value] {
                hasher.update((field.len() as u64).to_be_bytes());
                hasher.update(field.as_bytes());
            }
        }
    }
    crate::reconciler::diff::to_hex(&hasher.finalize())
}

pub fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Variable read from one key of a secret.
pub fn env_from_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Settings shared by every component for proxy and tracing.
pub fn common_settings(
    component: ComponentName,
    proxy: Option<&ProxySpec>,
    trace: Option<&TraceSpec>,
    data: &mut BTreeMap<String, String>,
    env: &mut Vec<EnvVar>,
) {
    if let Some(proxy) = proxy {
        data.extend(proxy.env());
    }
    if let Some(trace) = trace {
        data.extend(trace.env(component));
        if let Some(secret) = trace.password_ref() {
            env.push(env_from_secret("TRACE_JAEGER_PASSWORD", secret, SHARED_SECRET_KEY));
        }
    }
}

/// Volume backed by a claim, or an emptyDir when none is given.
pub fn storage_volume(name: &str, claim: Option<&PersistentVolumeRef>) -> (Volume, Option<String>) {
    match claim {
        Some(pv) => (
            Volume {
                name: name.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: pv.claim_name.clone(),
                    read_only: pv.read_only.then_some(true),
                }),
                ..Default::default()
            },
            pv.prefix.clone(),
        ),
        None => (
            Volume {
                name: name.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
            None,
        ),
    }
}

/// Files of a component's own certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: String,
    pub key: String,
    pub ca: String,
}

pub fn tls_paths(component: ComponentName) -> TlsPaths {
    let dir = format!("{TLS_ROOT}/{component}");
    TlsPaths {
        cert: format!("{dir}/{TLS_CERT_KEY}"),
        key: format!("{dir}/{TLS_PRIVATE_KEY_KEY}"),
        ca: format!("{dir}/{CA_CERT_KEY}"),
    }
}

/// What one component instance looks like from the outside.
#[derive(Debug, Clone, Copy)]
pub struct Workload<'a> {
    pub component: ComponentName,
    pub name: &'a str,
    pub meta: &'a ObjectMeta,
    pub spec: &'a ComponentSpec,
    pub tls: Option<&'a ComponentTls>,
    pub injection: Option<&'a CertificateInjection>,
    pub network: Option<&'a NetworkSpec>,
    /// Listening port replacing the component default.
    pub port: Option<i32>,
}

impl<'a> Workload<'a> {
    pub fn new(component: ComponentName, meta: &'a ObjectMeta, spec: &'a ComponentSpec) -> Self {
        Self {
            component,
            name: meta.name.as_deref().unwrap_or_default(),
            meta,
            spec,
            tls: None,
            injection: None,
            network: None,
            port: None,
        }
    }

    #[must_use]
    pub fn tls(mut self, tls: Option<&'a ComponentTls>) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn injection(mut self, injection: &'a CertificateInjection) -> Self {
        self.injection = Some(injection);
        self
    }

    #[must_use]
    pub fn network(mut self, network: Option<&'a NetworkSpec>) -> Self {
        self.network = network;
        self
    }

    #[must_use]
    pub fn port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }

    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn port_name(&self) -> &'static str {
        if self.has_tls() { "https" } else { "http" }
    }

    pub fn container_port(&self) -> i32 {
        self.port
            .unwrap_or_else(|| self.component.container_port(self.has_tls()))
    }

    pub fn service_port(&self) -> i32 {
        self.port.unwrap_or_else(|| self.component.service_port(self.has_tls()))
    }

    pub fn version(&self) -> String {
        harbor_version(self.meta)
    }

    pub fn bind_address(&self) -> &'static str {
        self.network.map_or("0.0.0.0", NetworkSpec::bind_address)
    }

    /// `scheme://name:port` of the component's Service.
    pub fn internal_url(&self) -> String {
        let scheme = if self.has_tls() { "https" } else { "http" };
        let port = self.service_port();
        if port == 80 || port == 443 {
            format!("{scheme}://{}", self.name)
        } else {
            format!("{scheme}://{}:{port}", self.name)
        }
    }
}

/// Pod contents specific to one component.
#[derive(Debug, Default, Clone)]
pub struct PodParts {
    pub config_map: Option<String>,
    pub secret: Option<String>,
    pub env: Vec<EnvVar>,
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
    pub init_containers: Vec<Container>,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub extra_ports: Vec<ContainerPort>,
    pub checksum: String,
}

impl PodParts {
    /// Mounts one key of the component ConfigMap as a file.
    pub fn mount_config_file(&mut self, config_map: &str, key: &str, path: &str) {
        let volume = format!("config-{}", self.volumes.len());
        self.volumes.push(Volume {
            name: volume.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.to_string(),
                items: Some(vec![KeyToPath {
                    key: key.to_string(),
                    path: key.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        self.mounts.push(VolumeMount {
            name: volume,
            mount_path: path.to_string(),
            sub_path: Some(key.to_string()),
            read_only: Some(true),
            ..Default::default()
        });
    }

    /// Mounts one key of a secret as a file.
    pub fn mount_secret_file(&mut self, volume: &str, secret: &str, key: &str, path: &str) {
        self.volumes.push(Volume {
            name: volume.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                items: Some(vec![KeyToPath {
                    key: key.to_string(),
                    path: key.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        self.mounts.push(VolumeMount {
            name: volume.to_string(),
            mount_path: path.to_string(),
            sub_path: Some(key.to_string()),
            read_only: Some(true),
            ..Default::default()
        });
    }

    /// Mounts a whole secret as a directory.
    pub fn mount_secret_dir(&mut self, volume: &str, secret: &str, path: &str) {
        self.volumes.push(Volume {
            name: volume.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        self.mounts.push(VolumeMount {
            name: volume.to_string(),
            mount_path: path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    /// Mounts a volume at `path`.
    pub fn mount_volume(&mut self, volume: Volume, path: &str, sub_path: Option<String>) {
        self.mounts.push(VolumeMount {
            name: volume.name.clone(),
            mount_path: path.to_string(),
            sub_path,
            ..Default::default()
        });
        self.volumes.push(volume);
    }
}

fn probe(workload: &Workload<'_>, initial_delay: i32) -> Probe {
    let port = IntOrString::String(workload.port_name().to_string());
    match workload.component.health_check() {
        HealthCheck::Http { path } => Probe {
            http_get: Some(HTTPGetAction {
                path: Some(path.to_string()),
                port,
                scheme: Some(if workload.has_tls() { "HTTPS" } else { "HTTP" }.to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(initial_delay),
            period_seconds: Some(10),
            ..Default::default()
        },
        HealthCheck::Tcp => Probe {
            tcp_socket: Some(TCPSocketAction {
                port,
                ..Default::default()
            }),
            initial_delay_seconds: Some(initial_delay),
            period_seconds: Some(10),
            ..Default::default()
        },
    }
}

fn resources(spec: &ComponentSpec) -> Option<ResourceRequirements> {
    spec.resources.as_ref().map(|r| {
        let quantities = |m: &BTreeMap<String, String>| {
            (!m.is_empty()).then(|| m.iter().map(|(k, v)| (k.clone(), Quantity(v.clone()))).collect())
        };
        ResourceRequirements {
            requests: quantities(&r.requests),
            limits: quantities(&r.limits),
            ..Default::default()
        }
    })
}

fn tolerations(spec: &ComponentSpec) -> Option<Vec<Toleration>> {
    (!spec.tolerations.is_empty()).then(|| {
        spec.tolerations
            .iter()
            .map(|t| Toleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                toleration_seconds: t.toleration_seconds,
            })
            .collect()
    })
}

/// Deployment of a component.
pub fn deployment(config: &OperatorConfig, workload: &Workload<'_>, parts: PodParts) -> Deployment {
    let component = workload.component;
    let spec = workload.spec;
    let version = workload.version();
    let selector = selector_labels(component, workload.name);

    let mut volumes = parts.volumes;
    let mut mounts = parts.mounts;
    if let Some(tls) = workload.tls {
        volumes.push(Volume {
            name: "certificate".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(tls.certificate_ref.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: "certificate".to_string(),
            mount_path: format!("{TLS_ROOT}/{component}"),
            read_only: Some(true),
            ..Default::default()
        });
    }
    if let Some(injection) = workload.injection {
        for (i, reference) in injection.certificate_refs.iter().enumerate() {
            let volume = format!("inject-{i}");
            let file = format!("{reference}.crt");
            volumes.push(Volume {
                name: volume.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(reference.clone()),
                    items: Some(vec![KeyToPath {
                        key: CA_CERT_KEY.to_string(),
                        path: file.clone(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: volume,
                mount_path: format!("{CUSTOM_CA_DIR}/{file}"),
                sub_path: Some(file),
                read_only: Some(true),
                ..Default::default()
            });
        }
    }

    let mut env_from = Vec::new();
    if let Some(name) = &parts.config_map {
        env_from.push(EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    if let Some(name) = &parts.secret {
        env_from.push(EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let mut ports = vec![ContainerPort {
        name: Some(workload.port_name().to_string()),
        container_port: workload.container_port(),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    ports.extend(parts.extra_ports);

    let container = Container {
        name: component.container_name().to_string(),
        image: Some(image(config, component, spec, &version)),
        image_pull_policy: spec.image_pull_policy.map(|p| p.as_str().to_string()),
        command: parts.command,
        args: parts.args,
        ports: Some(ports),
        env: (!parts.env.is_empty()).then_some(parts.env),
        env_from: (!env_from.is_empty()).then_some(env_from),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        liveness_probe: Some(probe(workload, 300)),
        readiness_probe: Some(probe(workload, 1)),
        resources: resources(spec),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut annotations = spec.template_annotations.clone();
    annotations.insert(CHECKSUM_ANNOTATION.to_string(), parts.checksum);
    annotations.insert(VERSION_ANNOTATION.to_string(), version);

    Deployment {
        metadata: metadata(workload.name),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas.unwrap_or(1)),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    init_containers: (!parts.init_containers.is_empty()).then_some(parts.init_containers),
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    image_pull_secrets: (!spec.image_pull_secrets.is_empty()).then(|| {
                        spec.image_pull_secrets
                            .iter()
                            .map(|name| LocalObjectReference { name: name.clone() })
                            .collect()
                    }),
                    node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
                    tolerations: tolerations(spec),
                    service_account_name: spec.service_account_name.clone(),
                    priority_class_name: spec.priority_class_name.clone(),
                    automount_service_account_token: Some(false),
                    security_context: Some(PodSecurityContext {
                        run_as_user: Some(HARBOR_USER),
                        run_as_group: Some(HARBOR_USER),
                        fs_group: Some(HARBOR_USER),
                        run_as_non_root: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service in front of a component.
pub fn service(workload: &Workload<'_>, extra_ports: Vec<ServicePort>) -> Service {
    let port_name = workload.port_name();
    let annotations = ingress_controller(workload.meta).service_annotations(workload.has_tls(), port_name);
    let mut ports = vec![ServicePort {
        name: Some(port_name.to_string()),
        port: workload.service_port(),
        target_port: Some(IntOrString::String(port_name.to_string())),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    ports.extend(extra_ports);

    let families: Vec<String> = workload
        .network
        .map(|n| n.ip_families.iter().map(|f| format!("{f:?}")).collect())
        .unwrap_or_default();
    let policy = match families.len() {
        0 => None,
        1 => Some("SingleStack".to_string()),
        _ => Some("PreferDualStack".to_string()),
    };

    Service {
        metadata: ObjectMeta {
            name: Some(workload.name.to_string()),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(workload.component, workload.name)),
            ports: Some(ports),
            ip_families: (!families.is_empty()).then_some(families),
            ip_family_policy: policy,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress-only policy on the component port, and allow-all egress.
pub fn network_policies(workload: &Workload<'_>) -> [NetworkPolicy; 2] {
    let selector = LabelSelector {
        match_labels: Some(selector_labels(workload.component, workload.name)),
        ..Default::default()
    };
    let ingress = NetworkPolicy {
        metadata: metadata(format!("{}-ingress", workload.name)),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(selector.clone()),
            policy_types: Some(vec!["Ingress".to_string()]),
            ingress: Some(vec![NetworkPolicyIngressRule {
                ports: Some(vec![NetworkPolicyPort {
                    port: Some(IntOrString::Int(workload.container_port())),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    };
    let egress = NetworkPolicy {
        metadata: metadata(format!("{}-egress", workload.name)),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(selector),
            policy_types: Some(vec!["Egress".to_string()]),
            egress: Some(vec![NetworkPolicyEgressRule::default()]),
            ..Default::default()
        }),
    };
    [ingress, egress]
}

/// Registers the Deployment, Service and policies of a component.
///
/// The Deployment waits for every node in `consumes`. Returns the Deployment
/// node.
pub fn add_workload(
    graph: &mut WorkGraph,
    config: &OperatorConfig,
    workload: &Workload<'_>,
    parts: PodParts,
    consumes: &[NodeId],
    extra_service_ports: Vec<ServicePort>,
) -> Result<NodeId, ControllerError> {
    let deployment_id = graph.add_deployment(&deployment(config, workload, parts), consumes)?;
    graph.add_service(&service(workload, extra_service_ports), &[])?;
    if config.network_policies {
        for policy in network_policies(workload) {
            graph.add_network_policy(&policy, &[])?;
        }
    }
    Ok(deployment_id)
}

/// Adds the component ConfigMap and, when non-empty, its Secret.
///
/// `env` and `files` share the ConfigMap; only `env` is imported into the
/// container environment, files are mounted by the caller. Returns the node
/// ids for `add_workload` and fills the env sources and checksum of `parts`.
pub fn add_config(
    graph: &mut WorkGraph,
    name: &str,
    env: BTreeMap<String, String>,
    files: BTreeMap<String, String>,
    secret_env: BTreeMap<String, String>,
    parts: &mut PodParts,
) -> Result<Vec<NodeId>, ControllerError> {
    parts.checksum = checksum([&env, &files, &secret_env]);
    if !env.is_empty() {
        parts.config_map = Some(name.to_string());
    }
    let mut data = env;
    data.extend(files);
    let mut ids = vec![graph.add_config_map(&config_map(name, data), &[])?];
    if !secret_env.is_empty() {
        ids.push(graph.add_secret(&secret(name, Some("Opaque"), secret_env), &[])?);
        parts.secret = Some(name.to_string());
    }
    Ok(ids)
}

/// `INTERNAL_TLS_*` settings of a component serving TLS.
pub fn internal_tls_settings(workload: &Workload<'_>, data: &mut BTreeMap<String, String>) {
    data.insert("INTERNAL_TLS_ENABLED".to_string(), workload.has_tls().to_string());
    if workload.has_tls() {
        let paths = tls_paths(workload.component);
        data.insert("INTERNAL_TLS_CERT_PATH".to_string(), paths.cert);
        data.insert("INTERNAL_TLS_KEY_PATH".to_string(), paths.key);
        data.insert("INTERNAL_TLS_TRUST_CA_PATH".to_string(), paths.ca);
    }
}

/// `METRIC_*` settings and the extra container port when metrics are on.
pub fn metrics_settings(
    component: ComponentName,
    metrics: Option<&MetricsSpec>,
    data: &mut BTreeMap<String, String>,
    parts: &mut PodParts,
) {
    let Some(metrics) = metrics.filter(|m| m.enabled) else {
        data.insert("METRIC_ENABLE".to_string(), "false".to_string());
        return;
    };
    data.insert("METRIC_ENABLE".to_string(), "true".to_string());
    data.insert("METRIC_PATH".to_string(), metrics.path.clone());
    data.insert("METRIC_PORT".to_string(), metrics.port.to_string());
    data.insert("METRIC_NAMESPACE".to_string(), "harbor".to_string());
    data.insert("METRIC_SUBSYSTEM".to_string(), component.as_str().to_string());
    parts.extra_ports.push(ContainerPort {
        name: Some("metrics".to_string()),
        container_port: metrics.port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    });
}

/// Service port for the metrics endpoint, if enabled.
pub fn metrics_service_port(metrics: Option<&MetricsSpec>) -> Vec<ServicePort> {
    metrics
        .filter(|m| m.enabled)
        .map(|m| ServicePort {
            name: Some("metrics".to_string()),
            port: m.port,
            target_port: Some(IntOrString::String("metrics".to_string())),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .into_iter()
        .collect()
}

/// `POSTGRESQL_*` settings; the password is read from its secret.
pub fn postgres_settings(
    connection: &PostgresConnection,
    data: &mut BTreeMap<String, String>,
    env: &mut Vec<EnvVar>,
) {
    if let Some(primary) = connection.primary() {
        data.insert("POSTGRESQL_HOST".to_string(), primary.host.clone());
        data.insert("POSTGRESQL_PORT".to_string(), primary.port().to_string());
    }
    data.insert("POSTGRESQL_USERNAME".to_string(), connection.username.clone());
    data.insert("POSTGRESQL_DATABASE".to_string(), connection.database.clone());
    data.insert("POSTGRESQL_SSLMODE".to_string(), connection.ssl_mode.as_str().to_string());
    if let Some(password) = &connection.password_ref {
        env.push(env_from_secret("POSTGRESQL_PASSWORD", password, POSTGRESQL_PASSWORD_KEY));
    }
}

/// Init container applying the schema migrations of a notary service.
///
/// Runs the component image with `DB_URL` built from `connection`; the
/// password is expanded by the kubelet from `POSTGRESQL_PASSWORD`.
pub fn migration_container(
    config: &OperatorConfig,
    workload: &Workload<'_>,
    connection: &PostgresConnection,
    service: &str,
) -> Container {
    let mut vars = Vec::new();
    if let Some(password) = &connection.password_ref {
        vars.push(env_from_secret("POSTGRESQL_PASSWORD", password, POSTGRESQL_PASSWORD_KEY));
    }
    vars.push(env("DB_URL", connection.dsn(None)));
    vars.push(env("SERVICE_NAME", service));
    vars.push(env(
        "MIGRATIONS_PATH",
        format!("migrations/{}/postgresql", service.trim_start_matches("notary_")),
    ));
    Container {
        name: "migration".to_string(),
        image: Some(image(config, workload.component, workload.spec, &workload.version())),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "migrate-patch -database=\"${DB_URL}\" && /migrations/migrate.sh".to_string(),
        ]),
        env: Some(vars),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Password of a Redis connection, resolved from its secret.
pub async fn redis_password(ctx: &PassContext, connection: &RedisConnection) -> Result<Option<String>, ControllerError> {
    match &connection.password_ref {
        Some(name) => ctx.secret_value(name, REDIS_PASSWORD_KEY).await,
        None => Ok(None),
    }
}

/// Redis URL with the password embedded.
pub async fn redis_url(ctx: &PassContext, connection: &RedisConnection) -> Result<String, ControllerError> {
    let password = redis_password(ctx, connection).await?;
    Ok(connection.url(password.as_deref()))
}

/// Test fixtures shared by the component tests.
#[cfg(test)]
pub(crate) mod testing {
    use crate::config::{ConfigStore, OperatorConfig};
    use crate::graph::WorkGraph;
    use crate::reconciler::PassContext;
    use cluster_client::{ClusterClientTrait, MockClusterClient, ObjectKey, ResourceType};
    use k8s_openapi::ByteString;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    pub fn context(client: &MockClusterClient, config: OperatorConfig) -> PassContext {
        let client: Arc<dyn ClusterClientTrait> = Arc::new(client.clone());
        PassContext {
            client,
            config: ConfigStore::from_config(config).snapshot(),
            namespace: "harbor".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn graph() -> WorkGraph {
        let owner = OwnerReference {
            api_version: "goharbor.io/v1beta1".to_string(),
            kind: "Test".to_string(),
            name: "demo".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        WorkGraph::new("harbor", owner, BTreeMap::new())
    }

    /// Typed secret with the given string values.
    pub fn typed_secret(name: &str, type_: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("harbor".to_string()),
                ..Default::default()
            },
            type_: Some(type_.to_string()),
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn insert_secret(client: &MockClusterClient, secret: &Secret) {
        client.insert(&ResourceType::namespaced::<Secret>(), secret);
    }

    pub fn node_object<K: serde::de::DeserializeOwned>(graph: &WorkGraph, kind: &str, name: &str) -> K {
        let (_, node) = graph
            .nodes()
            .find(|(_, n)| n.key.resource.kind() == kind && n.key.name == name)
            .unwrap_or_else(|| panic!("no {kind} {name} in graph"));
        cluster_client::from_dynamic(node.object.clone()).unwrap()
    }

    pub fn config_data(graph: &WorkGraph, name: &str) -> BTreeMap<String, String> {
        node_object::<ConfigMap>(graph, "ConfigMap", name).data.unwrap_or_default()
    }

    pub fn secret_data(graph: &WorkGraph, name: &str) -> BTreeMap<String, String> {
        node_object::<Secret>(graph, "Secret", name)
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8(v.0).unwrap()))
            .collect()
    }

    pub fn deployment(graph: &WorkGraph, name: &str) -> Deployment {
        node_object(graph, "Deployment", name)
    }

    /// Every Deployment depends on each ConfigMap and Secret it reads env from.
    pub fn assert_deployments_depend_on_their_config(graph: &WorkGraph) {
        for (_, node) in graph.nodes().filter(|(_, n)| n.key.resource.kind() == "Deployment") {
            let deployment: Deployment = cluster_client::from_dynamic(node.object.clone()).unwrap();
            let pod = deployment.spec.unwrap().template.spec.unwrap();
            for source in pod.containers[0].env_from.clone().unwrap_or_default() {
                let (kind, name) = match (source.config_map_ref, source.secret_ref) {
                    (Some(cm), _) => ("ConfigMap", cm.name),
                    (_, Some(secret)) => ("Secret", secret.name),
                    _ => continue,
                };
                let key = ObjectKey::new(
                    match kind {
                        "ConfigMap" => ResourceType::namespaced::<ConfigMap>(),
                        _ => ResourceType::namespaced::<Secret>(),
                    },
                    Some("harbor"),
                    name.clone(),
                );
                let dep = graph.find(&key).unwrap_or_else(|| panic!("{kind} {name} not in graph"));
                assert!(
                    node.dependencies.contains(&dep),
                    "{} does not depend on {kind} {name}",
                    node.key
                );
            }
        }
    }

    pub fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("harbor".to_string()),
            uid: Some(format!("{name}-uid")),
            generation: Some(1),
            ..Default::default()
        }
    }
}
