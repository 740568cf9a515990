//! HarborCluster v1beta1 (hub version)

use crate::common::{ComponentSpec, ImageSourceSpec, LogLevel, MetricsSpec, NetworkSpec};
use crate::component::ComponentName;
use crate::conditions::ComponentStatus;
use crate::database::DatabaseSpec;
use crate::expose::ExposeSpec;
use crate::field::{FieldError, FieldPath};
use crate::proxy::HarborProxySpec;
use crate::redis::RedisSpec;
use crate::references::{IssuerReference, SecretReference, SecretReferences};
use crate::secret_types::SecretType;
use crate::storage::{ImageChartStorage, PersistentVolumeRef};
use crate::trace::TraceSpec;
use crate::validation::check_http_url;
use crate::version::check_supported;
use crate::{Defaults, Invariants};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "HarborCluster",
    namespaced,
    status = "ComponentStatus",
    derive = "PartialEq",
    category = "goharbor",
    shortname = "hc",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Public URL","type":"string","jsonPath":".spec.externalURL"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HarborClusterSpec {
    /// Public URL of the installation
    #[serde(rename = "externalURL")]
    pub external_url: String,

    /// Harbor version, `MAJOR.MINOR.PATCH`
    pub version: String,

    /// Secret of type `goharbor.io/single-secret` holding the admin password
    pub harbor_admin_password_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy_type: Option<UpdateStrategyType>,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_source: Option<ImageSourceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<HarborProxySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,

    #[serde(default, rename = "internalTLS")]
    pub internal_tls: InternalTlsSpec,

    /// Secret of type `goharbor.io/single-secret`; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_ref: Option<String>,

    #[serde(default)]
    pub expose: ExposeSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal: Option<ComponentSpec>,

    #[serde(default)]
    pub core: CoreComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobservice: Option<JobServiceComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registryctl: Option<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chartmuseum: Option<ChartMuseumComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trivy: Option<TrivyComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notary: Option<NotaryComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter: Option<ExporterComponentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_chart_storage: Option<ImageChartStorage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum UpdateStrategyType {
    Recreate,
    RollingUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InternalTlsSpec {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    /// Issuer of the token-signing certificate; a self-signed one is created when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_issuer: Option<IssuerReference>,

    /// Existing TLS secret used to sign tokens; takes precedence over `tokenIssuer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_certificate_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobServiceComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_count: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(default)]
    pub relative_urls: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMuseumComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(default)]
    pub absolute_url: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrivyComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(default)]
    pub skip_update: bool,

    #[serde(default)]
    pub offline_scan: bool,

    /// Secret of type `goharbor.io/github`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<TrivyComponentStorage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrivyComponentStorage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_persistent_volume: Option<PersistentVolumeRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_persistent_volume: Option<PersistentVolumeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotaryComponentSpec {
    #[serde(default)]
    pub server: ComponentSpec,

    #[serde(default)]
    pub signer: ComponentSpec,

    #[serde(default = "default_true")]
    pub migration_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExporterComponentSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

impl HarborClusterSpec {
    /// Components this cluster deploys.
    pub fn enabled_components(&self) -> Vec<ComponentName> {
        let mut enabled = vec![
            ComponentName::Portal,
            ComponentName::Registry,
            ComponentName::RegistryController,
            ComponentName::JobService,
            ComponentName::Core,
        ];
        if self.chartmuseum.is_some() {
            enabled.push(ComponentName::ChartMuseum);
        }
        if self.trivy.is_some() {
            enabled.push(ComponentName::Trivy);
        }
        if self.notary.is_some() {
            enabled.push(ComponentName::NotaryServer);
            enabled.push(ComponentName::NotarySigner);
        }
        if self.exporter.is_some() {
            enabled.push(ComponentName::Exporter);
        }
        enabled
    }

    pub fn is_enabled(&self, component: ComponentName) -> bool {
        self.enabled_components().contains(&component)
    }

    /// Common attributes of `component` as declared on the cluster.
    pub fn component_spec(&self, component: ComponentName) -> ComponentSpec {
        let declared = match component {
            ComponentName::Core => Some(self.core.component.clone()),
            ComponentName::JobService => self.jobservice.as_ref().map(|j| j.component.clone()),
            ComponentName::Registry => self.registry.as_ref().map(|r| r.component.clone()),
            ComponentName::RegistryController => self.registryctl.clone(),
            ComponentName::Portal => self.portal.clone(),
            ComponentName::ChartMuseum => self.chartmuseum.as_ref().map(|c| c.component.clone()),
            ComponentName::Trivy => self.trivy.as_ref().map(|t| t.component.clone()),
            ComponentName::NotaryServer => self.notary.as_ref().map(|n| n.server.clone()),
            ComponentName::NotarySigner => self.notary.as_ref().map(|n| n.signer.clone()),
            ComponentName::Exporter => self.exporter.as_ref().map(|e| e.component.clone()),
        };
        declared.unwrap_or_default()
    }

    /// Checks that are local to the spec and independent of the old object.
    pub fn structural_errors(&self) -> Vec<FieldError> {
        let spec = FieldPath::spec();
        let mut errors = Vec::new();

        errors.extend(check_http_url(spec.child("externalURL"), &self.external_url));
        if let Err(e) = check_supported(&self.version) {
            errors.push(FieldError::invalid(spec.child("version"), e.to_string()));
        }
        if self.harbor_admin_password_ref.is_empty() {
            errors.push(FieldError::required(
                spec.child("harborAdminPasswordRef"),
                "admin password secret is required",
            ));
        }
        if self.database.is_none() {
            errors.push(FieldError::required(spec.child("database"), "database is required"));
        } else if self.database.as_ref().is_some_and(|db| db.hosts.is_empty()) {
            errors.push(FieldError::required(
                spec.child("database").child("hosts"),
                "at least one database host is required",
            ));
        }
        if self.redis.is_none() {
            errors.push(FieldError::required(spec.child("redis"), "redis is required"));
        }
        match &self.image_chart_storage {
            None => errors.push(FieldError::required(
                spec.child("imageChartStorage"),
                "ErrNoStorageConfiguration: no storage backend configured",
            )),
            Some(storage) if storage.backend.is_node_local() => {
                let registry = self.component_spec(ComponentName::Registry);
                let registryctl = self.component_spec(ComponentName::RegistryController);
                if !registry.can_be_co_scheduled_with(&registryctl) {
                    errors.push(FieldError::forbidden(
                        spec.child("registryctl"),
                        "filesystem storage requires registry and registryctl to share node selector and tolerations",
                    ));
                }
            }
            Some(_) => {}
        }
        for component in ComponentName::ALL {
            let replicas = self.component_spec(component).replicas;
            if replicas.is_some_and(|r| r < 0) {
                errors.push(FieldError::invalid(
                    spec.child(component.as_str()).child("replicas"),
                    "must not be negative",
                ));
            }
        }
        errors
    }
}

impl Defaults for HarborClusterSpec {
    fn apply_defaults(&mut self) {
        if let Some(proxy) = self.proxy.as_mut() {
            proxy.apply_defaults();
        }
        if let Some(jobservice) = self.jobservice.as_mut() {
            jobservice.work_count.get_or_insert(10);
        }
    }
}

impl Invariants for HarborClusterSpec {
    fn invariants(&self) -> Vec<FieldError> {
        self.structural_errors()
    }
}

impl SecretReferences for HarborClusterSpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let mut refs = vec![SecretReference::typed(
            spec.child("harborAdminPasswordRef"),
            &self.harbor_admin_password_ref,
            SecretType::SingleSecret,
        )];
        if let Some(key) = &self.encryption_key_ref {
            refs.push(SecretReference::typed(
                spec.child("encryptionKeyRef"),
                key,
                SecretType::SingleSecret,
            ));
        }
        if let Some(password) = self.database.as_ref().and_then(|d| d.password_ref.as_ref()) {
            refs.push(SecretReference::typed(
                spec.child("database").child("passwordRef"),
                password,
                SecretType::Postgresql,
            ));
        }
        if let Some(redis) = &self.redis {
            if let Some(password) = &redis.password_ref {
                refs.push(SecretReference::typed(
                    spec.child("redis").child("passwordRef"),
                    password,
                    SecretType::Redis,
                ));
            }
            if let Some(cert) = &redis.certificate_ref {
                refs.push(SecretReference::ca_bundle(spec.child("redis").child("certificateRef"), cert));
            }
        }
        if let Some(storage) = &self.image_chart_storage {
            for (field, name) in storage.backend.secret_refs(&spec.child("imageChartStorage")) {
                refs.push(SecretReference::typed(field, name, SecretType::SingleSecret));
            }
        }
        if let Some(token) = self.trivy.as_ref().and_then(|t| t.github_token_ref.as_ref()) {
            refs.push(SecretReference::typed(
                spec.child("trivy").child("githubTokenRef"),
                token,
                SecretType::Github,
            ));
        }
        if let Some(cert) = &self.core.token_certificate_ref {
            refs.push(SecretReference::tls(spec.child("core").child("tokenCertificateRef"), cert));
        }
        if let Some(password) = self.trace.as_ref().and_then(|t| t.password_ref()) {
            refs.push(SecretReference::typed(
                spec.child("trace").child("jaeger").child("collector").child("passwordRef"),
                password,
                SecretType::SingleSecret,
            ));
        }
        let expose = spec.child("expose");
        if let Some(tls) = &self.expose.core.tls {
            refs.push(SecretReference::tls(
                expose.child("core").child("tls").child("certificateRef"),
                &tls.certificate_ref,
            ));
        }
        if let Some(tls) = self.expose.notary.as_ref().and_then(|n| n.tls.as_ref()) {
            refs.push(SecretReference::tls(
                expose.child("notary").child("tls").child("certificateRef"),
                &tls.certificate_ref,
            ));
        }
        refs
    }
}
