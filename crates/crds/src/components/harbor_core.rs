//! Core CRD
//!
//! Harbor's API server and token service.

use super::{LogSpec, RegistryCredentials, tls_references};
use crate::common::{CertificateInjection, ComponentSpec, ComponentTls, MetricsSpec, NetworkSpec};
use crate::conditions::ComponentStatus;
use crate::database::PostgresConnection;
use crate::field::{FieldError, FieldPath};
use crate::proxy::ProxySpec;
use crate::redis::RedisConnection;
use crate::references::{SecretReference, SecretReferences};
use crate::secret_types::SecretType;
use crate::trace::TraceSpec;
use crate::validation::{check_http_url, check_optional_http_url};
use crate::{Defaults, Invariants};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "goharbor.io",
    version = "v1beta1",
    kind = "Core",
    namespaced,
    status = "ComponentStatus",
    category = "goharbor",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CoreSpec {
    #[serde(flatten)]
    pub component: ComponentSpec,

    #[serde(flatten)]
    pub certificate_injection: CertificateInjection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ComponentTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,

    #[serde(default)]
    pub log: LogSpec,

    /// Public URL of the cluster
    pub external_endpoint: String,

    pub core_config: CoreConfig,

    pub components: CoreComponents,

    pub database: CoreDatabaseSpec,

    pub redis: RedisConnection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    DbAuth,
    LdapAuth,
    UaaAuth,
    HttpAuth,
    OidcAuth,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::DbAuth => "db_auth",
            AuthMode::LdapAuth => "ldap_auth",
            AuthMode::UaaAuth => "uaa_auth",
            AuthMode::HttpAuth => "http_auth",
            AuthMode::OidcAuth => "oidc_auth",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Secret of type `goharbor.io/single-secret` shared with the other components
    pub secret_ref: String,

    /// Secret of type `goharbor.io/single-secret` holding the initial admin password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_initial_password_ref: Option<String>,

    /// Secret of type `goharbor.io/csrf`
    pub csrf_key_ref: String,

    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Seconds a session token stays valid
    #[serde(default = "default_token_expiration")]
    pub token_expiration: i32,
}

fn default_token_expiration() -> i32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenServiceSpec {
    pub url: String,

    /// TLS secret whose key signs registry tokens
    pub certificate_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreRegistrySpec {
    pub url: String,
    pub controller_url: String,
    pub credentials: RegistryCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreJobServiceSpec {
    pub url: String,

    /// Secret of type `goharbor.io/single-secret`
    pub secret_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UrlSpec {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreChartRepositorySpec {
    pub url: String,

    /// Return absolute chart URLs in index files
    #[serde(default)]
    pub absolute_url: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreComponents {
    pub token_service: TokenServiceSpec,
    pub registry: CoreRegistrySpec,
    pub job_service: CoreJobServiceSpec,
    pub portal: UrlSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_repository: Option<CoreChartRepositorySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trivy: Option<UrlSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notary_server: Option<UrlSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreDatabaseSpec {
    #[serde(flatten)]
    pub connection: PostgresConnection,

    /// Secret of type `goharbor.io/single-secret` used to encrypt stored credentials
    pub encryption_key_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle_connections: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_open_connections: Option<i32>,
}

impl Defaults for CoreSpec {
    fn apply_defaults(&mut self) {
        self.component.apply_defaults();
        if self.database.max_idle_connections.is_none() {
            self.database.max_idle_connections = Some(50);
        }
        if self.database.max_open_connections.is_none() {
            self.database.max_open_connections = Some(1000);
        }
    }
}

impl Invariants for CoreSpec {
    fn invariants(&self) -> Vec<FieldError> {
        let spec = FieldPath::spec();
        let components = spec.child("components");
        let mut errors = Vec::new();
        errors.extend(check_http_url(spec.child("externalEndpoint"), &self.external_endpoint));
        errors.extend(check_http_url(
            components.child("tokenService").child("url"),
            &self.components.token_service.url,
        ));
        errors.extend(check_http_url(
            components.child("registry").child("url"),
            &self.components.registry.url,
        ));
        errors.extend(check_http_url(
            components.child("registry").child("controllerUrl"),
            &self.components.registry.controller_url,
        ));
        errors.extend(check_http_url(
            components.child("jobService").child("url"),
            &self.components.job_service.url,
        ));
        errors.extend(check_http_url(components.child("portal").child("url"), &self.components.portal.url));
        errors.extend(check_optional_http_url(
            components.child("chartRepository").child("url"),
            self.components.chart_repository.as_ref().map(|c| c.url.as_str()),
        ));
        errors.extend(check_optional_http_url(
            components.child("trivy").child("url"),
            self.components.trivy.as_ref().map(|c| c.url.as_str()),
        ));
        errors.extend(check_optional_http_url(
            components.child("notaryServer").child("url"),
            self.components.notary_server.as_ref().map(|c| c.url.as_str()),
        ));
        if self.database.connection.hosts.is_empty() {
            errors.push(FieldError::required(
                spec.child("database").child("hosts"),
                "at least one database host is required",
            ));
        }
        errors
    }
}

impl SecretReferences for CoreSpec {
    fn secret_references(&self) -> Vec<SecretReference> {
        let spec = FieldPath::spec();
        let mut refs = tls_references(&spec, self.tls.as_ref(), &self.certificate_injection);
        let config = spec.child("coreConfig");
        refs.push(SecretReference::typed(
            config.child("secretRef"),
            &self.core_config.secret_ref,
            SecretType::SingleSecret,
        ));
        if let Some(admin) = &self.core_config.admin_initial_password_ref {
            refs.push(SecretReference::typed(
                config.child("adminInitialPasswordRef"),
                admin,
                SecretType::SingleSecret,
            ));
        }
        refs.push(SecretReference::typed(
            config.child("csrfKeyRef"),
            &self.core_config.csrf_key_ref,
            SecretType::Csrf,
        ));
        let components = spec.child("components");
        refs.push(SecretReference::tls(
            components.child("tokenService").child("certificateRef"),
            &self.components.token_service.certificate_ref,
        ));
        refs.push(SecretReference::typed(
            components.child("registry").child("credentials").child("passwordRef"),
            &self.components.registry.credentials.password_ref,
            SecretType::SingleSecret,
        ));
        refs.push(SecretReference::typed(
            components.child("jobService").child("secretRef"),
            &self.components.job_service.secret_ref,
            SecretType::SingleSecret,
        ));
        let database = spec.child("database");
        if let Some(password) = &self.database.connection.password_ref {
            refs.push(SecretReference::typed(
                database.child("passwordRef"),
                password,
                SecretType::Postgresql,
            ));
        }
        refs.push(SecretReference::typed(
            database.child("encryptionKeyRef"),
            &self.database.encryption_key_ref,
            SecretType::SingleSecret,
        ));
        if let Some(password) = &self.redis.password_ref {
            refs.push(SecretReference::typed(
                spec.child("redis").child("passwordRef"),
                password,
                SecretType::Redis,
            ));
        }
        refs
    }
}
