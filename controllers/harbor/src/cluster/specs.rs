//! Component resources of a cluster.
//!
//! Translates the cluster's single description into one spec per enabled
//! component: in-cluster URLs, generated secrets and certificates are wired in
//! here, and cluster-wide settings (image source, proxy, trace, log level,
//! network) are pushed down to each component.

use super::certificates::{ClusterCertificates, TOKEN_ISSUER};
use super::secrets::{CHART_USERNAME, GeneratedSecrets, REGISTRY_USERNAME};
use super::urls::{ClusterUrls, component_name, internal_hosts};
use crate::components::{INGRESS_CONTROLLER_ANNOTATION, VERSION_ANNOTATION};
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::{CLASS_LABEL, COMPONENT_LABEL};
use crds::{
    AuthMode, CertificateInjection, ChartMuseum, ChartMuseumAuthSpec, ChartMuseumBasicAuth, ChartMuseumCacheSpec,
    ChartMuseumChartSpec, ChartMuseumLogSpec, ChartMuseumSpec, ChartMuseumStorageSpec, ComponentName, ComponentSpec,
    ComponentTls, Core, CoreChartRepositorySpec, CoreComponents, CoreConfig, CoreDatabaseSpec, CoreJobServiceSpec,
    CoreRegistrySpec, CoreSpec, DatabaseLoggerSpec, DatabaseSpec, Exporter, ExporterDatabaseSpec, ExporterSpec,
    GoDuration, HarborClusterSpec, HtpasswdSpec, ImageChartStorage, JobLoggersSpec, JobService, JobServiceCoreSpec,
    JobServiceRegistrySpec, JobServiceSpec, LogLevel, LogSpec, NetworkSpec, NotaryRemoteSignerSpec, NotaryServer,
    NotaryServerAuthSpec, NotaryServerSpec, NotarySigner, NotarySignerSpec, NotarySignerStorageSpec,
    NotaryStorageSpec, NotaryTokenSpec, NotaryTrustServiceSpec, Portal, PortalSpec, PostgresConnection, ProxySpec,
    RedisConnection, RedisSpec, Registry, RegistryAuthenticationSpec, RegistryController,
    RegistryControllerAuthenticationSpec, RegistryControllerSpec, RegistryCredentials, RegistryHttpSpec,
    RegistryLogSpec, RegistrySpec, RegistryStorageCache, RegistryStorageSpec, StdoutLoggerSpec, TokenServiceSpec,
    Trivy, TrivyRedisSpec, TrivyServerSpec, TrivySpec, TrivyStorageSpec, TrivyUpdateSpec, UrlSpec, WorkerPoolSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;

const DEFAULT_WORKERS: i32 = 10;
const DEFAULT_EXPORTER_PORT: i32 = 8001;
const PORTAL_MAX_CONNECTIONS: i32 = 1024;
const NOTARY_SERVICE: &str = "harbor-notary";
const NOTARY_KEY_ALGORITHM: &str = "ecdsa";
const JOB_LOG_SWEEPER: &str = "24h";
const TRIVY_STORE_NAMESPACE: &str = "harbor.scanner.trivy:store";

/// Everything the component specs of one cluster are derived from.
#[derive(Debug)]
pub struct ComponentSpecs<'a> {
    pub cluster: &'a str,
    pub spec: &'a HarborClusterSpec,
    pub config: &'a OperatorConfig,
    pub database: &'a DatabaseSpec,
    pub redis: &'a RedisSpec,
    pub storage: &'a ImageChartStorage,
    pub urls: &'a ClusterUrls,
    pub secrets: &'a GeneratedSecrets,
    pub certificates: &'a ClusterCertificates,
}

fn section_missing(section: &str) -> ControllerError {
    ControllerError::Render(format!("cluster has no {section} section"))
}

impl ComponentSpecs<'_> {
    fn name(&self, component: ComponentName) -> String {
        component_name(self.cluster, component)
    }

    /// Name, class, version and ingress controller of a component resource.
    ///
    /// The class label is always set so that an empty class overrides the
    /// cluster's own label.
    fn meta(&self, component: ComponentName) -> ObjectMeta {
        let labels = BTreeMap::from([
            (COMPONENT_LABEL.to_string(), component.as_str().to_string()),
            (
                CLASS_LABEL.to_string(),
                self.config.class(component.as_str()).to_string(),
            ),
        ]);
        let mut annotations = BTreeMap::from([(VERSION_ANNOTATION.to_string(), self.spec.version.clone())]);
        let exposed = match component {
            ComponentName::Core | ComponentName::Portal => self.spec.expose.core.ingress.as_ref(),
            ComponentName::NotaryServer => self.spec.expose.notary.as_ref().and_then(|n| n.ingress.as_ref()),
            _ => None,
        };
        if let Some(ingress) = exposed {
            annotations.insert(
                INGRESS_CONTROLLER_ANNOTATION.to_string(),
                ingress.controller.as_str().to_string(),
            );
        }
        ObjectMeta {
            name: Some(self.name(component)),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        }
    }

    fn with_meta<K: Resource>(&self, component: ComponentName, mut resource: K) -> K {
        *resource.meta_mut() = self.meta(component);
        resource
    }

    /// Common attributes, with the cluster's image source filling the gaps.
    fn component(&self, component: ComponentName) -> ComponentSpec {
        let mut declared = self.spec.component_spec(component);
        let Some(source) = &self.spec.image_source else {
            return declared;
        };
        if declared.image.is_none() && (source.repository.is_some() || source.tag_suffix.is_some()) {
            let repository = source.repository.as_deref().unwrap_or("goharbor").trim_end_matches('/');
            declared.image = Some(format!(
                "{repository}/{}:v{}{}",
                component.image_name(),
                self.spec.version,
                source.tag_suffix.as_deref().unwrap_or_default()
            ));
        }
        if declared.image_pull_policy.is_none() {
            declared.image_pull_policy = source.image_pull_policy;
        }
        if declared.image_pull_secrets.is_empty() {
            declared.image_pull_secrets.clone_from(&source.image_pull_secrets);
        }
        declared
    }

    fn injection(&self) -> CertificateInjection {
        CertificateInjection {
            certificate_refs: self.certificates.ca_secret.iter().cloned().collect(),
        }
    }

    fn tls(&self, component: ComponentName) -> Option<ComponentTls> {
        self.certificates.internal_tls(component)
    }

    fn network(&self) -> Option<NetworkSpec> {
        self.spec.network.clone()
    }

    fn proxy(&self, component: ComponentName) -> Option<ProxySpec> {
        let hosts = internal_hosts(self.cluster, self.spec);
        self.spec.proxy.as_ref().and_then(|p| p.for_component(component, &hosts))
    }

    fn log(&self) -> LogSpec {
        LogSpec {
            level: self.spec.log_level,
        }
    }

    fn postgres(&self, component: ComponentName) -> Result<PostgresConnection, ControllerError> {
        self.database
            .connection_for(component)
            .ok_or_else(|| ControllerError::Render(format!("{component} has no database")))
    }

    fn redis(&self, component: ComponentName) -> Result<RedisConnection, ControllerError> {
        self.redis
            .connection_for(component)
            .ok_or_else(|| ControllerError::Render(format!("{component} has no redis database")))
    }

    fn registry_credentials(&self) -> RegistryCredentials {
        RegistryCredentials {
            username: REGISTRY_USERNAME.to_string(),
            password_ref: self.secrets.registry_password.clone(),
        }
    }

    pub fn portal(&self) -> Portal {
        let c = ComponentName::Portal;
        let spec = PortalSpec {
            component: self.component(c),
            tls: self.tls(c),
            network: self.network(),
            max_connections: PORTAL_MAX_CONNECTIONS,
        };
        self.with_meta(c, Portal::new(&self.name(c), spec))
    }

    pub fn core(&self) -> Result<Core, ControllerError> {
        let c = ComponentName::Core;
        let urls = self.urls;
        let spec = CoreSpec {
            component: self.component(c),
            certificate_injection: self.injection(),
            tls: self.tls(c),
            network: self.network(),
            metrics: self.spec.core.metrics.clone(),
            trace: self.spec.trace.clone(),
            proxy: self.proxy(c),
            log: self.log(),
            external_endpoint: self.spec.external_url.clone(),
            core_config: CoreConfig {
                secret_ref: self.secrets.core.clone(),
                admin_initial_password_ref: Some(self.spec.harbor_admin_password_ref.clone()),
                csrf_key_ref: self.secrets.csrf.clone(),
                auth_mode: AuthMode::DbAuth,
                token_expiration: 30,
            },
            components: CoreComponents {
                token_service: TokenServiceSpec {
                    url: urls.token_service.clone(),
                    certificate_ref: self.certificates.token.secret.clone(),
                },
                registry: CoreRegistrySpec {
                    url: urls.registry.clone(),
                    controller_url: urls.registryctl.clone(),
                    credentials: self.registry_credentials(),
                },
                job_service: CoreJobServiceSpec {
                    url: urls.jobservice.clone(),
                    secret_ref: self.secrets.jobservice.clone(),
                },
                portal: UrlSpec {
                    url: urls.portal.clone(),
                },
                chart_repository: urls.chartmuseum.as_ref().map(|url| CoreChartRepositorySpec {
                    url: url.clone(),
                    absolute_url: self.spec.chartmuseum.as_ref().is_some_and(|c| c.absolute_url),
                }),
                trivy: urls.trivy.clone().map(|url| UrlSpec { url }),
                notary_server: urls.notary_server.clone().map(|url| UrlSpec { url }),
            },
            database: CoreDatabaseSpec {
                connection: self.postgres(c)?,
                encryption_key_ref: self.secrets.encryption_key.clone(),
                max_idle_connections: None,
                max_open_connections: None,
            },
            redis: self.redis(c)?,
        };
        Ok(self.with_meta(c, Core::new(&self.name(c), spec)))
    }

    pub fn jobservice(&self) -> Result<JobService, ControllerError> {
        let c = ComponentName::JobService;
        let level = self.spec.log_level;
        let spec = JobServiceSpec {
            component: self.component(c),
            certificate_injection: self.injection(),
            tls: self.tls(c),
            network: self.network(),
            metrics: None,
            trace: self.spec.trace.clone(),
            proxy: self.proxy(c),
            log: self.log(),
            core: JobServiceCoreSpec {
                url: self.urls.core.clone(),
                secret_ref: self.secrets.core.clone(),
            },
            registry: JobServiceRegistrySpec {
                url: self.urls.registry.clone(),
                controller_url: self.urls.registryctl.clone(),
                credentials: self.registry_credentials(),
            },
            token_service: UrlSpec {
                url: self.urls.token_service.clone(),
            },
            secret_ref: self.secrets.jobservice.clone(),
            worker_pool: WorkerPoolSpec {
                workers: self
                    .spec
                    .jobservice
                    .as_ref()
                    .and_then(|j| j.work_count)
                    .unwrap_or(DEFAULT_WORKERS),
                redis: self.redis(c)?,
            },
            job_loggers: JobLoggersSpec {
                files: Vec::new(),
                database: Some(DatabaseLoggerSpec {
                    level,
                    sweeper: GoDuration::new(JOB_LOG_SWEEPER),
                }),
                stdout: Some(StdoutLoggerSpec { level }),
            },
        };
        Ok(self.with_meta(c, JobService::new(&self.name(c), spec)))
    }

    pub fn registry(&self) -> Result<Registry, ControllerError> {
        let c = ComponentName::Registry;
        let declared = self.spec.registry.as_ref();
        let spec = RegistrySpec {
            component: self.component(c),
            certificate_injection: self.injection(),
            tls: self.tls(c),
            network: self.network(),
            metrics: declared.and_then(|r| r.metrics.clone()),
            trace: self.spec.trace.clone(),
            proxy: self.proxy(c),
            log: RegistryLogSpec {
                level: self.spec.log_level,
                ..Default::default()
            },
            http: RegistryHttpSpec {
                secret_ref: self.secrets.registry_http.clone(),
                relative_urls: declared.is_some_and(|r| r.relative_urls),
            },
            authentication: RegistryAuthenticationSpec {
                htpasswd: HtpasswdSpec {
                    secret_ref: self.secrets.registry_htpasswd.clone(),
                    ..Default::default()
                },
            },
            storage: RegistryStorageSpec {
                driver: self.storage.registry_driver(),
                cache: RegistryStorageCache::default(),
                redirect: self.storage.redirect.clone(),
                delete_enabled: true,
            },
            redis: Some(self.redis(c)?),
        };
        Ok(self.with_meta(c, Registry::new(&self.name(c), spec)))
    }

    pub fn registryctl(&self) -> RegistryController {
        let c = ComponentName::RegistryController;
        let spec = RegistryControllerSpec {
            component: self.component(c),
            certificate_injection: self.injection(),
            tls: self.tls(c),
            network: self.network(),
            trace: self.spec.trace.clone(),
            log: self.log(),
            registry_ref: self.name(ComponentName::Registry),
            authentication: RegistryControllerAuthenticationSpec {
                core_secret_ref: self.secrets.core.clone(),
                jobservice_secret_ref: self.secrets.jobservice.clone(),
            },
        };
        self.with_meta(c, RegistryController::new(&self.name(c), spec))
    }

    pub fn chartmuseum(&self) -> Result<ChartMuseum, ControllerError> {
        let c = ComponentName::ChartMuseum;
        let spec = ChartMuseumSpec {
            component: self.component(c),
            certificate_injection: self.injection(),
            tls: self.tls(c),
            network: self.network(),
            trace: self.spec.trace.clone(),
            proxy: self.proxy(c),
            log: ChartMuseumLogSpec {
                debug: self.spec.log_level == LogLevel::Debug,
                json: false,
            },
            authentication: ChartMuseumAuthSpec {
                anonymous_get: false,
                basic: Some(ChartMuseumBasicAuth {
                    username: CHART_USERNAME.to_string(),
                    password_ref: self.secrets.core.clone(),
                }),
                bearer: None,
            },
            server: Default::default(),
            chart: ChartMuseumChartSpec {
                url: self.urls.public_chart_repository.clone(),
                allow_overwrite: true,
                semantic_versioning2_only: false,
                index_limit: 0,
                depth: 1,
                max_storage_objects: 0,
                storage_timestamp_tolerance: GoDuration::new("1s"),
                storage: ChartMuseumStorageSpec {
                    driver: self.storage.chart_driver(),
                },
                disable: Default::default(),
            },
            cache: Some(ChartMuseumCacheSpec {
                redis: Some(self.redis(c)?),
            }),
        };
        Ok(self.with_meta(c, ChartMuseum::new(&self.name(c), spec)))
    }

    pub fn trivy(&self) -> Result<Trivy, ControllerError> {
        let c = ComponentName::Trivy;
        let declared = self.spec.trivy.as_ref().ok_or_else(|| section_missing("trivy"))?;
        let storage = declared.storage.clone().unwrap_or_default();
        let spec = TrivySpec {
            component: self.component(c),
            certificate_injection: self.injection(),
            tls: self.tls(c),
            network: self.network(),
            proxy: self.proxy(c),
            log: self.log(),
            redis: TrivyRedisSpec {
                connection: self.redis(c)?,
                namespace: TRIVY_STORE_NAMESPACE.to_string(),
                jobs: Default::default(),
                pool: Default::default(),
            },
            server: TrivyServerSpec {
                offline_scan: declared.offline_scan,
                ..Default::default()
            },
            update: TrivyUpdateSpec {
                skip: declared.skip_update,
                github_token_ref: declared.github_token_ref.clone(),
            },
            storage: TrivyStorageSpec {
                cache: storage.cache_persistent_volume,
                reports: storage.reports_persistent_volume,
            },
        };
        Ok(self.with_meta(c, Trivy::new(&self.name(c), spec)))
    }

    pub fn notary_server(&self) -> Result<NotaryServer, ControllerError> {
        let c = ComponentName::NotaryServer;
        let notary = self.spec.notary.as_ref().ok_or_else(|| section_missing("notary"))?;
        let signer = self
            .certificates
            .notary_signer
            .as_ref()
            .ok_or_else(|| section_missing("notary signer certificate"))?;
        let spec = NotaryServerSpec {
            component: self.component(c),
            certificate_injection: self.injection(),
            tls: self.tls(c),
            network: self.network(),
            trace: self.spec.trace.clone(),
            logging: self.log(),
            migration_enabled: notary.migration_enabled,
            authentication: Some(NotaryServerAuthSpec {
                token: NotaryTokenSpec {
                    realm: self.urls.public_token_realm.clone(),
                    service: NOTARY_SERVICE.to_string(),
                    issuer: TOKEN_ISSUER.to_string(),
                    certificate_ref: self.certificates.token.secret.clone(),
                },
            }),
            storage: NotaryStorageSpec {
                postgres: self.postgres(c)?,
            },
            trust_service: NotaryTrustServiceSpec {
                remote: NotaryRemoteSignerSpec {
                    host: self.name(ComponentName::NotarySigner),
                    port: ComponentName::NotarySigner.service_port(true),
                    key_algorithm: NOTARY_KEY_ALGORITHM.to_string(),
                    certificate_ref: signer.secret.clone(),
                },
            },
        };
        Ok(self.with_meta(c, NotaryServer::new(&self.name(c), spec)))
    }

    pub fn notary_signer(&self) -> Result<NotarySigner, ControllerError> {
        let c = ComponentName::NotarySigner;
        let notary = self.spec.notary.as_ref().ok_or_else(|| section_missing("notary"))?;
        let signer = self
            .certificates
            .notary_signer
            .as_ref()
            .ok_or_else(|| section_missing("notary signer certificate"))?;
        let aliases = self
            .secrets
            .notary_aliases
            .clone()
            .ok_or_else(|| section_missing("notary signer aliases"))?;
        let spec = NotarySignerSpec {
            component: self.component(c),
            certificate_injection: self.injection(),
            network: self.network(),
            logging: self.log(),
            migration_enabled: notary.migration_enabled,
            certificate_ref: signer.secret.clone(),
            storage: NotarySignerStorageSpec {
                postgres: self.postgres(c)?,
                alias_secret_ref: aliases,
            },
        };
        Ok(self.with_meta(c, NotarySigner::new(&self.name(c), spec)))
    }

    pub fn exporter(&self) -> Result<Exporter, ControllerError> {
        let c = ComponentName::Exporter;
        let declared = self.spec.exporter.as_ref().ok_or_else(|| section_missing("exporter"))?;
        let spec = ExporterSpec {
            component: self.component(c),
            certificate_injection: self.injection(),
            tls: self.tls(c),
            network: self.network(),
            log: self.log(),
            core: UrlSpec {
                url: self.urls.core.clone(),
            },
            database: ExporterDatabaseSpec {
                connection: self.postgres(c)?,
                max_idle_connections: None,
                max_open_connections: None,
            },
            cache: Default::default(),
            port: declared.port.unwrap_or(DEFAULT_EXPORTER_PORT),
            path: "/metrics".to_string(),
        };
        Ok(self.with_meta(c, Exporter::new(&self.name(c), spec)))
    }
}
