//! Certificates a cluster requests from cert-manager.
//!
//! - the token-signing certificate of core, unless one is supplied
//! - the notary signer's serving certificate
//! - with internal TLS, a private CA and one serving certificate per component
//!
//! A self-signed `Issuer` is created lazily, only when something needs it.

use super::urls::component_name;
use crate::error::ControllerError;
use crate::graph::{NodeId, WorkGraph};
use crds::certificate::{CaIssuer, CertificatePrivateKey, SelfSignedIssuer};
use crds::{
    Certificate, CertificateSpec, ComponentName, ComponentTls, HarborClusterSpec, IssuerReference, Issuer, IssuerSpec,
};
use std::collections::BTreeMap;

const DURATION: &str = "2160h";
const RENEW_BEFORE: &str = "360h";
/// Issuer name core writes into tokens, and the token certificate's common name.
pub const TOKEN_ISSUER: &str = "harbor-token-issuer";

const SERVING_USAGES: [&str; 4] = ["digital signature", "key encipherment", "server auth", "client auth"];

/// Secret holding a certificate, and the node producing it if the cluster does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub secret: String,
    pub node: Option<NodeId>,
}

impl IssuedCertificate {
    fn supplied(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            node: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterCertificates {
    pub token: IssuedCertificate,
    pub internal: BTreeMap<ComponentName, IssuedCertificate>,
    pub notary_signer: Option<IssuedCertificate>,
    /// Secret holding the internal CA, trusted by every component
    pub ca_secret: Option<String>,
}

impl ClusterCertificates {
    /// Serving certificate of `component` under internal TLS.
    pub fn internal_tls(&self, component: ComponentName) -> Option<ComponentTls> {
        self.internal.get(&component).map(|c| ComponentTls {
            certificate_ref: c.secret.clone(),
        })
    }

    /// Certificate nodes `component` mounts.
    pub fn nodes_for(&self, component: ComponentName) -> Vec<NodeId> {
        let mut certificates = vec![self.internal.get(&component)];
        if matches!(component, ComponentName::Core | ComponentName::NotaryServer) {
            certificates.push(Some(&self.token));
        }
        if matches!(component, ComponentName::NotaryServer | ComponentName::NotarySigner) {
            certificates.push(self.notary_signer.as_ref());
        }
        certificates.into_iter().flatten().filter_map(|c| c.node).collect()
    }
}

fn internal_ca_name(cluster: &str) -> String {
    format!("{cluster}-internal-ca")
}

fn self_signed_name(cluster: &str) -> String {
    format!("{cluster}-self-signed")
}

fn self_signed_issuer(
    graph: &mut WorkGraph,
    cluster: &str,
    created: &mut Option<NodeId>,
) -> Result<NodeId, ControllerError> {
    if let Some(id) = *created {
        return Ok(id);
    }
    let issuer = Issuer::new(
        &self_signed_name(cluster),
        IssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
            ca: None,
        },
    );
    let id = graph.add_issuer(&issuer, &[])?;
    *created = Some(id);
    Ok(id)
}

fn rsa(size: u32) -> Option<CertificatePrivateKey> {
    Some(CertificatePrivateKey {
        algorithm: "RSA".to_string(),
        size,
    })
}

fn serving_certificate(name: &str, service: &str, namespace: &str, issuer_ref: IssuerReference) -> Certificate {
    Certificate::new(
        name,
        CertificateSpec {
            secret_name: name.to_string(),
            common_name: Some(service.to_string()),
            dns_names: vec![
                service.to_string(),
                format!("{service}.{namespace}"),
                format!("{service}.{namespace}.svc"),
            ],
            duration: Some(DURATION.to_string()),
            renew_before: Some(RENEW_BEFORE.to_string()),
            is_ca: false,
            issuer_ref,
            private_key: rsa(2048),
            usages: SERVING_USAGES.iter().map(ToString::to_string).collect(),
        },
    )
}

fn token_certificate(
    graph: &mut WorkGraph,
    cluster: &str,
    spec: &HarborClusterSpec,
    self_signed: &mut Option<NodeId>,
) -> Result<IssuedCertificate, ControllerError> {
    if let Some(supplied) = &spec.core.token_certificate_ref {
        return Ok(IssuedCertificate::supplied(supplied));
    }
    let (issuer_ref, dependencies) = match &spec.core.token_issuer {
        Some(issuer) => (issuer.clone(), Vec::new()),
        None => (
            IssuerReference::issuer(self_signed_name(cluster)),
            vec![self_signed_issuer(graph, cluster, self_signed)?],
        ),
    };
    let name = format!("{cluster}-token");
    let certificate = Certificate::new(
        &name,
        CertificateSpec {
            secret_name: name.clone(),
            common_name: Some(TOKEN_ISSUER.to_string()),
            dns_names: Vec::new(),
            duration: Some(DURATION.to_string()),
            renew_before: Some(RENEW_BEFORE.to_string()),
            is_ca: false,
            issuer_ref,
            private_key: rsa(4096),
            usages: vec!["signing".to_string(), "key encipherment".to_string()],
        },
    );
    let node = graph.add_certificate(&certificate, &dependencies)?;
    Ok(IssuedCertificate {
        secret: name,
        node: Some(node),
    })
}

/// Private CA of the cluster; returns the reference to its issuer.
fn internal_ca(
    graph: &mut WorkGraph,
    cluster: &str,
    self_signed: &mut Option<NodeId>,
) -> Result<(IssuerReference, NodeId), ControllerError> {
    let root = self_signed_issuer(graph, cluster, self_signed)?;
    let name = internal_ca_name(cluster);
    let certificate = Certificate::new(
        &name,
        CertificateSpec {
            secret_name: name.clone(),
            common_name: Some(format!("{cluster} internal CA")),
            dns_names: Vec::new(),
            duration: None,
            renew_before: None,
            is_ca: true,
            issuer_ref: IssuerReference::issuer(self_signed_name(cluster)),
            private_key: rsa(4096),
            usages: vec!["cert sign".to_string(), "crl sign".to_string()],
        },
    );
    let certificate = graph.add_certificate(&certificate, &[root])?;
    let issuer = Issuer::new(
        &name,
        IssuerSpec {
            self_signed: None,
            ca: Some(CaIssuer {
                secret_name: name.clone(),
            }),
        },
    );
    let issuer = graph.add_issuer(&issuer, &[certificate])?;
    Ok((IssuerReference::issuer(name), issuer))
}

pub fn add_certificates(
    graph: &mut WorkGraph,
    cluster: &str,
    spec: &HarborClusterSpec,
) -> Result<ClusterCertificates, ControllerError> {
    let namespace = graph.namespace().to_string();
    let mut self_signed = None;
    let token = token_certificate(graph, cluster, spec, &mut self_signed)?;

    let mut internal = BTreeMap::new();
    let mut ca = None;
    if spec.internal_tls.enabled {
        let (issuer_ref, issuer) = internal_ca(graph, cluster, &mut self_signed)?;
        // The signer always serves TLS with its own certificate.
        for component in spec
            .enabled_components()
            .into_iter()
            .filter(|c| *c != ComponentName::NotarySigner)
        {
            let service = component_name(cluster, component);
            let name = format!("{service}-internal-tls");
            let certificate = serving_certificate(&name, &service, &namespace, issuer_ref.clone());
            let node = graph.add_certificate(&certificate, &[issuer])?;
            internal.insert(
                component,
                IssuedCertificate {
                    secret: name,
                    node: Some(node),
                },
            );
        }
        ca = Some((issuer_ref, issuer));
    }

    let notary_signer = if spec.notary.is_some() {
        let (issuer_ref, issuer) = match ca {
            Some(ca) => ca,
            None => (
                IssuerReference::issuer(self_signed_name(cluster)),
                self_signed_issuer(graph, cluster, &mut self_signed)?,
            ),
        };
        let service = component_name(cluster, ComponentName::NotarySigner);
        let name = format!("{cluster}-notary-signer");
        let certificate = serving_certificate(&name, &service, &namespace, issuer_ref);
        let node = graph.add_certificate(&certificate, &[issuer])?;
        Some(IssuedCertificate {
            secret: name,
            node: Some(node),
        })
    } else {
        None
    };

    Ok(ClusterCertificates {
        token,
        internal,
        notary_signer,
        ca_secret: spec.internal_tls.enabled.then(|| internal_ca_name(cluster)),
    })
}
