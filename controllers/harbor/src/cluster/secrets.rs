//! Secrets a cluster generates for its components.
//!
//! Values are generated on the first pass and never rotated: when a secret of
//! the expected type already exists its value is carried over, so restarting
//! components always see the credentials their peers were started with.

use crate::components::secret;
use crate::error::ControllerError;
use crate::graph::{NodeId, WorkGraph};
use crate::reconciler::PassContext;
use crds::secret_types::secret_value;
use crds::{HarborClusterSpec, SecretType};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// User the core and job service authenticate to the registry as.
pub const REGISTRY_USERNAME: &str = "harbor_registry_user";

/// User the core authenticates to ChartMuseum as.
pub const CHART_USERNAME: &str = "chart_controller";

const SECRET_LENGTH: usize = 16;
const CSRF_KEY_LENGTH: usize = 32;

/// Names of the secrets the cluster's components share.
#[derive(Debug, Clone, Default)]
pub struct GeneratedSecrets {
    /// Core's own secret, also used by the registry controller and ChartMuseum
    pub core: String,
    pub jobservice: String,
    pub registry_http: String,
    pub csrf: String,
    /// Clear-text password of [`REGISTRY_USERNAME`]
    pub registry_password: String,
    pub registry_htpasswd: String,
    pub encryption_key: String,
    pub notary_aliases: Option<String>,
    /// Nodes every component waits for
    pub nodes: Vec<NodeId>,
}

/// Random hex token of `len` characters.
fn random_token(len: usize) -> String {
    let mut token = String::with_capacity(len + 32);
    while token.len() < len {
        token.push_str(&Uuid::new_v4().simple().to_string());
    }
    token.truncate(len);
    token
}

fn htpasswd(password: &str) -> Result<String, ControllerError> {
    let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| ControllerError::Render(format!("cannot hash registry password: {e}")))?;
    Ok(format!("{REGISTRY_USERNAME}:{hash}"))
}

/// Whether an htpasswd line grants `password` to the registry user.
fn htpasswd_matches(line: &str, password: &str) -> bool {
    line.trim()
        .split_once(':')
        .is_some_and(|(user, hash)| user == REGISTRY_USERNAME && bcrypt::verify(password, hash).unwrap_or(false))
}

/// Current value of a generated secret, if it exists with the right type.
async fn existing_value(
    ctx: &PassContext,
    name: &str,
    secret_type: SecretType,
) -> Result<Option<String>, ControllerError> {
    let Some(existing) = ctx.secret(name).await? else {
        return Ok(None);
    };
    if let Err(e) = secret_type.check(&existing) {
        debug!("Regenerating secret {}: {}", name, e);
        return Ok(None);
    }
    Ok(secret_value(&existing, secret_type.required_keys()[0]))
}

fn add_secret(
    graph: &mut WorkGraph,
    name: &str,
    secret_type: SecretType,
    value: String,
) -> Result<NodeId, ControllerError> {
    let data = BTreeMap::from([(secret_type.required_keys()[0].to_string(), value)]);
    Ok(graph.add_secret(&secret(name, Some(secret_type.type_name()), data), &[])?)
}

/// Keeps or generates one secret and returns its value.
async fn generated(
    ctx: &PassContext,
    graph: &mut WorkGraph,
    nodes: &mut Vec<NodeId>,
    name: &str,
    secret_type: SecretType,
    len: usize,
) -> Result<String, ControllerError> {
    let value = existing_value(ctx, name, secret_type)
        .await?
        .unwrap_or_else(|| random_token(len));
    nodes.push(add_secret(graph, name, secret_type, value.clone())?);
    Ok(value)
}

pub async fn add_secrets(
    ctx: &PassContext,
    graph: &mut WorkGraph,
    cluster: &str,
    spec: &HarborClusterSpec,
) -> Result<GeneratedSecrets, ControllerError> {
    let mut secrets = GeneratedSecrets {
        core: format!("{cluster}-core-secret"),
        jobservice: format!("{cluster}-jobservice-secret"),
        registry_http: format!("{cluster}-registry-http"),
        csrf: format!("{cluster}-csrf"),
        registry_password: format!("{cluster}-registry-basicauth"),
        registry_htpasswd: format!("{cluster}-registry-htpasswd"),
        encryption_key: spec
            .encryption_key_ref
            .clone()
            .unwrap_or_else(|| format!("{cluster}-encryption-key")),
        ..Default::default()
    };
    let mut nodes = Vec::new();

    for (name, secret_type, len) in [
        (&secrets.core, SecretType::SingleSecret, SECRET_LENGTH),
        (&secrets.jobservice, SecretType::SingleSecret, SECRET_LENGTH),
        (&secrets.registry_http, SecretType::RegistryHttp, SECRET_LENGTH),
        (&secrets.csrf, SecretType::Csrf, CSRF_KEY_LENGTH),
    ] {
        generated(ctx, graph, &mut nodes, name, secret_type, len).await?;
    }
    if spec.encryption_key_ref.is_none() {
        generated(ctx, graph, &mut nodes, &secrets.encryption_key, SecretType::SingleSecret, SECRET_LENGTH).await?;
    }

    // The htpasswd file must always grant the current password.
    let password = generated(
        ctx,
        graph,
        &mut nodes,
        &secrets.registry_password,
        SecretType::SingleSecret,
        SECRET_LENGTH,
    )
    .await?;
    let line = match existing_value(ctx, &secrets.registry_htpasswd, SecretType::HtPasswd).await? {
        Some(line) if htpasswd_matches(&line, &password) => line,
        _ => htpasswd(&password)?,
    };
    nodes.push(add_secret(graph, &secrets.registry_htpasswd, SecretType::HtPasswd, line)?);

    if spec.notary.is_some() {
        let name = format!("{cluster}-notary-signer-aliases");
        generated(ctx, graph, &mut nodes, &name, SecretType::NotarySignerAliases, SECRET_LENGTH).await?;
        secrets.notary_aliases = Some(name);
    }

    secrets.nodes = nodes;
    Ok(secrets)
}
