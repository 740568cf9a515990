//! Harbor Operator
//!
//! Runs every controller of the operator in one process:
//! - HarborCluster: splits a cluster into component resources
//! - Portal, Core, JobService, Registry, RegistryController, ChartMuseum,
//!   Trivy, NotaryServer, NotarySigner, Exporter: render each component
//! - admission and conversion webhooks, health and metrics endpoints

use anyhow::Context;
use clap::{Parser, ValueEnum};
use harbor_operator::config::ConfigStore;
use harbor_operator::controller::{Controller, Settings};
use harbor_operator::webhook::TlsFiles;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Kubernetes operator for Harbor registries
#[derive(Parser, Debug)]
#[command(name = "harbor-operator", version, about, long_about = None)]
struct Args {
    /// Operator configuration file
    #[arg(long, env = "HARBOR_OPERATOR_CONFIG", default_value = "/etc/harbor-operator/config.yaml")]
    config: PathBuf,

    /// Default log filter; RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Admission and conversion webhook listen address
    #[arg(long, default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// Health and metrics listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: SocketAddr,

    /// Webhook certificate (PEM); the webhook serves plain HTTP without it
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Webhook private key (PEM)
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        anyhow::bail!("a rustls crypto provider is already installed");
    }

    info!("Starting Harbor operator {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Config file: {}", args.config.display());
    info!("  Namespace: {}", args.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Webhook: {}", args.webhook_addr);
    info!("  Health: {}", args.health_addr);

    let config = ConfigStore::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;
    let tls = match (args.tls_cert, args.tls_key) {
        (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
        _ => None,
    };
    let settings = Settings {
        namespace: args.namespace,
        health_addr: args.health_addr,
        webhook_addr: args.webhook_addr,
        tls,
    };

    let controller = Controller::new(Arc::new(config), settings).await?;
    controller.run().await?;
    Ok(())
}
