//! # Initialization
//!
//! Process setup: rustls crypto provider, tracing, configuration, Kubernetes client and
//! the Consul connector.

use crate::cli::Cli;
use crate::config::{AclInitConfig, EnvTunables};
use crate::controller::reconciler::validation::validate_config;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::observability;
use crate::provider::kubernetes::KubeOrchestrator;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Install the ring crypto provider for rustls
///
/// Must run before any TLS client is built. A provider installed earlier is kept.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}

/// Decode and validate the configuration
pub fn load_config(cli: Cli) -> Result<AclInitConfig, ReconcilerError> {
    let tunables = EnvTunables::from_env();
    let config = cli
        .into_config(&tunables)
        .map_err(|e| ReconcilerError::InvalidConfig(format!("{e:#}")))?;
    validate_config(&config).map_err(|e| ReconcilerError::InvalidConfig(format!("{e:#}")))?;
    Ok(config)
}

/// Set up logging and build the reconciler from command line flags
pub async fn initialize(cli: Cli) -> Result<Reconciler> {
    install_crypto_provider();
    observability::init_tracing(&cli.log_level);

    info!("Starting server-acl-init v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli)?;
    info!(
        "Resource prefix {}, namespace {}, expecting {} server(s)",
        config.resource_prefix, config.k8s_namespace, config.expected_replicas
    );

    let orchestrator = KubeOrchestrator::infer(&config.k8s_namespace)
        .await
        .context("Failed to create Kubernetes client")?;
    let connector = config.consul.connection();

    Ok(Reconciler::new(
        config,
        Arc::new(orchestrator),
        Arc::new(connector),
    ))
}
