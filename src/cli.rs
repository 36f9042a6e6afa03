//! # Command Line
//!
//! Flags of the `server-acl-init` job.
//!
//! ```bash
//! server-acl-init \
//!   --server-label-selector component=server,app=consul,release=release \
//!   --resource-prefix release-consul \
//!   --k8s-namespace consul \
//!   --expected-replicas 3 \
//!   --create-client-token --allow-dns --create-inject-auth-method
//! ```

use crate::config::{AclInitConfig, CapabilityFlags, ConsulSettings, EnvTunables};
use crate::constants::{DEFAULT_CONSUL_NAMESPACE, DEFAULT_SYNC_CONSUL_NODE_NAME, DEFAULT_TIMEOUT};
use crate::controller::namespace::NamespaceConfig;
use crate::controller::reconciler::validation::parse_kubernetes_duration;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Bootstrap and reconcile Consul ACLs for a Kubernetes-hosted Consul cluster
#[derive(Parser, Debug, Clone)]
#[command(name = "server-acl-init", version)]
#[command(about = "Bootstrap and reconcile Consul ACLs for a Kubernetes-hosted Consul cluster", long_about = None)]
pub struct Cli {
    /// Label selector matching the Consul server pods
    #[arg(long)]
    pub server_label_selector: String,

    /// Number of ready servers to wait for
    #[arg(long, default_value_t = 1)]
    pub expected_replicas: usize,

    /// Prefix of the Kubernetes objects this job reads and writes (usually `<release>-consul`)
    #[arg(long)]
    pub resource_prefix: String,

    /// Kubernetes namespace of the Consul servers
    #[arg(long, env = "POD_NAMESPACE")]
    pub k8s_namespace: String,

    /// How long to wait for the servers, e.g. `30s`, `10m`
    #[arg(long, default_value = DEFAULT_TIMEOUT)]
    pub timeout: String,

    /// Create the client agent token
    #[arg(long)]
    pub create_client_token: bool,

    /// Let the anonymous token resolve DNS
    #[arg(long)]
    pub allow_dns: bool,

    /// Create the catalog sync token
    #[arg(long)]
    pub create_sync_token: bool,

    /// Create the Kubernetes auth method and binding rule for connect-inject
    #[arg(long)]
    pub create_inject_auth_method: bool,

    /// Create the connect-inject token
    #[arg(long, alias = "create-inject-token")]
    pub create_inject_namespace_token: bool,

    /// Create the mesh gateway token
    #[arg(long)]
    pub create_mesh_gateway_token: bool,

    /// Create the snapshot agent token
    #[arg(long)]
    pub create_snapshot_agent_token: bool,

    /// Create the enterprise license token
    #[arg(long)]
    pub create_enterprise_license_token: bool,

    /// Create the ACL replication token
    #[arg(long)]
    pub create_acl_replication_token: bool,

    /// Selector of the binding rule, e.g. `serviceaccount.name!=default`
    #[arg(long, default_value = "")]
    pub acl_binding_rule_selector: String,

    /// Kubernetes API URL Consul uses to validate service account JWTs
    #[arg(long)]
    pub inject_auth_method_host: Option<String>,

    /// Enable Consul Enterprise namespaces
    #[arg(long)]
    pub enable_namespaces: bool,

    /// Consul namespace connect-inject registers services into
    #[arg(long, default_value = DEFAULT_CONSUL_NAMESPACE)]
    pub consul_inject_destination_namespace: String,

    /// Mirror Kubernetes namespaces into Consul for connect-inject
    #[arg(long)]
    pub enable_inject_k8s_namespace_mirroring: bool,

    /// Prefix of mirrored connect-inject namespaces
    #[arg(long, default_value = "")]
    pub inject_k8s_namespace_mirroring_prefix: String,

    /// Consul namespace catalog sync registers services into
    #[arg(long, default_value = DEFAULT_CONSUL_NAMESPACE)]
    pub consul_sync_destination_namespace: String,

    /// Mirror Kubernetes namespaces into Consul for catalog sync
    #[arg(long)]
    pub enable_sync_k8s_namespace_mirroring: bool,

    /// Prefix of mirrored catalog sync namespaces
    #[arg(long, default_value = "")]
    pub sync_k8s_namespace_mirroring_prefix: String,

    /// Consul node catalog sync registers services under
    #[arg(long, default_value = DEFAULT_SYNC_CONSUL_NODE_NAME)]
    pub sync_consul_node_name: String,

    /// Talk to Consul over HTTPS
    #[arg(long)]
    pub use_https: bool,

    /// PEM CA bundle used to verify the Consul servers
    #[arg(long)]
    pub consul_ca_cert: Option<PathBuf>,

    /// Consul server address; defaults to the first ready server pod
    #[arg(long)]
    pub server_address: Option<String>,

    /// Consul HTTP(S) port; defaults to 8500, or 8501 with --use-https
    #[arg(long)]
    pub server_port: Option<u16>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Decode flags and tunables into a run configuration
    ///
    /// # Errors
    /// Returns an error if `--timeout` is not a valid duration
    pub fn into_config(self, tunables: &EnvTunables) -> Result<AclInitConfig> {
        let timeout = parse_kubernetes_duration(&self.timeout)
            .with_context(|| format!("Invalid --timeout '{}'", self.timeout))?;

        Ok(AclInitConfig {
            resource_prefix: self.resource_prefix,
            k8s_namespace: self.k8s_namespace,
            server_label_selector: self.server_label_selector,
            expected_replicas: self.expected_replicas,
            timeout,
            server_poll_interval: Duration::from_millis(tunables.server_poll_interval_ms),
            capabilities: CapabilityFlags {
                create_client_token: self.create_client_token,
                allow_dns: self.allow_dns,
                create_sync_token: self.create_sync_token,
                create_inject_auth_method: self.create_inject_auth_method,
                create_inject_namespace_token: self.create_inject_namespace_token,
                create_mesh_gateway_token: self.create_mesh_gateway_token,
                create_snapshot_agent_token: self.create_snapshot_agent_token,
                create_enterprise_license_token: self.create_enterprise_license_token,
                create_acl_replication_token: self.create_acl_replication_token,
            },
            inject_namespaces: NamespaceConfig {
                enabled: self.enable_namespaces,
                mirroring: self.enable_inject_k8s_namespace_mirroring,
                mirroring_prefix: self.inject_k8s_namespace_mirroring_prefix,
                destination_namespace: self.consul_inject_destination_namespace,
            },
            sync_namespaces: NamespaceConfig {
                enabled: self.enable_namespaces,
                mirroring: self.enable_sync_k8s_namespace_mirroring,
                mirroring_prefix: self.sync_k8s_namespace_mirroring_prefix,
                destination_namespace: self.consul_sync_destination_namespace,
            },
            acl_binding_rule_selector: self.acl_binding_rule_selector,
            inject_auth_method_host: self.inject_auth_method_host,
            sync_consul_node_name: self.sync_consul_node_name,
            consul: ConsulSettings {
                use_https: self.use_https,
                port: self.server_port,
                ca_cert: self.consul_ca_cert,
                server_address: self.server_address,
                request_timeout: Duration::from_secs(tunables.consul_http_timeout_secs),
            },
        })
    }
}
