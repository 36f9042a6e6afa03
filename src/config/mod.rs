//! # Configuration
//!
//! Decoded run configuration. Flags come from [`crate::cli`]; tunables that are not worth a
//! flag are read from environment variables with defaults from [`crate::constants`].

use crate::constants::*;
use crate::controller::namespace::{NamespaceConfig, NamespaceMode};
use crate::controller::rules::{Capability, RuleContext};
use crate::provider::consul::ConsulConnection;
use std::path::PathBuf;
use std::time::Duration;

/// Which optional capabilities to provision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityFlags {
    pub create_client_token: bool,
    pub allow_dns: bool,
    pub create_sync_token: bool,
    pub create_inject_auth_method: bool,
    pub create_inject_namespace_token: bool,
    pub create_mesh_gateway_token: bool,
    pub create_snapshot_agent_token: bool,
    pub create_enterprise_license_token: bool,
    pub create_acl_replication_token: bool,
}

/// How to reach the Consul servers
#[derive(Debug, Clone)]
pub struct ConsulSettings {
    pub use_https: bool,
    /// Overrides the scheme's default port
    pub port: Option<u16>,
    pub ca_cert: Option<PathBuf>,
    /// Talk to this address instead of the first ready server pod
    pub server_address: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ConsulSettings {
    fn default() -> Self {
        Self {
            use_https: false,
            port: None,
            ca_cert: None,
            server_address: None,
            request_timeout: Duration::from_secs(DEFAULT_CONSUL_HTTP_TIMEOUT_SECS),
        }
    }
}

impl ConsulSettings {
    pub fn scheme(&self) -> &'static str {
        if self.use_https {
            "https"
        } else {
            "http"
        }
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.use_https {
            DEFAULT_CONSUL_HTTPS_PORT
        } else {
            DEFAULT_CONSUL_HTTP_PORT
        })
    }

    /// Connection template; the server address is filled in once servers are ready
    pub fn connection(&self) -> ConsulConnection {
        ConsulConnection {
            scheme: self.scheme().to_string(),
            server_address: self.server_address.clone().unwrap_or_default(),
            port: self.effective_port(),
            ca_cert: self.ca_cert.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

/// Everything one run needs to know
#[derive(Debug, Clone)]
pub struct AclInitConfig {
    /// Prefix of every Kubernetes object name this tool reads or writes
    pub resource_prefix: String,
    /// Kubernetes namespace of the Consul servers and the token Secrets
    pub k8s_namespace: String,
    pub server_label_selector: String,
    pub expected_replicas: usize,
    /// How long to wait for the servers to become ready
    pub timeout: Duration,
    pub server_poll_interval: Duration,
    pub capabilities: CapabilityFlags,
    /// Namespace mapping for connect-inject (auth method and binding rule)
    pub inject_namespaces: NamespaceConfig,
    /// Namespace mapping for catalog sync
    pub sync_namespaces: NamespaceConfig,
    pub acl_binding_rule_selector: String,
    /// Kubernetes API URL Consul should call for TokenReview
    pub inject_auth_method_host: Option<String>,
    pub sync_consul_node_name: String,
    pub consul: ConsulSettings,
}

impl Default for AclInitConfig {
    fn default() -> Self {
        Self {
            resource_prefix: String::new(),
            k8s_namespace: "default".to_string(),
            server_label_selector: String::new(),
            expected_replicas: 1,
            timeout: Duration::from_secs(600),
            server_poll_interval: Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS),
            capabilities: CapabilityFlags::default(),
            inject_namespaces: NamespaceConfig::default(),
            sync_namespaces: NamespaceConfig::default(),
            acl_binding_rule_selector: String::new(),
            inject_auth_method_host: None,
            sync_consul_node_name: DEFAULT_SYNC_CONSUL_NODE_NAME.to_string(),
            consul: ConsulSettings::default(),
        }
    }
}

impl AclInitConfig {
    /// Namespaces are enabled cluster-wide; both mappings share the flag
    pub fn namespaces_enabled(&self) -> bool {
        self.inject_namespaces.enabled
    }

    pub fn inject_mode(&self) -> NamespaceMode {
        self.inject_namespaces.resolve()
    }

    pub fn rule_context(&self) -> RuleContext {
        RuleContext {
            namespaces_enabled: self.namespaces_enabled(),
            sync: self.sync_namespaces.resolve(),
            sync_consul_node_name: self.sync_consul_node_name.clone(),
        }
    }

    /// Capabilities whose policies this run synchronizes
    ///
    /// The server agent policy is always included; the cross-namespace policy whenever
    /// namespaces are enabled.
    pub fn enabled_capabilities(&self) -> Vec<Capability> {
        let flags = &self.capabilities;
        let mut capabilities = vec![Capability::Agent];
        if self.namespaces_enabled() {
            capabilities.push(Capability::CrossNamespace);
        }
        for (enabled, capability) in [
            (flags.create_client_token, Capability::Client),
            (flags.allow_dns, Capability::Dns),
            (flags.create_sync_token, Capability::CatalogSync),
            (flags.create_inject_namespace_token, Capability::ConnectInject),
            (flags.create_mesh_gateway_token, Capability::MeshGateway),
            (flags.create_snapshot_agent_token, Capability::SnapshotAgent),
            (flags.create_enterprise_license_token, Capability::EnterpriseLicense),
            (flags.create_acl_replication_token, Capability::AclReplication),
        ] {
            if enabled {
                capabilities.push(capability);
            }
        }
        capabilities
    }
}

/// Environment tunables
#[derive(Debug, Clone)]
pub struct EnvTunables {
    pub server_poll_interval_ms: u64,
    pub consul_http_timeout_secs: u64,
}

impl EnvTunables {
    /// Load tunables from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            server_poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
            consul_http_timeout_secs: env_var_or_default(
                "CONSUL_HTTP_TIMEOUT_SECS",
                DEFAULT_CONSUL_HTTP_TIMEOUT_SECS,
            ),
        }
    }
}

/// Read environment variable or return default value
pub fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
