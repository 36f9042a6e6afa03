//! # Constants
//!
//! Defaults and well-known names shared across the bootstrapper.

/// Default readiness poll interval (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 1000;

/// Default time to wait for the Consul servers to become ready
pub const DEFAULT_TIMEOUT: &str = "10m";

/// Longest accepted readiness timeout (7 days)
pub const MAX_TIMEOUT_SECS: u64 = 7 * 86_400;

/// Default per-request timeout for Consul HTTP API calls (seconds)
pub const DEFAULT_CONSUL_HTTP_TIMEOUT_SECS: u64 = 30;

/// Consul HTTP port
pub const DEFAULT_CONSUL_HTTP_PORT: u16 = 8500;

/// Consul HTTPS port
pub const DEFAULT_CONSUL_HTTPS_PORT: u16 = 8501;

/// Consul namespace that always exists on Enterprise clusters
pub const DEFAULT_CONSUL_NAMESPACE: &str = "default";

/// Wildcard namespace used to search across all Consul namespaces
pub const WILDCARD_NAMESPACE: &str = "*";

/// Key under which every token Secret stores its token
pub const SECRET_TOKEN_KEY: &str = "token";

/// Accessor ID of Consul's built-in anonymous token
pub const ANONYMOUS_TOKEN_ACCESSOR_ID: &str = "00000000-0000-0000-0000-000000000002";

/// Consul node name used by catalog sync
pub const DEFAULT_SYNC_CONSUL_NODE_NAME: &str = "k8s-sync";

/// Auth method type for Kubernetes service account JWTs
pub const AUTH_METHOD_TYPE: &str = "kubernetes";

/// Description stamped on the auth method
pub const AUTH_METHOD_DESCRIPTION: &str = "Kubernetes AuthMethod";

/// Description stamped on the binding rule
pub const BINDING_RULE_DESCRIPTION: &str = "Kubernetes binding rule";

/// Bind type of the binding rule
pub const BINDING_RULE_BIND_TYPE: &str = "service";

/// Bind name template of the binding rule
pub const BINDING_RULE_BIND_NAME: &str = "${serviceaccount.name}";

/// Name of the policy attached to every namespace's ACL defaults
pub const CROSS_NAMESPACE_POLICY_NAME: &str = "cross-namespace-policy";

/// Name of the policy used by the Consul server agents
pub const AGENT_POLICY_NAME: &str = "agent-token";

/// Key of the Secret recording which servers received their agent token
pub const AGENT_TOKENS_SECRET_KEY: &str = "servers";

/// Default Kubernetes API host for the auth method when the client URL is unavailable
pub const DEFAULT_KUBERNETES_HOST: &str = "https://kubernetes.default.svc";

/// Meta key marking Consul namespaces created from Kubernetes
pub const NAMESPACE_META_EXTERNAL_SOURCE: &str = "external-source";
