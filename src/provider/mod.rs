//! # Providers
//!
//! Narrow interfaces to the two external systems the bootstrapper talks to:
//!
//! - [`ControlPlane`] / [`AclApi`]: the Consul HTTP API (bootstrap, policies, auth methods,
//!   binding rules, tokens, namespaces)
//! - [`kubernetes::Orchestrator`]: the Kubernetes API (server pods, token Secrets, service accounts)
//!
//! The reconciler only ever sees these traits, so the whole flow can run against in-memory fakes.

pub mod consul;
pub mod kubernetes;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use consul::types::{
    AclAuthMethod, AclAuthMethodListEntry, AclBindingRule, AclPolicy, AclPolicyListEntry,
    AclToken, AclTokenPolicyLink, ConsulNamespace, NamespaceAclConfig,
};

/// Result of calling the one-time ACL bootstrap endpoint
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// This call minted the root token
    Minted(AclToken),
    /// ACLs were bootstrapped earlier (by another actor or a previous run)
    AlreadyBootstrapped,
}

/// Unauthenticated entry point to the Consul cluster
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Call the one-time ACL bootstrap operation
    async fn bootstrap(&self) -> Result<BootstrapOutcome>;

    /// Return an ACL client that authenticates every request with `token`
    fn with_token(&self, token: &str) -> Arc<dyn AclApi>;
}

/// Opens a [`ControlPlane`] against one Consul server
///
/// The server to talk to is only known once the readiness gate has seen the pods.
pub trait ControlPlaneConnector: Send + Sync {
    fn connect(&self, server_address: &str) -> Result<Arc<dyn ControlPlane>>;
}

/// Authenticated Consul ACL management API
///
/// Every `namespace` argument maps to Consul's `ns` query parameter; `None` omits it so that
/// clusters without namespace support keep working.
#[async_trait]
pub trait AclApi: Send + Sync {
    async fn list_policies(&self, namespace: Option<&str>) -> Result<Vec<AclPolicyListEntry>>;
    async fn read_policy(&self, id: &str, namespace: Option<&str>) -> Result<Option<AclPolicy>>;
    async fn create_policy(&self, policy: &AclPolicy) -> Result<AclPolicy>;
    async fn update_policy(&self, id: &str, policy: &AclPolicy) -> Result<AclPolicy>;

    async fn list_auth_methods(&self, namespace: Option<&str>)
        -> Result<Vec<AclAuthMethodListEntry>>;
    async fn read_auth_method(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<AclAuthMethod>>;
    async fn create_auth_method(&self, method: &AclAuthMethod) -> Result<AclAuthMethod>;
    async fn update_auth_method(&self, method: &AclAuthMethod) -> Result<AclAuthMethod>;
    async fn delete_auth_method(&self, name: &str, namespace: Option<&str>) -> Result<()>;

    async fn list_binding_rules(
        &self,
        auth_method: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<AclBindingRule>>;
    async fn create_binding_rule(&self, rule: &AclBindingRule) -> Result<AclBindingRule>;
    async fn update_binding_rule(&self, id: &str, rule: &AclBindingRule) -> Result<AclBindingRule>;

    /// Tokens without their SecretID
    async fn list_tokens(&self) -> Result<Vec<AclToken>>;
    async fn create_token(&self, token: &AclToken) -> Result<AclToken>;
    async fn read_token(&self, accessor_id: &str) -> Result<Option<AclToken>>;
    /// The token this client authenticates with; fails when Consul does not accept it
    async fn read_self_token(&self) -> Result<AclToken>;
    async fn update_token(&self, token: &AclToken) -> Result<AclToken>;
    async fn delete_token(&self, accessor_id: &str) -> Result<()>;

    async fn read_namespace(&self, name: &str) -> Result<Option<ConsulNamespace>>;
    async fn create_namespace(&self, namespace: &ConsulNamespace) -> Result<ConsulNamespace>;
    async fn update_namespace(&self, namespace: &ConsulNamespace) -> Result<ConsulNamespace>;

    /// Install `token` as the agent token of the server agent at `server_address`
    async fn set_agent_token(&self, server_address: &str, token: &str) -> Result<()>;
}
