//! In-memory Consul and Kubernetes used by the integration tests
//!
//! `FakeConsul` models the parts of the ACL API the reconciler touches, including
//! Enterprise namespaces and the cascade delete of binding rules with their auth method.
//! Every mutating call bumps a write counter so tests can assert idempotence.

#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use server_acl_init::config::AclInitConfig;
use server_acl_init::constants::ANONYMOUS_TOKEN_ACCESSOR_ID;
use server_acl_init::provider::kubernetes::{
    Orchestrator, PodStatus, SecretWrite, ServiceAccountCredentials,
};
use server_acl_init::provider::{
    AclApi, AclAuthMethod, AclAuthMethodListEntry, AclBindingRule, AclPolicy, AclPolicyListEntry,
    AclToken, BootstrapOutcome, ConsulNamespace, ControlPlane, ControlPlaneConnector,
};
use server_acl_init::Reconciler;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zeroize::Zeroizing;

pub const RESOURCE_PREFIX: &str = "release-consul";
pub const AUTH_METHOD_NAME: &str = "release-consul-k8s-auth-method";
pub const BOOTSTRAP_SECRET: &str = "release-consul-bootstrap-acl-token";

fn effective(ns: Option<&str>) -> String {
    match ns {
        Some(ns) if !ns.is_empty() => ns.to_string(),
        _ => "default".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Consul
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ConsulState {
    pub bootstrapped: bool,
    pub accepted_tokens: BTreeSet<String>,
    pub policies: Vec<AclPolicy>,
    pub auth_methods: Vec<AclAuthMethod>,
    pub binding_rules: Vec<AclBindingRule>,
    pub tokens: Vec<AclToken>,
    pub namespaces: BTreeMap<String, ConsulNamespace>,
    pub agent_tokens: BTreeMap<String, String>,
    pub writes: usize,
    next_id: usize,
}

impl ConsulState {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{}", self.next_id)
    }
}

#[derive(Debug, Clone)]
pub struct FakeConsul {
    pub state: Arc<Mutex<ConsulState>>,
    token: Option<String>,
}

impl FakeConsul {
    /// A fresh, not yet bootstrapped cluster with the built-in anonymous token and namespace
    pub fn new() -> Self {
        let mut state = ConsulState::default();
        state.tokens.push(AclToken {
            accessor_id: ANONYMOUS_TOKEN_ACCESSOR_ID.to_string(),
            secret_id: "anonymous".to_string(),
            description: "Anonymous Token".to_string(),
            ..Default::default()
        });
        state.namespaces.insert(
            "default".to_string(),
            ConsulNamespace {
                name: "default".to_string(),
                description: "Builtin Default Namespace".to_string(),
                ..Default::default()
            },
        );
        Self {
            state: Arc::new(Mutex::new(state)),
            token: None,
        }
    }

    /// A cluster that was bootstrapped earlier with `root_token`
    pub fn bootstrapped_with(root_token: &str) -> Self {
        let consul = Self::new();
        {
            let mut state = consul.state.lock().unwrap();
            state.bootstrapped = true;
            state.accepted_tokens.insert(root_token.to_string());
        }
        consul
    }

    pub fn accept_token(&self, token: &str) {
        self.state
            .lock()
            .unwrap()
            .accepted_tokens
            .insert(token.to_string());
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn policy_rules(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .policies
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.rules.clone())
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .policies
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn auth_methods(&self) -> Vec<AclAuthMethod> {
        self.state.lock().unwrap().auth_methods.clone()
    }

    pub fn binding_rules(&self) -> Vec<AclBindingRule> {
        self.state.lock().unwrap().binding_rules.clone()
    }

    pub fn namespace(&self, name: &str) -> Option<ConsulNamespace> {
        self.state.lock().unwrap().namespaces.get(name).cloned()
    }

    pub fn token(&self, accessor_id: &str) -> Option<AclToken> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .iter()
            .find(|t| t.accessor_id == accessor_id)
            .cloned()
    }

    pub fn token_by_secret(&self, secret_id: &str) -> Option<AclToken> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .iter()
            .find(|t| t.secret_id == secret_id)
            .cloned()
    }

    pub fn agent_tokens(&self) -> BTreeMap<String, String> {
        self.state.lock().unwrap().agent_tokens.clone()
    }

    /// Seed an auth method directly, bypassing the write counter
    pub fn seed_auth_method(&self, method: AclAuthMethod) {
        let mut state = self.state.lock().unwrap();
        let namespace = effective(method.namespace.as_deref());
        state.auth_methods.push(AclAuthMethod {
            namespace: Some(namespace),
            ..method
        });
    }

    /// Seed a binding rule directly, bypassing the write counter
    pub fn seed_binding_rule(&self, rule: AclBindingRule) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("rule");
        let namespace = effective(rule.namespace.as_deref());
        state.binding_rules.push(AclBindingRule {
            id,
            namespace: Some(namespace),
            ..rule
        });
    }

    fn authorized(&self) -> Result<std::sync::MutexGuard<'_, ConsulState>> {
        let state = self.state.lock().unwrap();
        match &self.token {
            Some(token) if state.accepted_tokens.contains(token) => Ok(state),
            _ => Err(anyhow!("Consul API returned HTTP 403 Forbidden: ACL not found")),
        }
    }
}

#[async_trait]
impl ControlPlane for FakeConsul {
    async fn bootstrap(&self) -> Result<BootstrapOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.bootstrapped {
            return Ok(BootstrapOutcome::AlreadyBootstrapped);
        }
        state.bootstrapped = true;
        let accessor_id = state.next_id("accessor");
        let secret_id = state.next_id("root");
        state.accepted_tokens.insert(secret_id.clone());
        let token = AclToken {
            accessor_id,
            secret_id,
            description: "Bootstrap Token (Global Management)".to_string(),
            ..Default::default()
        };
        state.tokens.push(token.clone());
        state.writes += 1;
        Ok(BootstrapOutcome::Minted(token))
    }

    fn with_token(&self, token: &str) -> Arc<dyn AclApi> {
        Arc::new(FakeConsul {
            state: Arc::clone(&self.state),
            token: Some(token.to_string()),
        })
    }
}

impl ControlPlaneConnector for FakeConsul {
    fn connect(&self, _server_address: &str) -> Result<Arc<dyn ControlPlane>> {
        Ok(Arc::new(FakeConsul {
            state: Arc::clone(&self.state),
            token: None,
        }))
    }
}

#[async_trait]
impl AclApi for FakeConsul {
    async fn list_policies(&self, namespace: Option<&str>) -> Result<Vec<AclPolicyListEntry>> {
        let state = self.authorized()?;
        let ns = effective(namespace);
        Ok(state
            .policies
            .iter()
            .filter(|p| effective(p.namespace.as_deref()) == ns)
            .map(|p| AclPolicyListEntry {
                id: p.id.clone(),
                name: p.name.clone(),
                namespace: p.namespace.clone(),
            })
            .collect())
    }

    async fn read_policy(&self, id: &str, _namespace: Option<&str>) -> Result<Option<AclPolicy>> {
        let state = self.authorized()?;
        Ok(state.policies.iter().find(|p| p.id == id).cloned())
    }

    async fn create_policy(&self, policy: &AclPolicy) -> Result<AclPolicy> {
        let mut state = self.authorized()?;
        let ns = effective(policy.namespace.as_deref());
        if state
            .policies
            .iter()
            .any(|p| p.name == policy.name && effective(p.namespace.as_deref()) == ns)
        {
            return Err(anyhow!("Invalid Policy: A Policy with Name {} already exists", policy.name));
        }
        let created = AclPolicy {
            id: state.next_id("policy"),
            ..policy.clone()
        };
        state.policies.push(created.clone());
        state.writes += 1;
        Ok(created)
    }

    async fn update_policy(&self, id: &str, policy: &AclPolicy) -> Result<AclPolicy> {
        let mut state = self.authorized()?;
        let existing = state
            .policies
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| anyhow!("policy {id} not found"))?;
        existing.name = policy.name.clone();
        existing.description = policy.description.clone();
        existing.rules = policy.rules.clone();
        let updated = existing.clone();
        state.writes += 1;
        Ok(updated)
    }

    async fn list_auth_methods(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<AclAuthMethodListEntry>> {
        let state = self.authorized()?;
        Ok(state
            .auth_methods
            .iter()
            .filter(|m| namespace == Some("*") || m.namespace.as_deref() == Some(effective(namespace).as_str()))
            .map(|m| AclAuthMethodListEntry {
                name: m.name.clone(),
                method_type: m.method_type.clone(),
                namespace: m.namespace.clone(),
            })
            .collect())
    }

    async fn read_auth_method(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<AclAuthMethod>> {
        let state = self.authorized()?;
        let ns = effective(namespace);
        Ok(state
            .auth_methods
            .iter()
            .find(|m| m.name == name && m.namespace.as_deref() == Some(ns.as_str()))
            .cloned())
    }

    async fn create_auth_method(&self, method: &AclAuthMethod) -> Result<AclAuthMethod> {
        let mut state = self.authorized()?;
        let ns = effective(method.namespace.as_deref());
        if !state.namespaces.contains_key(&ns) {
            return Err(anyhow!("Namespace {ns} does not exist"));
        }
        if state
            .auth_methods
            .iter()
            .any(|m| m.name == method.name && m.namespace.as_deref() == Some(ns.as_str()))
        {
            return Err(anyhow!("auth method {} already exists", method.name));
        }
        let created = AclAuthMethod {
            namespace: Some(ns),
            ..method.clone()
        };
        state.auth_methods.push(created.clone());
        state.writes += 1;
        Ok(created)
    }

    async fn update_auth_method(&self, method: &AclAuthMethod) -> Result<AclAuthMethod> {
        let mut state = self.authorized()?;
        let ns = effective(method.namespace.as_deref());
        let existing = state
            .auth_methods
            .iter_mut()
            .find(|m| m.name == method.name && m.namespace.as_deref() == Some(ns.as_str()))
            .ok_or_else(|| anyhow!("auth method {} not found", method.name))?;
        *existing = AclAuthMethod {
            namespace: Some(ns),
            ..method.clone()
        };
        let updated = existing.clone();
        state.writes += 1;
        Ok(updated)
    }

    async fn delete_auth_method(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        let mut state = self.authorized()?;
        let ns = effective(namespace);
        let before = state.auth_methods.len();
        state
            .auth_methods
            .retain(|m| !(m.name == name && m.namespace.as_deref() == Some(ns.as_str())));
        if state.auth_methods.len() == before {
            return Err(anyhow!("auth method {name} not found in {ns}"));
        }
        state
            .binding_rules
            .retain(|r| !(r.auth_method == name && r.namespace.as_deref() == Some(ns.as_str())));
        state.writes += 1;
        Ok(())
    }

    async fn list_binding_rules(
        &self,
        auth_method: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<AclBindingRule>> {
        let state = self.authorized()?;
        let ns = effective(namespace);
        Ok(state
            .binding_rules
            .iter()
            .filter(|r| r.auth_method == auth_method && r.namespace.as_deref() == Some(ns.as_str()))
            .cloned()
            .collect())
    }

    async fn create_binding_rule(&self, rule: &AclBindingRule) -> Result<AclBindingRule> {
        let mut state = self.authorized()?;
        let ns = effective(rule.namespace.as_deref());
        if !state
            .auth_methods
            .iter()
            .any(|m| m.name == rule.auth_method && m.namespace.as_deref() == Some(ns.as_str()))
        {
            return Err(anyhow!("auth method {} not found in {ns}", rule.auth_method));
        }
        let created = AclBindingRule {
            id: state.next_id("rule"),
            namespace: Some(ns),
            ..rule.clone()
        };
        state.binding_rules.push(created.clone());
        state.writes += 1;
        Ok(created)
    }

    async fn update_binding_rule(&self, id: &str, rule: &AclBindingRule) -> Result<AclBindingRule> {
        let mut state = self.authorized()?;
        let existing = state
            .binding_rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("binding rule {id} not found"))?;
        existing.description = rule.description.clone();
        existing.selector = rule.selector.clone();
        existing.bind_type = rule.bind_type.clone();
        existing.bind_name = rule.bind_name.clone();
        let updated = existing.clone();
        state.writes += 1;
        Ok(updated)
    }

    async fn list_tokens(&self) -> Result<Vec<AclToken>> {
        let state = self.authorized()?;
        Ok(state
            .tokens
            .iter()
            .map(|t| AclToken {
                secret_id: String::new(),
                ..t.clone()
            })
            .collect())
    }

    async fn create_token(&self, token: &AclToken) -> Result<AclToken> {
        let mut state = self.authorized()?;
        let created = AclToken {
            accessor_id: state.next_id("accessor"),
            secret_id: state.next_id("secret"),
            ..token.clone()
        };
        state.tokens.push(created.clone());
        state.writes += 1;
        Ok(created)
    }

    async fn read_token(&self, accessor_id: &str) -> Result<Option<AclToken>> {
        let state = self.authorized()?;
        Ok(state
            .tokens
            .iter()
            .find(|t| t.accessor_id == accessor_id)
            .cloned())
    }

    async fn read_self_token(&self) -> Result<AclToken> {
        let state = self.authorized()?;
        let secret = self.token.clone().unwrap_or_default();
        Ok(state
            .tokens
            .iter()
            .find(|t| t.secret_id == secret)
            .cloned()
            .unwrap_or(AclToken {
                accessor_id: "root-accessor".to_string(),
                secret_id: secret,
                description: "Bootstrap Token (Global Management)".to_string(),
                ..Default::default()
            }))
    }

    async fn delete_token(&self, accessor_id: &str) -> Result<()> {
        let mut state = self.authorized()?;
        let before = state.tokens.len();
        state.tokens.retain(|t| t.accessor_id != accessor_id);
        if state.tokens.len() == before {
            return Err(anyhow!("token {accessor_id} not found"));
        }
        state.writes += 1;
        Ok(())
    }

    async fn update_token(&self, token: &AclToken) -> Result<AclToken> {
        let mut state = self.authorized()?;
        let existing = state
            .tokens
            .iter_mut()
            .find(|t| t.accessor_id == token.accessor_id)
            .ok_or_else(|| anyhow!("token {} not found", token.accessor_id))?;
        existing.policies = token.policies.clone();
        existing.description = token.description.clone();
        let updated = existing.clone();
        state.writes += 1;
        Ok(updated)
    }

    async fn read_namespace(&self, name: &str) -> Result<Option<ConsulNamespace>> {
        let state = self.authorized()?;
        Ok(state.namespaces.get(name).cloned())
    }

    async fn create_namespace(&self, namespace: &ConsulNamespace) -> Result<ConsulNamespace> {
        let mut state = self.authorized()?;
        if state.namespaces.contains_key(&namespace.name) {
            return Err(anyhow!("namespace {} already exists", namespace.name));
        }
        state
            .namespaces
            .insert(namespace.name.clone(), namespace.clone());
        state.writes += 1;
        Ok(namespace.clone())
    }

    async fn update_namespace(&self, namespace: &ConsulNamespace) -> Result<ConsulNamespace> {
        let mut state = self.authorized()?;
        if !state.namespaces.contains_key(&namespace.name) {
            return Err(anyhow!("namespace {} not found", namespace.name));
        }
        state
            .namespaces
            .insert(namespace.name.clone(), namespace.clone());
        state.writes += 1;
        Ok(namespace.clone())
    }

    async fn set_agent_token(&self, server_address: &str, token: &str) -> Result<()> {
        let mut state = self.authorized()?;
        state
            .agent_tokens
            .insert(server_address.to_string(), token.to_string());
        state.writes += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Kubernetes
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct KubeState {
    pub pods: Vec<PodStatus>,
    pub secrets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    pub service_accounts: BTreeMap<String, (String, String)>,
    /// Number of upcoming `list_pods` calls that fail
    pub list_errors: usize,
    /// Secrets reported missing for this many more reads
    pub hidden_reads: BTreeMap<String, usize>,
    /// Value another writer stores right before our create of that Secret
    pub racing_writes: BTreeMap<String, String>,
    pub secret_writes: usize,
    pub pod_lists: usize,
}

#[derive(Debug, Clone)]
pub struct FakeKube {
    pub state: Arc<Mutex<KubeState>>,
    api_host: String,
}

impl FakeKube {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(KubeState::default())),
            api_host: "https://10.96.0.1:443".to_string(),
        }
    }

    /// `count` Ready server pods with IPs `10.0.0.<n>`, plus the auth method service account
    pub fn with_servers(count: usize) -> Self {
        let kube = Self::new();
        for i in 0..count {
            kube.add_pod(&format!("release-consul-server-{i}"), true, Some(&format!("10.0.0.{}", i + 1)));
        }
        kube.add_service_account(
            "release-consul-connect-injector-authmethod-svc-account",
            "sa-jwt",
            "-----BEGIN CERTIFICATE-----\nca\n-----END CERTIFICATE-----",
        );
        kube
    }

    pub fn add_pod(&self, name: &str, ready: bool, ip: Option<&str>) {
        self.state.lock().unwrap().pods.push(PodStatus {
            name: name.to_string(),
            ready,
            ip: ip.map(str::to_string),
        });
    }

    pub fn add_service_account(&self, name: &str, jwt: &str, ca_cert: &str) {
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .insert(name.to_string(), (jwt.to_string(), ca_cert.to_string()));
    }

    pub fn put_secret(&self, name: &str, key: &str, value: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
    }

    pub fn secret(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(name)
            .and_then(|data| data.get("token"))
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn secret_writes(&self) -> usize {
        self.state.lock().unwrap().secret_writes
    }
}

#[async_trait]
impl Orchestrator for FakeKube {
    async fn list_pods(&self, _label_selector: &str) -> Result<Vec<PodStatus>> {
        let mut state = self.state.lock().unwrap();
        state.pod_lists += 1;
        if state.list_errors > 0 {
            state.list_errors -= 1;
            return Err(anyhow!("the server is currently unable to handle the request"));
        }
        Ok(state.pods.clone())
    }

    async fn get_secret(&self, name: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.hidden_reads.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        Ok(state
            .secrets
            .get(name)
            .map(|data| data.get(key).cloned().unwrap_or_default()))
    }

    async fn create_secret(&self, name: &str, key: &str, value: &str) -> Result<SecretWrite> {
        let mut state = self.state.lock().unwrap();
        if let Some(theirs) = state.racing_writes.remove(name) {
            state
                .secrets
                .insert(name.to_string(), BTreeMap::from([(key.to_string(), theirs.into_bytes())]));
        }
        if state.secrets.contains_key(name) {
            return Ok(SecretWrite::AlreadyExists);
        }
        state.secrets.insert(
            name.to_string(),
            BTreeMap::from([(key.to_string(), value.as_bytes().to_vec())]),
        );
        state.secret_writes += 1;
        Ok(SecretWrite::Created)
    }

    async fn service_account_credentials(&self, name: &str) -> Result<ServiceAccountCredentials> {
        let state = self.state.lock().unwrap();
        let (jwt, ca_cert) = state
            .service_accounts
            .get(name)
            .ok_or_else(|| anyhow!("serviceaccounts \"{name}\" not found"))?;
        Ok(ServiceAccountCredentials {
            jwt: Zeroizing::new(jwt.clone()),
            ca_cert: ca_cert.clone(),
        })
    }

    fn api_server_host(&self) -> String {
        self.api_host.clone()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn base_config() -> AclInitConfig {
    AclInitConfig {
        resource_prefix: RESOURCE_PREFIX.to_string(),
        k8s_namespace: "default".to_string(),
        server_label_selector: "component=server,app=consul,release=release".to_string(),
        expected_replicas: 1,
        timeout: Duration::from_secs(2),
        server_poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Enable namespaces for both connect-inject and catalog sync
pub fn enable_namespaces(config: &mut AclInitConfig) {
    config.inject_namespaces.enabled = true;
    config.sync_namespaces.enabled = true;
}

pub fn reconciler(config: AclInitConfig, kube: &FakeKube, consul: &FakeConsul) -> Reconciler {
    Reconciler::new(config, Arc::new(kube.clone()), Arc::new(consul.clone()))
}
