//! # Consul REST Client
//!
//! Talks to the Consul HTTP API of one server agent. Requests are authenticated with the
//! `X-Consul-Token` header once a token is attached via [`ControlPlane::with_token`].
//!
//! API Reference: https://developer.hashicorp.com/consul/api-docs/acl

use super::types::{
    AclAuthMethod, AclAuthMethodListEntry, AclBindingRule, AclPolicy, AclPolicyListEntry,
    AclToken, ConsulNamespace,
};
use crate::provider::{AclApi, BootstrapOutcome, ControlPlane, ControlPlaneConnector};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument};
use zeroize::Zeroizing;

/// Marker Consul puts in the 403 body once bootstrap has been used
const BOOTSTRAP_NO_LONGER_ALLOWED: &str = "bootstrap no longer allowed";

/// How to reach the Consul servers
#[derive(Debug, Clone)]
pub struct ConsulConnection {
    /// `http` or `https`
    pub scheme: String,
    /// Server address (pod IP or DNS name) used for ACL calls
    pub server_address: String,
    /// HTTP(S) port of the server agents
    pub port: u16,
    /// PEM bundle used to verify the servers' certificates
    pub ca_cert: Option<PathBuf>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl ControlPlaneConnector for ConsulConnection {
    fn connect(&self, server_address: &str) -> Result<Arc<dyn ControlPlane>> {
        let connection = ConsulConnection {
            server_address: server_address.to_string(),
            ..self.clone()
        };
        Ok(Arc::new(ConsulREST::new(&connection)?))
    }
}

/// Consul HTTP API client
#[derive(Clone)]
pub struct ConsulREST {
    http_client: Client,
    scheme: String,
    port: u16,
    base_url: String,
    token: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for ConsulREST {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulREST")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl ConsulREST {
    /// Create a client for the server described by `connection`
    ///
    /// # Errors
    /// Returns an error if the CA bundle cannot be read or the HTTP client cannot be built
    pub fn new(connection: &ConsulConnection) -> Result<Self> {
        let mut builder = Client::builder().timeout(connection.request_timeout);

        if let Some(ca_path) = &connection.ca_cert {
            let pem = std::fs::read(ca_path)
                .with_context(|| format!("Failed to read Consul CA certificate {}", ca_path.display()))?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .context("Consul CA certificate is not valid PEM")?;
            builder = builder.add_root_certificate(certificate);
        }

        let http_client = builder.build().context("Failed to create HTTP client")?;
        let base_url = agent_url(&connection.scheme, &connection.server_address, connection.port);
        info!("Consul API endpoint: {}", base_url);

        Ok(Self {
            http_client,
            scheme: connection.scheme.clone(),
            port: connection.port,
            base_url,
            token: None,
        })
    }

    /// Create a client for an explicit base URL (e.g. `http://127.0.0.1:8500`)
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn from_base_url(base_url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(base_url)
            .with_context(|| format!("Invalid Consul base URL {base_url}"))?;
        let http_client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http_client,
            scheme: url.scheme().to_string(),
            port: url.port_or_known_default().unwrap_or(crate::constants::DEFAULT_CONSUL_HTTP_PORT),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, url);
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token.as_str()),
            None => builder,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .request(Method::GET, &self.url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to call Consul GET {path}"))?;
        decode(response, "GET", path).await
    }

    /// GET that maps "not found" responses to `None`
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let response = self
            .request(Method::GET, &self.url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to call Consul GET {path}"))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            // Older servers answer 403 "ACL not found" for missing objects, which is also
            // the answer to an unknown caller token
            if body.to_lowercase().contains("not found") && self.caller_token_accepted().await? {
                return Ok(None);
            }
            return Err(anyhow::anyhow!(
                "Consul API GET {path} returned HTTP {status}: {body}"
            ));
        }
        decode(response, "GET", path).await.map(Some)
    }

    /// Whether Consul resolves the token this client sends
    async fn caller_token_accepted(&self) -> Result<bool> {
        let path = "/v1/acl/token/self";
        let response = self
            .request(Method::GET, &self.url(path))
            .send()
            .await
            .with_context(|| format!("Failed to call Consul GET {path}"))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::FORBIDDEN => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow::anyhow!(
                    "Consul API GET {path} returned HTTP {status}: {body}"
                ))
            }
        }
    }

    async fn delete(&self, path: &str, query: &[(&str, &str)], object: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &self.url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to call Consul DELETE {path}"))?;
        let deleted: bool = decode(response, "DELETE", path).await?;
        if !deleted {
            return Err(anyhow::anyhow!("Consul refused to delete {object}"));
        }
        Ok(())
    }

    async fn put_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T> {
        let response = self
            .request(Method::PUT, &self.url(path))
            .query(query)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call Consul PUT {path}"))?;
        decode(response, "PUT", path).await
    }
}

/// Build the base URL of an agent, bracketing IPv6 literals
fn agent_url(scheme: &str, address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("{scheme}://[{address}]:{port}")
    } else {
        format!("{scheme}://{address}:{port}")
    }
}

fn ns_query(namespace: Option<&str>) -> Vec<(&'static str, &str)> {
    namespace.map(|ns| vec![("ns", ns)]).unwrap_or_default()
}

async fn decode<T: DeserializeOwned>(response: Response, method: &str, path: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!(
            "Consul API {method} {path} returned HTTP {status}: {body}"
        ));
    }
    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to decode Consul {method} {path} response"))
}

#[async_trait]
impl ControlPlane for ConsulREST {
    async fn bootstrap(&self) -> Result<BootstrapOutcome> {
        let span = info_span!("consul.acl.bootstrap", consul.endpoint = %self.base_url);
        async move {
            let path = "/v1/acl/bootstrap";
            let response = self
                .request(Method::PUT, &self.url(path))
                .send()
                .await
                .context("Failed to call Consul ACL bootstrap")?;

            let status = response.status();
            if status.is_success() {
                let token: AclToken = response
                    .json()
                    .await
                    .context("Failed to decode Consul ACL bootstrap response")?;
                info!(accessor_id = %token.accessor_id, "ACL system bootstrapped");
                return Ok(BootstrapOutcome::Minted(token));
            }

            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::FORBIDDEN && body.contains(BOOTSTRAP_NO_LONGER_ALLOWED) {
                debug!("Consul reports ACLs already bootstrapped");
                return Ok(BootstrapOutcome::AlreadyBootstrapped);
            }
            Err(anyhow::anyhow!(
                "Consul API PUT {path} returned HTTP {status}: {body}"
            ))
        }
        .instrument(span)
        .await
    }

    fn with_token(&self, token: &str) -> Arc<dyn AclApi> {
        let mut client = self.clone();
        client.token = Some(Zeroizing::new(token.to_string()));
        Arc::new(client)
    }
}

#[async_trait]
impl AclApi for ConsulREST {
    async fn list_policies(&self, namespace: Option<&str>) -> Result<Vec<AclPolicyListEntry>> {
        self.get_json("/v1/acl/policies", &ns_query(namespace)).await
    }

    async fn read_policy(&self, id: &str, namespace: Option<&str>) -> Result<Option<AclPolicy>> {
        self.get_optional(&format!("/v1/acl/policy/{id}"), &ns_query(namespace))
            .await
    }

    async fn create_policy(&self, policy: &AclPolicy) -> Result<AclPolicy> {
        let span = info_span!("consul.acl.policy.create", policy.name = %policy.name);
        self.put_json("/v1/acl/policy", &[], policy)
            .instrument(span)
            .await
    }

    async fn update_policy(&self, id: &str, policy: &AclPolicy) -> Result<AclPolicy> {
        let span = info_span!("consul.acl.policy.update", policy.name = %policy.name, policy.id = id);
        self.put_json(&format!("/v1/acl/policy/{id}"), &[], policy)
            .instrument(span)
            .await
    }

    async fn list_auth_methods(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<AclAuthMethodListEntry>> {
        self.get_json("/v1/acl/auth-methods", &ns_query(namespace))
            .await
    }

    async fn read_auth_method(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<AclAuthMethod>> {
        self.get_optional(&format!("/v1/acl/auth-method/{name}"), &ns_query(namespace))
            .await
    }

    async fn create_auth_method(&self, method: &AclAuthMethod) -> Result<AclAuthMethod> {
        let span = info_span!("consul.acl.auth_method.create", auth_method.name = %method.name);
        self.put_json("/v1/acl/auth-method", &[], method)
            .instrument(span)
            .await
    }

    async fn update_auth_method(&self, method: &AclAuthMethod) -> Result<AclAuthMethod> {
        let span = info_span!("consul.acl.auth_method.update", auth_method.name = %method.name);
        self.put_json(&format!("/v1/acl/auth-method/{}", method.name), &[], method)
            .instrument(span)
            .await
    }

    async fn delete_auth_method(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        self.delete(
            &format!("/v1/acl/auth-method/{name}"),
            &ns_query(namespace),
            &format!("auth method {name}"),
        )
        .await
    }

    async fn list_binding_rules(
        &self,
        auth_method: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<AclBindingRule>> {
        let mut query = vec![("authmethod", auth_method)];
        query.extend(ns_query(namespace));
        self.get_json("/v1/acl/binding-rules", &query).await
    }

    async fn create_binding_rule(&self, rule: &AclBindingRule) -> Result<AclBindingRule> {
        let span = info_span!("consul.acl.binding_rule.create", auth_method.name = %rule.auth_method);
        self.put_json("/v1/acl/binding-rule", &[], rule)
            .instrument(span)
            .await
    }

    async fn update_binding_rule(&self, id: &str, rule: &AclBindingRule) -> Result<AclBindingRule> {
        let span = info_span!("consul.acl.binding_rule.update", binding_rule.id = id);
        self.put_json(&format!("/v1/acl/binding-rule/{id}"), &[], rule)
            .instrument(span)
            .await
    }

    async fn list_tokens(&self) -> Result<Vec<AclToken>> {
        self.get_json("/v1/acl/tokens", &[]).await
    }

    async fn create_token(&self, token: &AclToken) -> Result<AclToken> {
        let span = info_span!("consul.acl.token.create", token.description = %token.description);
        self.put_json("/v1/acl/token", &[], token)
            .instrument(span)
            .await
    }

    async fn read_token(&self, accessor_id: &str) -> Result<Option<AclToken>> {
        self.get_optional(&format!("/v1/acl/token/{accessor_id}"), &[])
            .await
    }

    async fn read_self_token(&self) -> Result<AclToken> {
        self.get_json("/v1/acl/token/self", &[]).await
    }

    async fn update_token(&self, token: &AclToken) -> Result<AclToken> {
        let span = info_span!("consul.acl.token.update", token.accessor_id = %token.accessor_id);
        self.put_json(&format!("/v1/acl/token/{}", token.accessor_id), &[], token)
            .instrument(span)
            .await
    }

    async fn delete_token(&self, accessor_id: &str) -> Result<()> {
        let span = info_span!("consul.acl.token.delete", token.accessor_id = accessor_id);
        self.delete(
            &format!("/v1/acl/token/{accessor_id}"),
            &[],
            &format!("token {accessor_id}"),
        )
        .instrument(span)
        .await
    }

    async fn read_namespace(&self, name: &str) -> Result<Option<ConsulNamespace>> {
        self.get_optional(&format!("/v1/namespace/{name}"), &[])
            .await
    }

    async fn create_namespace(&self, namespace: &ConsulNamespace) -> Result<ConsulNamespace> {
        let span = info_span!("consul.namespace.create", namespace.name = %namespace.name);
        self.put_json("/v1/namespace", &[], namespace)
            .instrument(span)
            .await
    }

    async fn update_namespace(&self, namespace: &ConsulNamespace) -> Result<ConsulNamespace> {
        let span = info_span!("consul.namespace.update", namespace.name = %namespace.name);
        self.put_json(&format!("/v1/namespace/{}", namespace.name), &[], namespace)
            .instrument(span)
            .await
    }

    async fn set_agent_token(&self, server_address: &str, token: &str) -> Result<()> {
        let url = format!(
            "{}/v1/agent/token/agent",
            agent_url(&self.scheme, server_address, self.port)
        );
        let response = self
            .request(Method::PUT, &url)
            .json(&json!({ "Token": token }))
            .send()
            .await
            .with_context(|| format!("Failed to set agent token on {server_address}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Setting agent token on {server_address} returned HTTP {status}: {body}"
            ));
        }
        Ok(())
    }
}
