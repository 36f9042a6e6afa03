//! # Kubernetes Provider
//!
//! Everything the bootstrapper needs from the orchestrator: the server pods it waits on,
//! the Secrets used as a write-once credential store, and the service account whose JWT
//! the auth method uses to call the TokenReview API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, Instrument};
use zeroize::Zeroizing;

const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";
const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// Observed state of one server pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatus {
    pub name: String,
    /// `Ready` condition is `True`
    pub ready: bool,
    pub ip: Option<String>,
}

impl PodStatus {
    /// Ready and addressable
    pub fn is_serving(&self) -> bool {
        self.ready && self.ip.as_deref().is_some_and(|ip| !ip.is_empty())
    }
}

/// Result of a write-once Secret create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretWrite {
    Created,
    /// Someone else created the Secret first; nothing was written
    AlreadyExists,
}

/// Credentials of the service account the auth method authenticates with
#[derive(Clone)]
pub struct ServiceAccountCredentials {
    pub jwt: Zeroizing<String>,
    pub ca_cert: String,
}

impl std::fmt::Debug for ServiceAccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountCredentials")
            .field("jwt", &"<redacted>")
            .field("ca_cert_len", &self.ca_cert.len())
            .finish()
    }
}

/// Orchestrator operations used by the reconciler
///
/// All calls are scoped to the namespace the bootstrapper was configured with.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Pods matching `label_selector`
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodStatus>>;

    /// Value stored under `key` in Secret `name`
    ///
    /// `None` when the Secret does not exist. An existing Secret without `key` yields an
    /// empty value so callers can tell "absent" from "present but unusable".
    async fn get_secret(&self, name: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Create Secret `name` holding `value` under `key`, never overwriting
    async fn create_secret(&self, name: &str, key: &str, value: &str) -> Result<SecretWrite>;

    /// JWT and CA certificate of service account `name`
    async fn service_account_credentials(&self, name: &str) -> Result<ServiceAccountCredentials>;

    /// URL of the Kubernetes API server as seen by this process
    fn api_server_host(&self) -> String;
}

/// [`Orchestrator`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    namespace: String,
    api_host: String,
}

impl std::fmt::Debug for KubeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeOrchestrator")
            .field("namespace", &self.namespace)
            .field("api_host", &self.api_host)
            .finish_non_exhaustive()
    }
}

impl KubeOrchestrator {
    /// Build a client from the in-cluster config or the local kubeconfig
    ///
    /// # Errors
    /// Returns an error if no usable Kubernetes configuration is found
    pub async fn infer(namespace: &str) -> Result<Self> {
        let config = kube::Config::infer()
            .await
            .context("Failed to load Kubernetes configuration")?;
        let api_host = config.cluster_url.to_string().trim_end_matches('/').to_string();
        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;

        info!("Kubernetes API server: {}", api_host);
        Ok(Self {
            client,
            namespace: namespace.to_string(),
            api_host,
        })
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn find_service_account_token_secret(&self, sa_name: &str) -> Result<Secret> {
        let secrets = self.secrets();

        let service_accounts: Api<ServiceAccount> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let service_account = service_accounts
            .get(sa_name)
            .await
            .with_context(|| format!("Failed to get service account {}/{}", self.namespace, sa_name))?;

        // Pre-1.24 clusters reference the token Secret from the service account
        let referenced = service_account
            .secrets
            .unwrap_or_default()
            .into_iter()
            .find_map(|reference| reference.name);
        if let Some(secret_name) = referenced {
            debug!("Using token Secret {} referenced by service account {}", secret_name, sa_name);
            return secrets
                .get(&secret_name)
                .await
                .with_context(|| format!("Failed to get Secret {}/{}", self.namespace, secret_name));
        }

        let params = ListParams::default().fields(&format!("type={SERVICE_ACCOUNT_TOKEN_TYPE}"));
        let candidates = secrets
            .list(&params)
            .await
            .with_context(|| format!("Failed to list token Secrets in {}", self.namespace))?;

        candidates
            .items
            .into_iter()
            .find(|secret| {
                secret
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(SERVICE_ACCOUNT_NAME_ANNOTATION))
                    .is_some_and(|name| name == sa_name)
            })
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No token Secret found for service account {}/{}",
                    self.namespace,
                    sa_name
                )
            })
    }
}

fn pod_status(pod: &Pod) -> PodStatus {
    let status = pod.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });
    PodStatus {
        name: pod.metadata.name.clone().unwrap_or_default(),
        ready,
        ip: status.and_then(|s| s.pod_ip.clone()),
    }
}

fn secret_value(secret: &Secret, key: &str) -> Vec<u8> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| bytes.0.clone())
        .unwrap_or_default()
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodStatus>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await
            .with_context(|| format!("Failed to list pods matching {label_selector}"))?;
        Ok(list.items.iter().map(pod_status).collect())
    }

    async fn get_secret(&self, name: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match self.secrets().get(name).await {
            Ok(secret) => Ok(Some(secret_value(&secret, key))),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to get Secret {}/{}", self.namespace, name))),
        }
    }

    async fn create_secret(&self, name: &str, key: &str, value: &str) -> Result<SecretWrite> {
        let span = info_span!("kubernetes.secret.create", secret.name = name, secret.namespace = %self.namespace);
        async move {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(self.namespace.clone()),
                    labels: Some(BTreeMap::from([(
                        "app.kubernetes.io/managed-by".to_string(),
                        "server-acl-init".to_string(),
                    )])),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([(
                    key.to_string(),
                    ByteString(value.as_bytes().to_vec()),
                )])),
                type_: Some("Opaque".to_string()),
                ..Default::default()
            };

            match self.secrets().create(&PostParams::default(), &secret).await {
                Ok(_) => {
                    info!("Created Secret {}/{}", self.namespace, name);
                    Ok(SecretWrite::Created)
                }
                Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                    debug!("Secret {}/{} already exists", self.namespace, name);
                    Ok(SecretWrite::AlreadyExists)
                }
                Err(e) => Err(anyhow::Error::new(e)
                    .context(format!("Failed to create Secret {}/{}", self.namespace, name))),
            }
        }
        .instrument(span)
        .await
    }

    async fn service_account_credentials(&self, name: &str) -> Result<ServiceAccountCredentials> {
        let secret = self.find_service_account_token_secret(name).await?;
        let secret_name = secret.metadata.name.clone().unwrap_or_default();

        let jwt = String::from_utf8(secret_value(&secret, "token"))
            .with_context(|| format!("Token in Secret {secret_name} is not valid UTF-8"))?;
        let ca_cert = String::from_utf8(secret_value(&secret, "ca.crt"))
            .with_context(|| format!("ca.crt in Secret {secret_name} is not valid UTF-8"))?;
        if jwt.is_empty() {
            return Err(anyhow::anyhow!("Secret {secret_name} has no service account token"));
        }

        Ok(ServiceAccountCredentials {
            jwt: Zeroizing::new(jwt),
            ca_cert,
        })
    }

    fn api_server_host(&self) -> String {
        self.api_host.clone()
    }
}
