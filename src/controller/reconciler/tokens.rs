//! # ACL Tokens
//!
//! Component tokens are written to `<prefix>-<component>-acl-token` Secrets. An existing
//! Secret means the token was already issued and nothing is created. Server agent tokens
//! are tracked the same way by a single `<prefix>-server-agent-tokens` Secret.

use crate::constants::{
    AGENT_POLICY_NAME, AGENT_TOKENS_SECRET_KEY, ANONYMOUS_TOKEN_ACCESSOR_ID, SECRET_TOKEN_KEY,
};
use crate::controller::reconciler::status::ReconcilePhase;
use crate::controller::reconciler::types::ReconcilerError;
use crate::controller::rules::Capability;
use crate::provider::kubernetes::{Orchestrator, SecretWrite};
use crate::provider::{AclApi, AclToken, AclTokenPolicyLink};
use tracing::{debug, info, info_span, warn, Instrument};

const STEP: ReconcilePhase = ReconcilePhase::SyncingPolicies;

/// Name of the Secret holding a component token
pub fn token_secret_name(resource_prefix: &str, component: &str) -> String {
    format!("{resource_prefix}-{component}-acl-token")
}

/// Issue the token of `capability` unless its Secret already exists
///
/// Returns `true` when a token was created.
pub async fn ensure_component_token(
    acl: &dyn AclApi,
    orchestrator: &dyn Orchestrator,
    resource_prefix: &str,
    capability: Capability,
) -> Result<bool, ReconcilerError> {
    let Some(component) = capability.token_secret_component() else {
        return Ok(false);
    };
    let secret_name = token_secret_name(resource_prefix, component);
    let span = info_span!("reconcile.token", token.component = component, secret.name = %secret_name);

    async move {
        let existing = orchestrator
            .get_secret(&secret_name, SECRET_TOKEN_KEY)
            .await
            .map_err(|e| ReconcilerError::kubernetes(STEP, &secret_name, e))?;
        if existing.is_some() {
            debug!("Secret {} exists, skipping {} token", secret_name, component);
            return Ok(false);
        }

        let request = AclToken {
            description: format!("{component} Token"),
            policies: vec![AclTokenPolicyLink::named(capability.policy_name())],
            ..Default::default()
        };
        let token = acl
            .create_token(&request)
            .await
            .map_err(|e| ReconcilerError::api(STEP, format!("{component} token"), None, e))?;

        let write = orchestrator
            .create_secret(&secret_name, SECRET_TOKEN_KEY, &token.secret_id)
            .await
            .map_err(|e| ReconcilerError::kubernetes(STEP, &secret_name, e))?;
        if write == SecretWrite::AlreadyExists {
            warn!(
                "Secret {} was created concurrently, deleting unused token {}",
                secret_name, token.accessor_id
            );
            if let Err(e) = acl.delete_token(&token.accessor_id).await {
                warn!("Unused token {} left in Consul: {:#}", token.accessor_id, e);
            }
            return Ok(false);
        }
        info!("Created {} token", component);
        Ok(true)
    }
    .instrument(span)
    .await
}

/// Name of the Secret recording that the server agents hold their tokens
pub fn agent_tokens_secret_name(resource_prefix: &str) -> String {
    format!("{resource_prefix}-server-agent-tokens")
}

fn server_token_description(server: &str) -> String {
    format!("Server Token for {server}")
}

/// Give every server agent its agent token, once
///
/// Runs until `<prefix>-server-agent-tokens` exists, so an interrupted run finishes the job
/// on the next attempt. Tokens created by an earlier attempt are reused by description.
/// Returns `true` when tokens were installed.
pub async fn install_server_agent_tokens(
    acl: &dyn AclApi,
    orchestrator: &dyn Orchestrator,
    resource_prefix: &str,
    servers: &[String],
) -> Result<bool, ReconcilerError> {
    let secret_name = agent_tokens_secret_name(resource_prefix);
    let installed = orchestrator
        .get_secret(&secret_name, AGENT_TOKENS_SECRET_KEY)
        .await
        .map_err(|e| ReconcilerError::kubernetes(STEP, &secret_name, e))?;
    if installed.is_some() {
        debug!("Secret {} exists, agent tokens already installed", secret_name);
        return Ok(false);
    }

    let existing = acl
        .list_tokens()
        .await
        .map_err(|e| ReconcilerError::api(STEP, "tokens", None, e))?;

    for server in servers {
        let object = format!("agent token for server {server}");
        let description = server_token_description(server);

        let previous = existing.iter().find(|t| t.description == description);
        let token = match previous {
            Some(listed) => acl
                .read_token(&listed.accessor_id)
                .await
                .map_err(|e| ReconcilerError::api(STEP, &object, None, e))?
                .ok_or_else(|| {
                    ReconcilerError::invariant(
                        STEP,
                        format!("token {} vanished while reading it", listed.accessor_id),
                    )
                })?,
            None => {
                let request = AclToken {
                    description,
                    policies: vec![AclTokenPolicyLink::named(AGENT_POLICY_NAME)],
                    ..Default::default()
                };
                acl.create_token(&request)
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, None, e))?
            }
        };

        acl.set_agent_token(server, &token.secret_id)
            .await
            .map_err(|e| ReconcilerError::api(STEP, &object, None, e))?;
        info!("Installed agent token on server {}", server);
    }

    orchestrator
        .create_secret(&secret_name, AGENT_TOKENS_SECRET_KEY, &servers.join(","))
        .await
        .map_err(|e| ReconcilerError::kubernetes(STEP, &secret_name, e))?;
    Ok(true)
}

/// Let anonymous requests resolve DNS by linking the DNS policy to the anonymous token
///
/// Returns `true` when the token was updated.
pub async fn allow_dns_on_anonymous_token(acl: &dyn AclApi) -> Result<bool, ReconcilerError> {
    let policy_name = Capability::Dns.policy_name();
    let object = "anonymous token";

    let mut token = acl
        .read_token(ANONYMOUS_TOKEN_ACCESSOR_ID)
        .await
        .map_err(|e| ReconcilerError::api(STEP, object, None, e))?
        .ok_or_else(|| ReconcilerError::invariant(STEP, "Consul anonymous token not found"))?;

    if token.has_policy(policy_name) {
        debug!("Anonymous token already links {}", policy_name);
        return Ok(false);
    }

    token.policies.push(AclTokenPolicyLink::named(policy_name));
    acl.update_token(&token)
        .await
        .map_err(|e| ReconcilerError::api(STEP, object, None, e))?;
    info!("Linked {} to the anonymous token", policy_name);
    Ok(true)
}
