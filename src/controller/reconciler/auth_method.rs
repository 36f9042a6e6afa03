//! # Auth Method Synchronizer
//!
//! Keeps exactly one `kubernetes` auth method. It is looked up across all Consul namespaces
//! so that a namespace change moves it instead of leaving a stale copy behind.

use crate::constants::{
    AUTH_METHOD_DESCRIPTION, AUTH_METHOD_TYPE, CROSS_NAMESPACE_POLICY_NAME,
    DEFAULT_CONSUL_NAMESPACE, NAMESPACE_META_EXTERNAL_SOURCE, WILDCARD_NAMESPACE,
};
use crate::controller::namespace::NamespaceMode;
use crate::controller::reconciler::status::ReconcilePhase;
use crate::controller::reconciler::types::{ReconcilerError, SyncPlan};
use crate::provider::kubernetes::ServiceAccountCredentials;
use crate::provider::{AclApi, AclAuthMethod, AclTokenPolicyLink, ConsulNamespace, NamespaceAclConfig};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, Instrument};

const STEP: ReconcilePhase = ReconcilePhase::SyncingAuthMethod;

pub fn auth_method_name(resource_prefix: &str) -> String {
    format!("{resource_prefix}-k8s-auth-method")
}

/// Service account whose JWT the auth method uses for TokenReview calls
pub fn auth_method_service_account_name(resource_prefix: &str) -> String {
    format!("{resource_prefix}-connect-injector-authmethod-svc-account")
}

/// Build the auth method for `mode`
///
/// `MapNamespaces` and `ConsulNamespacePrefix` are only present when mirroring.
pub fn desired_auth_method(
    name: &str,
    mode: &NamespaceMode,
    host: &str,
    credentials: &ServiceAccountCredentials,
) -> AclAuthMethod {
    let mut config = BTreeMap::from([
        ("Host".to_string(), Value::String(host.to_string())),
        (
            "CACert".to_string(),
            Value::String(credentials.ca_cert.clone()),
        ),
        (
            "ServiceAccountJWT".to_string(),
            Value::String(credentials.jwt.to_string()),
        ),
    ]);
    if let NamespaceMode::Mirrored { prefix } = mode {
        config.insert("MapNamespaces".to_string(), Value::Bool(true));
        config.insert(
            "ConsulNamespacePrefix".to_string(),
            Value::String(prefix.clone()),
        );
    }

    AclAuthMethod {
        name: name.to_string(),
        method_type: AUTH_METHOD_TYPE.to_string(),
        description: AUTH_METHOD_DESCRIPTION.to_string(),
        config,
        namespace: mode.acl_namespace().map(str::to_string),
    }
}

fn effective_namespace(namespace: Option<&str>) -> &str {
    match namespace {
        Some(ns) if !ns.is_empty() => ns,
        _ => DEFAULT_CONSUL_NAMESPACE,
    }
}

/// Decide how to converge `observed` towards `desired`
///
/// A missing namespace counts as `default` on both sides.
pub fn plan_auth_method(desired: &AclAuthMethod, observed: Option<&AclAuthMethod>) -> SyncPlan {
    let Some(observed) = observed else {
        return SyncPlan::Create;
    };

    let observed_ns = effective_namespace(observed.namespace.as_deref());
    if observed_ns != effective_namespace(desired.namespace.as_deref()) {
        return SyncPlan::Move {
            from_namespace: observed_ns.to_string(),
        };
    }

    if observed.method_type == desired.method_type
        && observed.description == desired.description
        && observed.config == desired.config
    {
        SyncPlan::NoOp
    } else {
        SyncPlan::Update {
            id: observed.name.clone(),
        }
    }
}

/// Upsert the auth method, returning the plan that was executed
pub async fn sync_auth_method(
    acl: &dyn AclApi,
    desired: &AclAuthMethod,
) -> Result<SyncPlan, ReconcilerError> {
    let span = info_span!("reconcile.auth_method", auth_method.name = %desired.name);
    async move {
        let object = format!("auth method {}", desired.name);
        let target_ns = desired.namespace.as_deref();

        let listed = acl
            .list_auth_methods(Some(WILDCARD_NAMESPACE))
            .await
            .map_err(|e| ReconcilerError::api(STEP, &object, Some(WILDCARD_NAMESPACE), e))?;

        let observed = match listed.iter().find(|m| m.name == desired.name) {
            Some(entry) => {
                let ns = entry.namespace.as_deref();
                acl.read_auth_method(&entry.name, ns)
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, ns, e))?
                    .map(|mut method| {
                        // Some servers omit the namespace on reads; the list entry has it
                        if method.namespace.is_none() {
                            method.namespace = entry.namespace.clone();
                        }
                        method
                    })
            }
            None => None,
        };

        let plan = plan_auth_method(desired, observed.as_ref());
        match &plan {
            SyncPlan::Create => {
                acl.create_auth_method(desired)
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, target_ns, e))?;
                info!(
                    "Created auth method {} in namespace {}",
                    desired.name,
                    effective_namespace(target_ns)
                );
            }
            SyncPlan::Update { .. } => {
                acl.update_auth_method(desired)
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, target_ns, e))?;
                info!("Updated auth method {}", desired.name);
            }
            SyncPlan::Move { from_namespace } => {
                // Deleting the method also deletes its binding rules
                acl.delete_auth_method(&desired.name, Some(from_namespace.as_str()))
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, Some(from_namespace.as_str()), e))?;
                acl.create_auth_method(desired)
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, target_ns, e))?;
                info!(
                    "Moved auth method {} from namespace {} to {}",
                    desired.name,
                    from_namespace,
                    effective_namespace(target_ns)
                );
            }
            SyncPlan::NoOp => debug!("Auth method {} is up to date", desired.name),
        }
        Ok(plan)
    }
    .instrument(span)
    .await
}

/// Create Consul namespace `name` if it does not exist yet
///
/// New namespaces get the cross-namespace policy as their default policy. Returns `true`
/// when the namespace was created.
pub async fn ensure_consul_namespace(acl: &dyn AclApi, name: &str) -> Result<bool, ReconcilerError> {
    let object = format!("namespace {name}");
    let existing = acl
        .read_namespace(name)
        .await
        .map_err(|e| ReconcilerError::api(STEP, &object, Some(name), e))?;
    if existing.is_some() {
        debug!("Consul namespace {} exists", name);
        return Ok(false);
    }

    let namespace = ConsulNamespace {
        name: name.to_string(),
        description: "Auto-generated by server-acl-init".to_string(),
        acls: Some(NamespaceAclConfig {
            policy_defaults: vec![AclTokenPolicyLink::named(CROSS_NAMESPACE_POLICY_NAME)],
        }),
        meta: BTreeMap::from([(
            NAMESPACE_META_EXTERNAL_SOURCE.to_string(),
            "kubernetes".to_string(),
        )]),
    };
    acl.create_namespace(&namespace)
        .await
        .map_err(|e| ReconcilerError::api(STEP, &object, Some(name), e))?;
    info!("Created Consul namespace {}", name);
    Ok(true)
}
