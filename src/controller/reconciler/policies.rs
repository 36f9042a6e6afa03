//! # Policy Synchronizer
//!
//! Upserts one ACL policy per enabled capability. Policies are matched by name, updated in
//! place when the rendered rules change and never deleted.

use crate::constants::{CROSS_NAMESPACE_POLICY_NAME, DEFAULT_CONSUL_NAMESPACE};
use crate::controller::reconciler::status::ReconcilePhase;
use crate::controller::reconciler::types::{ReconcilerError, SyncPlan};
use crate::controller::rules::{Capability, RuleContext};
use crate::provider::{AclApi, AclPolicy, AclTokenPolicyLink, NamespaceAclConfig};
use futures::future::try_join_all;
use tracing::{debug, info, info_span, Instrument};

const STEP: ReconcilePhase = ReconcilePhase::SyncingPolicies;

/// Decide how to converge `existing` towards `desired`
///
/// Rules are compared byte for byte; description drift alone does not trigger an update.
pub fn plan_policy(desired: &AclPolicy, existing: Option<&AclPolicy>) -> SyncPlan {
    match existing {
        None => SyncPlan::Create,
        Some(policy) if policy.rules == desired.rules => SyncPlan::NoOp,
        Some(policy) => SyncPlan::Update {
            id: policy.id.clone(),
        },
    }
}

/// Desired policy for `capability`
pub fn desired_policy(capability: Capability, ctx: &RuleContext) -> AclPolicy {
    AclPolicy {
        id: String::new(),
        name: capability.policy_name().to_string(),
        description: capability.description(),
        rules: capability.rules(ctx),
        namespace: None,
    }
}

/// Upsert one policy, returning the plan that was executed
pub async fn sync_policy(acl: &dyn AclApi, desired: &AclPolicy) -> Result<SyncPlan, ReconcilerError> {
    let span = info_span!("reconcile.policy", policy.name = %desired.name);
    async move {
        let object = format!("policy {}", desired.name);
        let ns = desired.namespace.as_deref();

        let listed = acl
            .list_policies(ns)
            .await
            .map_err(|e| ReconcilerError::api(STEP, &object, ns, e))?;

        let existing = match listed.iter().find(|p| p.name == desired.name) {
            Some(entry) => acl
                .read_policy(&entry.id, ns)
                .await
                .map_err(|e| ReconcilerError::api(STEP, &object, ns, e))?,
            None => None,
        };

        let plan = plan_policy(desired, existing.as_ref());
        match &plan {
            SyncPlan::Create => {
                acl.create_policy(desired)
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, ns, e))?;
                info!("Created policy {}", desired.name);
            }
            SyncPlan::Update { id } => {
                let update = AclPolicy {
                    id: id.clone(),
                    ..desired.clone()
                };
                acl.update_policy(id, &update)
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, ns, e))?;
                info!("Updated policy {} ({})", desired.name, id);
            }
            SyncPlan::NoOp => debug!("Policy {} is up to date", desired.name),
            SyncPlan::Move { .. } => {
                return Err(ReconcilerError::invariant(
                    STEP,
                    format!("policy {} cannot change namespace", desired.name),
                ))
            }
        }
        Ok(plan)
    }
    .instrument(span)
    .await
}

/// Upsert the policies of all `capabilities` concurrently
pub async fn sync_policies(
    acl: &dyn AclApi,
    capabilities: &[Capability],
    ctx: &RuleContext,
) -> Result<Vec<SyncPlan>, ReconcilerError> {
    let desired: Vec<AclPolicy> = capabilities
        .iter()
        .map(|capability| desired_policy(*capability, ctx))
        .collect();
    try_join_all(desired.iter().map(|policy| sync_policy(acl, policy))).await
}

/// Make the cross-namespace policy a default policy of the `default` namespace
pub async fn attach_cross_namespace_policy(acl: &dyn AclApi) -> Result<bool, ReconcilerError> {
    let object = format!("namespace {DEFAULT_CONSUL_NAMESPACE}");
    let mut namespace = acl
        .read_namespace(DEFAULT_CONSUL_NAMESPACE)
        .await
        .map_err(|e| ReconcilerError::api(STEP, &object, Some(DEFAULT_CONSUL_NAMESPACE), e))?
        .ok_or_else(|| {
            ReconcilerError::invariant(
                STEP,
                "Consul namespace 'default' not found; namespaces require Consul Enterprise",
            )
        })?;

    if namespace.has_default_policy(CROSS_NAMESPACE_POLICY_NAME) {
        debug!("Namespace default already links {}", CROSS_NAMESPACE_POLICY_NAME);
        return Ok(false);
    }

    namespace
        .acls
        .get_or_insert_with(NamespaceAclConfig::default)
        .policy_defaults
        .push(AclTokenPolicyLink::named(CROSS_NAMESPACE_POLICY_NAME));

    acl.update_namespace(&namespace)
        .await
        .map_err(|e| ReconcilerError::api(STEP, &object, Some(DEFAULT_CONSUL_NAMESPACE), e))?;
    info!(
        "Attached {} to the default namespace's ACL defaults",
        CROSS_NAMESPACE_POLICY_NAME
    );
    Ok(true)
}
