//! # Binding Rule Synchronizer
//!
//! Each auth method carries exactly one binding rule. More than one is treated as corruption
//! and stops the run rather than guessing which rule to keep.

use crate::constants::{BINDING_RULE_BIND_NAME, BINDING_RULE_BIND_TYPE, BINDING_RULE_DESCRIPTION};
use crate::controller::namespace::NamespaceMode;
use crate::controller::reconciler::status::ReconcilePhase;
use crate::controller::reconciler::types::{ReconcilerError, SyncPlan};
use crate::provider::{AclApi, AclBindingRule};
use tracing::{debug, info, info_span, Instrument};

const STEP: ReconcilePhase = ReconcilePhase::SyncingBindingRule;

pub fn desired_binding_rule(auth_method: &str, selector: &str, mode: &NamespaceMode) -> AclBindingRule {
    AclBindingRule {
        id: String::new(),
        description: BINDING_RULE_DESCRIPTION.to_string(),
        auth_method: auth_method.to_string(),
        selector: selector.to_string(),
        bind_type: BINDING_RULE_BIND_TYPE.to_string(),
        bind_name: BINDING_RULE_BIND_NAME.to_string(),
        namespace: mode.acl_namespace().map(str::to_string),
    }
}

/// Decide how to converge the rules `observed` for the auth method towards `desired`
///
/// # Errors
/// Returns a message when more than one rule exists
pub fn plan_binding_rule(
    desired: &AclBindingRule,
    observed: &[AclBindingRule],
) -> Result<SyncPlan, String> {
    match observed {
        [] => Ok(SyncPlan::Create),
        [existing] => {
            if existing.selector == desired.selector
                && existing.description == desired.description
                && existing.bind_type == desired.bind_type
                && existing.bind_name == desired.bind_name
            {
                Ok(SyncPlan::NoOp)
            } else {
                Ok(SyncPlan::Update {
                    id: existing.id.clone(),
                })
            }
        }
        many => Err(format!(
            "auth method {} has {} binding rules, expected at most one",
            desired.auth_method,
            many.len()
        )),
    }
}

/// Upsert the binding rule, returning the plan that was executed
pub async fn sync_binding_rule(
    acl: &dyn AclApi,
    desired: &AclBindingRule,
) -> Result<SyncPlan, ReconcilerError> {
    let span = info_span!("reconcile.binding_rule", auth_method.name = %desired.auth_method);
    async move {
        let object = format!("binding rule for {}", desired.auth_method);
        let ns = desired.namespace.as_deref();

        let observed = acl
            .list_binding_rules(&desired.auth_method, ns)
            .await
            .map_err(|e| ReconcilerError::api(STEP, &object, ns, e))?;

        let plan = plan_binding_rule(desired, &observed)
            .map_err(|message| ReconcilerError::invariant(STEP, message))?;

        match &plan {
            SyncPlan::Create => {
                acl.create_binding_rule(desired)
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, ns, e))?;
                info!("Created binding rule for {}", desired.auth_method);
            }
            SyncPlan::Update { id } => {
                let update = AclBindingRule {
                    id: id.clone(),
                    ..desired.clone()
                };
                acl.update_binding_rule(id, &update)
                    .await
                    .map_err(|e| ReconcilerError::api(STEP, &object, ns, e))?;
                info!("Updated binding rule {}", id);
            }
            SyncPlan::NoOp => debug!("Binding rule for {} is up to date", desired.auth_method),
            SyncPlan::Move { .. } => {
                return Err(ReconcilerError::invariant(
                    STEP,
                    "binding rules move together with their auth method",
                ))
            }
        }
        Ok(plan)
    }
    .instrument(span)
    .await
}
