//! # Reconciler
//!
//! Drives one run through [`ReconcilePhase`]s:
//!
//! 1. wait for the Consul servers
//! 2. read or mint the root ACL token
//! 3. upsert capability policies, tokens and namespace defaults
//! 4. upsert the Kubernetes auth method (when enabled)
//! 5. upsert its binding rule (when enabled)
//!
//! The first failure stops the run. There is no rollback; running again converges.

pub mod auth_method;
pub mod binding_rule;
pub mod bootstrap;
pub mod policies;
pub mod readiness;
pub mod status;
pub mod tokens;
pub mod types;
pub mod validation;

pub use status::ReconcilePhase;
pub use types::{Credential, ReconcileReport, ReconcilerError, SyncPlan};

use crate::config::AclInitConfig;
use crate::constants::DEFAULT_CONSUL_NAMESPACE;
use crate::controller::namespace::NamespaceMode;
use crate::controller::rules::Capability;
use crate::provider::kubernetes::Orchestrator;
use crate::provider::{AclApi, ControlPlaneConnector};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

/// Reconciler context
pub struct Reconciler {
    pub config: AclInitConfig,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub connector: Arc<dyn ControlPlaneConnector>,
}

/// State carried between phases
#[derive(Default)]
struct RunState {
    servers: Vec<String>,
    credential: Option<Credential>,
    acl: Option<Arc<dyn AclApi>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunState {
    fn acl(&self, step: ReconcilePhase) -> Result<Arc<dyn AclApi>, ReconcilerError> {
        self.acl
            .clone()
            .ok_or_else(|| ReconcilerError::invariant(step, "no ACL client before bootstrap"))
    }
}

impl Reconciler {
    pub fn new(
        config: AclInitConfig,
        orchestrator: Arc<dyn Orchestrator>,
        connector: Arc<dyn ControlPlaneConnector>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            connector,
        }
    }

    /// Run every phase to completion
    pub async fn run(&self) -> Result<ReconcileReport, ReconcilerError> {
        let span = info_span!(
            "reconcile.run",
            resource.prefix = %self.config.resource_prefix,
            k8s.namespace = %self.config.k8s_namespace
        );
        async move {
            let inject_auth_method = self.config.capabilities.create_inject_auth_method;
            let mut state = RunState::default();
            let mut phases = Vec::new();
            let mut phase = ReconcilePhase::Idle;

            while !phase.is_terminal() {
                phases.push(phase);
                if let Err(e) = self.execute(phase, &mut state).await {
                    error!("Reconcile failed in phase {}: {}", phase, e);
                    return Err(e);
                }
                phase = phase.next(inject_auth_method);
            }
            phases.push(phase);

            info!("ACL reconciliation complete");
            Ok(ReconcileReport {
                servers: state.servers,
                fresh_bootstrap: state.credential.as_ref().is_some_and(|c| c.minted),
                phases,
            })
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        phase: ReconcilePhase,
        state: &mut RunState,
    ) -> Result<(), ReconcilerError> {
        match phase {
            ReconcilePhase::Idle => Ok(()),
            ReconcilePhase::WaitingForServers => {
                state.servers = readiness::wait_for_servers(
                    self.orchestrator.as_ref(),
                    &self.config.server_label_selector,
                    self.config.expected_replicas,
                    self.config.timeout,
                    self.config.server_poll_interval,
                )
                .await?;
                Ok(())
            }
            ReconcilePhase::AcquiringCredential => self.acquire_credential(state).await,
            ReconcilePhase::SyncingPolicies => self.sync_policies(state).await,
            ReconcilePhase::SyncingAuthMethod => self.sync_auth_method(state).await,
            ReconcilePhase::SyncingBindingRule => self.sync_binding_rule(state).await,
            ReconcilePhase::Done | ReconcilePhase::Failed => Ok(()),
        }
    }

    async fn acquire_credential(&self, state: &mut RunState) -> Result<(), ReconcilerError> {
        let step = ReconcilePhase::AcquiringCredential;
        let address = match &self.config.consul.server_address {
            Some(address) => address.clone(),
            None => state.servers.first().cloned().ok_or_else(|| {
                ReconcilerError::invariant(step, "no ready Consul server address")
            })?,
        };
        let control_plane = self
            .connector
            .connect(&address)
            .map_err(|e| ReconcilerError::api(step, format!("Consul server {address}"), None, e))?;

        let credential = bootstrap::acquire_root_credential(
            self.orchestrator.as_ref(),
            control_plane.as_ref(),
            &self.config.resource_prefix,
        )
        .await?;

        let acl = control_plane.with_token(&credential.token);
        acl.read_self_token()
            .await
            .map_err(|e| ReconcilerError::api(step, "root ACL token", None, e))?;

        state.acl = Some(acl);
        state.credential = Some(credential);
        Ok(())
    }

    async fn sync_policies(&self, state: &mut RunState) -> Result<(), ReconcilerError> {
        let step = ReconcilePhase::SyncingPolicies;
        let acl = state.acl(step)?;
        let capabilities = self.config.enabled_capabilities();
        let ctx = self.config.rule_context();

        policies::sync_policies(acl.as_ref(), &capabilities, &ctx).await?;

        if self.config.namespaces_enabled() {
            policies::attach_cross_namespace_policy(acl.as_ref()).await?;
        }

        tokens::install_server_agent_tokens(
            acl.as_ref(),
            self.orchestrator.as_ref(),
            &self.config.resource_prefix,
            &state.servers,
        )
        .await?;

        for capability in &capabilities {
            tokens::ensure_component_token(
                acl.as_ref(),
                self.orchestrator.as_ref(),
                &self.config.resource_prefix,
                *capability,
            )
            .await?;
        }

        if capabilities.contains(&Capability::Dns) {
            tokens::allow_dns_on_anonymous_token(acl.as_ref()).await?;
        }
        Ok(())
    }

    async fn sync_auth_method(&self, state: &mut RunState) -> Result<(), ReconcilerError> {
        let step = ReconcilePhase::SyncingAuthMethod;
        let acl = state.acl(step)?;
        let mode = self.config.inject_mode();

        if let NamespaceMode::SingleDestination(ns) = &mode {
            if ns != DEFAULT_CONSUL_NAMESPACE {
                auth_method::ensure_consul_namespace(acl.as_ref(), ns).await?;
            }
        }

        let sa_name = auth_method::auth_method_service_account_name(&self.config.resource_prefix);
        let credentials = self
            .orchestrator
            .service_account_credentials(&sa_name)
            .await
            .map_err(|e| ReconcilerError::kubernetes(step, format!("service account {sa_name}"), e))?;
        let host = self
            .config
            .inject_auth_method_host
            .clone()
            .unwrap_or_else(|| self.orchestrator.api_server_host());

        let desired = auth_method::desired_auth_method(
            &auth_method::auth_method_name(&self.config.resource_prefix),
            &mode,
            &host,
            &credentials,
        );
        auth_method::sync_auth_method(acl.as_ref(), &desired).await?;
        Ok(())
    }

    async fn sync_binding_rule(&self, state: &mut RunState) -> Result<(), ReconcilerError> {
        let acl = state.acl(ReconcilePhase::SyncingBindingRule)?;
        let desired = binding_rule::desired_binding_rule(
            &auth_method::auth_method_name(&self.config.resource_prefix),
            &self.config.acl_binding_rule_selector,
            &self.config.inject_mode(),
        );
        binding_rule::sync_binding_rule(acl.as_ref(), &desired).await?;
        Ok(())
    }
}
