//! # Reconciler Types
//!
//! Error, plan and result types shared by the reconcile phases.

use crate::controller::reconciler::status::ReconcilePhase;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

/// Failure of a reconcile run
///
/// Every variant names the phase it happened in so the operator can tell where the run stopped.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("timed out after {timeout:?} waiting for Consul servers: {ready}/{expected} ready")]
    ReadinessTimeout {
        ready: usize,
        expected: usize,
        timeout: Duration,
    },

    #[error("ACLs are already bootstrapped but Secret {secret} holds no bootstrap token")]
    CredentialConflict { secret: String },

    #[error(
        "{step}: Consul API call failed for {object} (namespace: {})",
        .namespace.as_deref().unwrap_or("<none>")
    )]
    Api {
        step: ReconcilePhase,
        object: String,
        namespace: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("{step}: Kubernetes API call failed for {object}")]
    Kubernetes {
        step: ReconcilePhase,
        object: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{step}: {message}")]
    InvariantViolation {
        step: ReconcilePhase,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ReconcilerError {
    pub(crate) fn api(
        step: ReconcilePhase,
        object: impl Into<String>,
        namespace: Option<&str>,
        source: anyhow::Error,
    ) -> Self {
        ReconcilerError::Api {
            step,
            object: object.into(),
            namespace: namespace.map(str::to_string),
            source,
        }
    }

    pub(crate) fn kubernetes(
        step: ReconcilePhase,
        object: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        ReconcilerError::Kubernetes {
            step,
            object: object.into(),
            source,
        }
    }

    pub(crate) fn invariant(step: ReconcilePhase, message: impl Into<String>) -> Self {
        ReconcilerError::InvariantViolation {
            step,
            message: message.into(),
        }
    }

    /// Phase the error was raised in, if it belongs to one
    pub fn step(&self) -> Option<ReconcilePhase> {
        match self {
            ReconcilerError::ReadinessTimeout { .. } => Some(ReconcilePhase::WaitingForServers),
            ReconcilerError::CredentialConflict { .. } => {
                Some(ReconcilePhase::AcquiringCredential)
            }
            ReconcilerError::Api { step, .. }
            | ReconcilerError::Kubernetes { step, .. }
            | ReconcilerError::InvariantViolation { step, .. } => Some(*step),
            ReconcilerError::InvalidConfig(_) => None,
        }
    }
}

/// What a synchronizer has to do to converge one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPlan {
    Create,
    /// Update in place, keeping the object's identity
    Update { id: String },
    /// Delete from `from_namespace`, then create in the desired namespace
    Move { from_namespace: String },
    NoOp,
}

impl SyncPlan {
    pub fn is_write(&self) -> bool {
        !matches!(self, SyncPlan::NoOp)
    }
}

/// Root ACL credential held for the rest of the run
pub struct Credential {
    pub token: Zeroizing<String>,
    /// Minted by this run rather than read back from the Secret
    pub minted: bool,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("minted", &self.minted)
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Addresses of the ready servers, sorted by pod name
    pub servers: Vec<String>,
    /// ACLs were bootstrapped by this run
    pub fresh_bootstrap: bool,
    /// Phases entered, in order
    pub phases: Vec<ReconcilePhase>,
}
