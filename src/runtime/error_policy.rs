//! # Error Policy
//!
//! Maps a failed run to a process exit code and prints diagnostics for the operator.
//! There are no retries here: the Job's restart policy re-runs the whole reconcile.

use crate::controller::reconciler::ReconcilerError;
use tracing::error;

/// Exit code for a successful run
pub const EXIT_OK: i32 = 0;
/// Generic failure (Consul or Kubernetes call failed)
pub const EXIT_FAILURE: i32 = 1;
/// Flags could not be decoded or validated
pub const EXIT_INVALID_CONFIG: i32 = 2;

/// Exit code for `error`
pub fn exit_code(error: &ReconcilerError) -> i32 {
    match error {
        ReconcilerError::InvalidConfig(_) => EXIT_INVALID_CONFIG,
        _ => EXIT_FAILURE,
    }
}

/// Log the failure with hints on where to look, then return the exit code
pub fn handle_run_error(err: &ReconcilerError) -> i32 {
    let step = err
        .step()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "startup".to_string());
    error!(step = %step, "❌ server-acl-init failed: {}", err);
    if let Some(source) = std::error::Error::source(err) {
        error!("   caused by: {}", source);
    }

    error!("🔍 SRE Diagnostics:");
    match err {
        ReconcilerError::ReadinessTimeout { ready, expected, .. } => {
            error!("   Only {}/{} Consul server pods became Ready with an IP.", ready, expected);
            error!("   1. Check the server pods and their readiness probes:");
            error!("      kubectl get pods -l <server-label-selector> -o wide");
            error!("   2. Check --expected-replicas matches the server StatefulSet replicas");
            error!("   3. Raise --timeout if servers are slow to elect a leader");
        }
        ReconcilerError::CredentialConflict { secret } => {
            error!("   Consul ACLs were bootstrapped, but Secret {} does not hold the token.", secret);
            error!("   1. Restore the bootstrap token into the Secret under key 'token', or");
            error!("   2. Reset the ACL bootstrap on the servers:");
            error!("      https://developer.hashicorp.com/consul/tutorials/security/access-control-troubleshoot#reset-the-acl-system");
        }
        ReconcilerError::Api { object, namespace, .. } => {
            error!(
                "   Consul rejected or failed the request for {} (namespace {}).",
                object,
                namespace.as_deref().unwrap_or("<none>")
            );
            error!("   1. Check the Consul server logs for ACL errors");
            error!("   2. Check --enable-namespaces is only set against Consul Enterprise");
            error!("   3. Verify the bootstrap token in the Secret is still valid");
        }
        ReconcilerError::Kubernetes { object, .. } => {
            error!("   Kubernetes API call failed for {}.", object);
            error!("   1. Verify the job's ServiceAccount may get/create Secrets and list Pods:");
            error!("      kubectl auth can-i create secrets --as=system:serviceaccount:<namespace>:<sa>");
            error!("   2. Verify the auth method service account and its token Secret exist");
        }
        ReconcilerError::InvariantViolation { message, .. } => {
            error!("   Unexpected state: {}", message);
            error!("   Inspect and clean up the named objects by hand, then re-run.");
        }
        ReconcilerError::InvalidConfig(message) => {
            error!("   Fix the flags and re-run: {}", message);
        }
    }

    exit_code(err)
}
