//! # Reconcile Phases
//!
//! The driver walks these phases in order. `Failed` absorbs an error from any phase.

/// Phase of one reconcile run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcilePhase {
    Idle,
    WaitingForServers,
    AcquiringCredential,
    SyncingPolicies,
    SyncingAuthMethod,
    SyncingBindingRule,
    Done,
    Failed,
}

impl ReconcilePhase {
    /// Phase that follows a successful `self`
    ///
    /// Auth method and binding rule phases are skipped when the inject auth method is off.
    /// `Done` and `Failed` are terminal.
    pub fn next(self, inject_auth_method: bool) -> ReconcilePhase {
        match self {
            ReconcilePhase::Idle => ReconcilePhase::WaitingForServers,
            ReconcilePhase::WaitingForServers => ReconcilePhase::AcquiringCredential,
            ReconcilePhase::AcquiringCredential => ReconcilePhase::SyncingPolicies,
            ReconcilePhase::SyncingPolicies if inject_auth_method => {
                ReconcilePhase::SyncingAuthMethod
            }
            ReconcilePhase::SyncingPolicies => ReconcilePhase::Done,
            ReconcilePhase::SyncingAuthMethod => ReconcilePhase::SyncingBindingRule,
            ReconcilePhase::SyncingBindingRule => ReconcilePhase::Done,
            ReconcilePhase::Done => ReconcilePhase::Done,
            ReconcilePhase::Failed => ReconcilePhase::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReconcilePhase::Done | ReconcilePhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReconcilePhase::Idle => "Idle",
            ReconcilePhase::WaitingForServers => "WaitingForServers",
            ReconcilePhase::AcquiringCredential => "AcquiringCredential",
            ReconcilePhase::SyncingPolicies => "SyncingPolicies",
            ReconcilePhase::SyncingAuthMethod => "SyncingAuthMethod",
            ReconcilePhase::SyncingBindingRule => "SyncingBindingRule",
            ReconcilePhase::Done => "Done",
            ReconcilePhase::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
