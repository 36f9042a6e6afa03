//! Reconcile scenarios
//!
//! - `bootstrap`: root token acquisition and its races
//! - `namespaces`: auth method and binding rule placement across namespace modes
//! - `policies`: policy rendering and updates between runs
//! - `tokens`: component, agent and anonymous tokens
//! - `readiness`: the server readiness gate

mod policies;
mod readiness;
