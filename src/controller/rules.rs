//! # ACL Rules
//!
//! Capabilities the bootstrapper can provision and the HCL policy each one renders.
//! Rendering is a pure function of the capability and a [`RuleContext`], so the same
//! flags always yield byte-identical rules and re-runs do not cause policy updates.

use crate::constants::{AGENT_POLICY_NAME, CROSS_NAMESPACE_POLICY_NAME};
use crate::controller::namespace::NamespaceMode;

/// Something that gets its own ACL policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Consul server agents
    Agent,
    /// Consul client agents
    Client,
    /// DNS lookups through the anonymous token
    Dns,
    CatalogSync,
    ConnectInject,
    MeshGateway,
    SnapshotAgent,
    EnterpriseLicense,
    AclReplication,
    /// Attached to every namespace's ACL defaults
    CrossNamespace,
}

/// Inputs that rule rendering depends on
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub namespaces_enabled: bool,
    /// Namespace mapping of catalog sync
    pub sync: NamespaceMode,
    /// Consul node that catalog sync registers services under
    pub sync_consul_node_name: String,
}

impl Capability {
    /// Policy name, unique within the Consul namespace
    pub fn policy_name(self) -> &'static str {
        match self {
            Capability::Agent => AGENT_POLICY_NAME,
            Capability::Client => "client-token",
            Capability::Dns => "dns-policy",
            Capability::CatalogSync => "catalog-sync-token",
            Capability::ConnectInject => "connect-inject-token",
            Capability::MeshGateway => "mesh-gateway-token",
            Capability::SnapshotAgent => "client-snapshot-agent-token",
            Capability::EnterpriseLicense => "enterprise-license-token",
            Capability::AclReplication => "acl-replication-token",
            Capability::CrossNamespace => CROSS_NAMESPACE_POLICY_NAME,
        }
    }

    /// Component part of `<prefix>-<component>-acl-token` for capabilities that get a token Secret
    pub fn token_secret_component(self) -> Option<&'static str> {
        match self {
            Capability::Client => Some("client"),
            Capability::CatalogSync => Some("catalog-sync"),
            Capability::ConnectInject => Some("connect-inject"),
            Capability::MeshGateway => Some("mesh-gateway"),
            Capability::SnapshotAgent => Some("client-snapshot-agent"),
            Capability::EnterpriseLicense => Some("enterprise-license"),
            Capability::AclReplication => Some("acl-replication"),
            Capability::Agent | Capability::Dns | Capability::CrossNamespace => None,
        }
    }

    pub fn description(self) -> String {
        format!("{} Token Policy", self.policy_name())
    }

    /// Render the HCL rules for this capability
    pub fn rules(self, ctx: &RuleContext) -> String {
        let all_namespaces = ctx.namespaces_enabled.then_some("namespace_prefix \"\"");
        match self {
            Capability::Agent | Capability::Client => {
                let mut out = rule("node_prefix", "", &[("policy", "write")]);
                out.push_str(&scoped(
                    all_namespaces,
                    &rule("service_prefix", "", &[("policy", "read")]),
                ));
                out
            }
            Capability::Dns => scoped(
                all_namespaces,
                &[
                    rule("node_prefix", "", &[("policy", "read")]),
                    rule("service_prefix", "", &[("policy", "read")]),
                ]
                .concat(),
            ),
            Capability::CatalogSync => {
                let mut out = operator_write(ctx.namespaces_enabled);
                out.push_str(&rule("node", &ctx.sync_consul_node_name, &[("policy", "write")]));
                let scope = match &ctx.sync {
                    NamespaceMode::Disabled => None,
                    NamespaceMode::SingleDestination(ns) => Some(format!("namespace \"{ns}\"")),
                    NamespaceMode::Mirrored { prefix } => {
                        Some(format!("namespace_prefix \"{prefix}\""))
                    }
                };
                out.push_str(&scoped(
                    scope.as_deref(),
                    &[
                        rule("node_prefix", "", &[("policy", "read")]),
                        rule("service_prefix", "", &[("policy", "write")]),
                    ]
                    .concat(),
                ));
                out
            }
            Capability::ConnectInject => operator_write(ctx.namespaces_enabled),
            Capability::MeshGateway => {
                let mut out = rule("agent_prefix", "", &[("policy", "read")]);
                out.push_str(&scoped(
                    ctx.namespaces_enabled.then_some("namespace \"default\""),
                    &rule("service", "mesh-gateway", &[("policy", "write")]),
                ));
                out.push_str(&scoped(
                    all_namespaces,
                    &[
                        rule("node_prefix", "", &[("policy", "read")]),
                        rule("service_prefix", "", &[("policy", "read")]),
                    ]
                    .concat(),
                ));
                out
            }
            Capability::SnapshotAgent => [
                "acl = \"write\"\n".to_string(),
                rule("key", "consul-snapshot/lock", &[("policy", "write")]),
                rule("session_prefix", "", &[("policy", "write")]),
                rule("service", "consul-snapshot", &[("policy", "write")]),
            ]
            .concat(),
            Capability::EnterpriseLicense => operator_write(true),
            Capability::AclReplication => {
                let mut out = String::from("acl = \"write\"\noperator = \"write\"\n");
                out.push_str(&scoped(
                    all_namespaces,
                    &rule(
                        "service_prefix",
                        "",
                        &[("policy", "read"), ("intentions", "read")],
                    ),
                ));
                out.push_str(&rule("node_prefix", "", &[("policy", "read")]));
                out
            }
            Capability::CrossNamespace => scoped(
                Some("namespace_prefix \"\""),
                &[
                    rule("service_prefix", "", &[("policy", "read")]),
                    rule("node_prefix", "", &[("policy", "read")]),
                ]
                .concat(),
            ),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.policy_name())
    }
}

fn operator_write(enabled: bool) -> String {
    if enabled {
        "operator = \"write\"\n".to_string()
    } else {
        String::new()
    }
}

/// `resource "name" { key = "value" ... }`
fn rule(resource: &str, name: &str, fields: &[(&str, &str)]) -> String {
    let mut out = format!("{resource} \"{name}\" {{\n");
    for (key, value) in fields {
        out.push_str(&format!("  {key} = \"{value}\"\n"));
    }
    out.push_str("}\n");
    out
}

/// Wrap `body` in `header { ... }`, or return it unchanged without a header
fn scoped(header: Option<&str>, body: &str) -> String {
    let Some(header) = header else {
        return body.to_string();
    };
    let mut out = format!("{header} {{\n");
    for line in body.lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("}\n");
    out
}
