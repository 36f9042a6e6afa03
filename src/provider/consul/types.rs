//! # Consul ACL Types
//!
//! JSON payloads of the Consul ACL HTTP API. Field names follow Consul's PascalCase schema
//! as documented at https://developer.hashicorp.com/consul/api-docs/acl

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A full ACL policy, as returned by `GET /v1/acl/policy/:id`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AclPolicy {
    /// Assigned by Consul on create
    #[serde(rename = "ID", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Policy stub returned by `GET /v1/acl/policies` (no rules)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AclPolicyListEntry {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// An ACL auth method
///
/// `config` is kept as a map so that keys which do not apply to the current namespace mode
/// are absent rather than serialized as `false` or `""`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AclAuthMethod {
    pub name: String,
    #[serde(rename = "Type")]
    pub method_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Auth method stub returned by `GET /v1/acl/auth-methods`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AclAuthMethodListEntry {
    pub name: String,
    #[serde(rename = "Type", default)]
    pub method_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// An ACL binding rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AclBindingRule {
    #[serde(rename = "ID", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub auth_method: String,
    #[serde(default)]
    pub selector: String,
    pub bind_type: String,
    pub bind_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference from a token or namespace to a policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AclTokenPolicyLink {
    #[serde(rename = "ID", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl AclTokenPolicyLink {
    /// Link a policy by name
    pub fn named(name: &str) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
        }
    }
}

/// An ACL token
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AclToken {
    #[serde(rename = "AccessorID", default, skip_serializing_if = "String::is_empty")]
    pub accessor_id: String,
    #[serde(rename = "SecretID", default, skip_serializing_if = "String::is_empty")]
    pub secret_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policies: Vec<AclTokenPolicyLink>,
    #[serde(default)]
    pub local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl AclToken {
    /// Whether the token links the policy named `policy_name`
    pub fn has_policy(&self, policy_name: &str) -> bool {
        self.policies.iter().any(|p| p.name == policy_name)
    }
}

impl std::fmt::Debug for AclToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // SecretID is a credential
        f.debug_struct("AclToken")
            .field("accessor_id", &self.accessor_id)
            .field("description", &self.description)
            .field("policies", &self.policies)
            .field("local", &self.local)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// ACL defaults applied to every token in a namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamespaceAclConfig {
    #[serde(default)]
    pub policy_defaults: Vec<AclTokenPolicyLink>,
}

/// A Consul Enterprise namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsulNamespace {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "ACLs", default, skip_serializing_if = "Option::is_none")]
    pub acls: Option<NamespaceAclConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl ConsulNamespace {
    /// Whether `policy_name` is one of the namespace's default policies
    pub fn has_default_policy(&self, policy_name: &str) -> bool {
        self.acls
            .as_ref()
            .is_some_and(|acls| acls.policy_defaults.iter().any(|p| p.name == policy_name))
    }
}
