//! # Namespace Resolution
//!
//! Maps Kubernetes namespaces onto Consul namespaces. The three modes are mutually exclusive
//! and are recomputed from flags on every run; nothing from a previous run is merged in.

use crate::constants::DEFAULT_CONSUL_NAMESPACE;

/// Raw namespace flags for one component (connect-inject or catalog-sync)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub enabled: bool,
    pub mirroring: bool,
    pub mirroring_prefix: String,
    pub destination_namespace: String,
}

/// Resolved namespace mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceMode {
    /// Namespaces unsupported or turned off; objects carry no namespace
    Disabled,
    /// Every Kubernetes namespace maps to this one Consul namespace
    SingleDestination(String),
    /// Each Kubernetes namespace maps to `<prefix><k8s namespace>`
    Mirrored { prefix: String },
}

impl NamespaceConfig {
    /// Resolve the flags into exactly one mode
    ///
    /// Mirroring wins over a destination namespace. An empty destination means `default`.
    pub fn resolve(&self) -> NamespaceMode {
        if !self.enabled {
            return NamespaceMode::Disabled;
        }
        if self.mirroring {
            return NamespaceMode::Mirrored {
                prefix: self.mirroring_prefix.clone(),
            };
        }
        let destination = self.destination_namespace.trim();
        if destination.is_empty() {
            NamespaceMode::SingleDestination(DEFAULT_CONSUL_NAMESPACE.to_string())
        } else {
            NamespaceMode::SingleDestination(destination.to_string())
        }
    }
}

impl NamespaceMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, NamespaceMode::Disabled)
    }

    pub fn is_mirrored(&self) -> bool {
        matches!(self, NamespaceMode::Mirrored { .. })
    }

    /// Consul namespace that holds the auth method and its binding rule
    ///
    /// Mirrored auth methods must live in `default` so they can map into any namespace.
    pub fn acl_namespace(&self) -> Option<&str> {
        match self {
            NamespaceMode::Disabled => None,
            NamespaceMode::SingleDestination(ns) => Some(ns.as_str()),
            NamespaceMode::Mirrored { .. } => Some(DEFAULT_CONSUL_NAMESPACE),
        }
    }
}

impl std::fmt::Display for NamespaceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceMode::Disabled => write!(f, "disabled"),
            NamespaceMode::SingleDestination(ns) => write!(f, "single destination {ns:?}"),
            NamespaceMode::Mirrored { prefix } => write!(f, "mirrored with prefix {prefix:?}"),
        }
    }
}
