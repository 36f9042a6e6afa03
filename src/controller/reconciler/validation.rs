//! # Validation
//!
//! Validates the run configuration and duration strings before anything is contacted.

use crate::config::AclInitConfig;
use crate::constants::MAX_TIMEOUT_SECS;
use anyhow::Result;
use regex::Regex;
use std::time::Duration;

/// Parse Kubernetes duration string into std::time::Duration
/// Supports formats: "30s", "1m", "5m", "1h", "2h", "1d"
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let duration_regex = Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    let lower = duration_trimmed.to_lowercase();
    let captures = duration_regex.captures(&lower).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid duration format '{}'. Expected format: <number><unit> (e.g., '30s', '10m', '1h')",
            duration_trimmed
        )
    })?;

    let number: u64 = captures["number"].parse().map_err(|e| {
        anyhow::anyhow!("Invalid duration number in '{}': {}", duration_trimmed, e)
    })?;

    if number == 0 {
        return Err(anyhow::anyhow!(
            "Duration must be greater than 0, got '{}'",
            duration_trimmed
        ));
    }

    let multiplier = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        unit => {
            return Err(anyhow::anyhow!(
                "Invalid unit '{}' in duration '{}'. Expected: s, m, h, or d",
                unit,
                duration_trimmed
            ));
        }
    };

    number
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("Duration '{}' is too large", duration_trimmed))
}

/// Check a decoded configuration
///
/// Returns Ok(()) if valid, Err with a message naming the offending flag otherwise.
pub fn validate_config(config: &AclInitConfig) -> Result<()> {
    validate_kubernetes_name(&config.resource_prefix, "resource-prefix")?;
    validate_kubernetes_namespace(&config.k8s_namespace, "k8s-namespace")?;

    if config.server_label_selector.trim().is_empty() {
        return Err(anyhow::anyhow!("server-label-selector must be set"));
    }
    if config.expected_replicas == 0 {
        return Err(anyhow::anyhow!("expected-replicas must be at least 1"));
    }
    if config.timeout.is_zero() {
        return Err(anyhow::anyhow!("timeout must be greater than 0"));
    }
    if config.timeout > Duration::from_secs(MAX_TIMEOUT_SECS) {
        return Err(anyhow::anyhow!(
            "timeout {:?} exceeds the maximum of {}d",
            config.timeout,
            MAX_TIMEOUT_SECS / 86_400
        ));
    }

    let inject = &config.inject_namespaces;
    if !inject.destination_namespace.is_empty() {
        validate_consul_namespace(
            &inject.destination_namespace,
            "consul-inject-destination-namespace",
        )?;
    }
    if !inject.mirroring_prefix.is_empty() {
        validate_consul_namespace(
            &inject.mirroring_prefix,
            "inject-k8s-namespace-mirroring-prefix",
        )?;
    }

    let sync = &config.sync_namespaces;
    if !sync.destination_namespace.is_empty() {
        validate_consul_namespace(
            &sync.destination_namespace,
            "consul-sync-destination-namespace",
        )?;
    }
    if !sync.mirroring_prefix.is_empty() {
        validate_consul_namespace(&sync.mirroring_prefix, "sync-k8s-namespace-mirroring-prefix")?;
    }

    if let Some(host) = &config.inject_auth_method_host {
        if !(host.starts_with("https://") || host.starts_with("http://")) {
            return Err(anyhow::anyhow!(
                "inject-auth-method-host '{host}' must be an http:// or https:// URL"
            ));
        }
    }

    if config.sync_consul_node_name.trim().is_empty() {
        return Err(anyhow::anyhow!("sync-consul-node-name cannot be empty"));
    }

    Ok(())
}

/// Validate Kubernetes resource name (RFC 1123 subdomain)
/// Length: 1-253 characters
fn validate_kubernetes_name(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }

    if name.len() > 253 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 253 characters (got {})",
            field_name,
            name,
            name.len()
        ));
    }

    let name_regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    if !name_regex.is_match(name) {
        return Err(anyhow::anyhow!(
            "{field_name} '{name}' must be a valid Kubernetes name (lowercase alphanumeric, hyphens, dots; cannot start/end with hyphen or dot)"
        ));
    }

    Ok(())
}

/// Validate Kubernetes namespace (RFC 1123 label)
/// Length: 1-63 characters
fn validate_kubernetes_namespace(namespace: &str, field_name: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }

    if namespace.len() > 63 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 63 characters (got {})",
            field_name,
            namespace,
            namespace.len()
        ));
    }

    let namespace_regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    if !namespace_regex.is_match(namespace) {
        return Err(anyhow::anyhow!(
            "{field_name} '{namespace}' must be a valid Kubernetes namespace (lowercase alphanumeric, hyphens; cannot start/end with hyphen)"
        ));
    }

    Ok(())
}

/// Validate Consul namespace name or prefix
/// Format: alphanumeric, hyphens, underscores
/// Length: 1-64 characters
fn validate_consul_namespace(name: &str, field_name: &str) -> Result<()> {
    if name.len() > 64 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 64 characters (got {})",
            field_name,
            name,
            name.len()
        ));
    }

    let consul_regex = Regex::new(r"^[a-zA-Z0-9_-]+$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    if !consul_regex.is_match(name) {
        return Err(anyhow::anyhow!(
            "{field_name} '{name}' must contain only alphanumeric characters, hyphens, and underscores"
        ));
    }

    Ok(())
}
