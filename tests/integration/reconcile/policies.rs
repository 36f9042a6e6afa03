//! Policy rendering and updates between runs

use crate::common::*;
use server_acl_init::config::{AclInitConfig, CapabilityFlags};

fn every_capability() -> CapabilityFlags {
    CapabilityFlags {
        create_client_token: true,
        allow_dns: true,
        create_sync_token: true,
        create_inject_auth_method: true,
        create_inject_namespace_token: true,
        create_mesh_gateway_token: true,
        create_snapshot_agent_token: true,
        create_enterprise_license_token: true,
        create_acl_replication_token: true,
    }
}

const POLICIES: [&str; 9] = [
    "agent-token",
    "client-token",
    "dns-policy",
    "catalog-sync-token",
    "connect-inject-token",
    "mesh-gateway-token",
    "client-snapshot-agent-token",
    "enterprise-license-token",
    "acl-replication-token",
];

fn config_for(k8s_namespace: &str, namespaces: bool) -> AclInitConfig {
    let mut config = base_config();
    config.k8s_namespace = k8s_namespace.to_string();
    config.capabilities = every_capability();
    if namespaces {
        enable_namespaces(&mut config);
        config.inject_namespaces.destination_namespace = "dest".to_string();
        config.sync_namespaces.destination_namespace = "dest".to_string();
    }
    config
}

#[tokio::test]
async fn test_policies_gain_namespace_clause_when_enabled() {
    for k8s_namespace in ["default", "other"] {
        let kube = FakeKube::with_servers(1);
        let consul = FakeConsul::new();

        reconciler(config_for(k8s_namespace, false), &kube, &consul)
            .run()
            .await
            .unwrap();

        let mut first_rules = Vec::new();
        for name in POLICIES {
            let rules = consul
                .policy_rules(name)
                .unwrap_or_else(|| panic!("{k8s_namespace}: policy {name} missing"));
            assert!(
                !rules.contains("namespace"),
                "{k8s_namespace}: {name} mentions namespace without namespaces:\n{rules}"
            );
            first_rules.push(rules);
        }
        assert!(consul.policy_rules("cross-namespace-policy").is_none());

        reconciler(config_for(k8s_namespace, true), &kube, &consul)
            .run()
            .await
            .unwrap();

        for (name, before) in POLICIES.iter().zip(&first_rules) {
            let after = consul.policy_rules(name).unwrap();
            match *name {
                "connect-inject-token" => {
                    assert_ne!(&after, before, "{k8s_namespace}: {name}");
                    assert!(after.contains("operator = \"write\""));
                }
                "client-snapshot-agent-token" | "enterprise-license-token" => {
                    assert_eq!(&after, before, "{k8s_namespace}: {name} must not change");
                }
                _ => assert!(
                    after.contains("namespace"),
                    "{k8s_namespace}: {name} lacks a namespace clause:\n{after}"
                ),
            }
        }

        let names = consul.policy_names();
        let unique: std::collections::BTreeSet<_> = names.iter().collect();
        assert_eq!(names.len(), unique.len(), "policies are updated, never duplicated");
    }
}

#[tokio::test]
async fn test_policy_ids_survive_updates() {
    let kube = FakeKube::with_servers(1);
    let consul = FakeConsul::new();
    reconciler(config_for("default", false), &kube, &consul)
        .run()
        .await
        .unwrap();
    let id_before = consul
        .state
        .lock()
        .unwrap()
        .policies
        .iter()
        .find(|p| p.name == "client-token")
        .map(|p| p.id.clone())
        .unwrap();

    reconciler(config_for("default", true), &kube, &consul)
        .run()
        .await
        .unwrap();

    let state = consul.state.lock().unwrap();
    let client = state.policies.iter().find(|p| p.name == "client-token").unwrap();
    assert_eq!(client.id, id_before);
    assert_eq!(client.description, "client-token Token Policy");
}

#[tokio::test]
async fn test_catalog_sync_policy_follows_sync_mapping() {
    let kube = FakeKube::with_servers(1);
    let consul = FakeConsul::new();
    let mut config = base_config();
    config.capabilities.create_sync_token = true;
    enable_namespaces(&mut config);
    config.sync_namespaces.mirroring = true;
    config.sync_namespaces.mirroring_prefix = "k8s-".to_string();
    config.sync_consul_node_name = "sync-node".to_string();

    reconciler(config, &kube, &consul).run().await.unwrap();

    let rules = consul.policy_rules("catalog-sync-token").unwrap();
    assert!(rules.contains("namespace_prefix \"k8s-\""), "{rules}");
    assert!(rules.contains("node \"sync-node\""), "{rules}");
    assert!(rules.contains("operator = \"write\""), "{rules}");
}

#[tokio::test]
async fn test_disabled_capability_policy_is_kept() {
    let kube = FakeKube::with_servers(1);
    let consul = FakeConsul::new();
    let mut config = base_config();
    config.capabilities.create_client_token = true;
    reconciler(config, &kube, &consul).run().await.unwrap();

    reconciler(base_config(), &kube, &consul).run().await.unwrap();

    assert!(consul.policy_rules("client-token").is_some());
}

#[tokio::test]
async fn test_cross_namespace_policy_attached_once() {
    let kube = FakeKube::with_servers(1);
    let consul = FakeConsul::new();
    let config = config_for("default", true);

    reconciler(config.clone(), &kube, &consul).run().await.unwrap();
    reconciler(config, &kube, &consul).run().await.unwrap();

    let default_ns = consul.namespace("default").unwrap();
    let links = default_ns
        .acls
        .map(|acls| acls.policy_defaults)
        .unwrap_or_default();
    assert_eq!(
        links
            .iter()
            .filter(|link| link.name == "cross-namespace-policy")
            .count(),
        1
    );
}
