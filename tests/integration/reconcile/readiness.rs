//! Server readiness gate

use crate::common::*;
use server_acl_init::{ReconcilePhase, ReconcilerError};
use std::time::Duration;

#[tokio::test]
async fn test_timeout_before_any_write() {
    let kube = FakeKube::with_servers(1);
    kube.add_pod("release-consul-server-1", false, Some("10.0.0.2"));
    kube.add_pod("release-consul-server-2", true, None);
    let consul = FakeConsul::new();
    let mut config = base_config();
    config.expected_replicas = 3;
    config.timeout = Duration::from_millis(50);

    let err = reconciler(config, &kube, &consul).run().await.unwrap_err();

    match &err {
        ReconcilerError::ReadinessTimeout { ready, expected, .. } => {
            assert_eq!(*ready, 1);
            assert_eq!(*expected, 3);
        }
        other => panic!("expected ReadinessTimeout, got {other:?}"),
    }
    assert_eq!(err.step(), Some(ReconcilePhase::WaitingForServers));
    assert_eq!(consul.writes(), 0);
    assert_eq!(kube.secret_writes(), 0);
    assert!(!consul.state.lock().unwrap().bootstrapped);
}

#[tokio::test]
async fn test_list_errors_are_retried() {
    let kube = FakeKube::with_servers(1);
    kube.state.lock().unwrap().list_errors = 2;
    let consul = FakeConsul::new();

    let report = reconciler(base_config(), &kube, &consul).run().await.unwrap();

    assert_eq!(report.servers, vec!["10.0.0.1"]);
    assert_eq!(kube.state.lock().unwrap().pod_lists, 3);
}

#[tokio::test]
async fn test_unready_pods_are_not_used() {
    let kube = FakeKube::new();
    kube.add_service_account(
        "release-consul-connect-injector-authmethod-svc-account",
        "sa-jwt",
        "ca",
    );
    kube.add_pod("release-consul-server-0", false, Some("10.0.0.1"));
    kube.add_pod("release-consul-server-1", true, Some("10.0.0.2"));
    let consul = FakeConsul::new();

    let report = reconciler(base_config(), &kube, &consul).run().await.unwrap();

    assert_eq!(report.servers, vec!["10.0.0.2"]);
    assert!(consul.agent_tokens().contains_key("10.0.0.2"));
    assert_eq!(
        report.phases.last().copied(),
        Some(ReconcilePhase::Done)
    );
}

#[tokio::test]
async fn test_unbounded_timeout_with_ready_servers() {
    let kube = FakeKube::with_servers(1);
    let consul = FakeConsul::new();
    let mut config = base_config();
    config.timeout = Duration::MAX;

    let report = reconciler(config, &kube, &consul).run().await.unwrap();

    assert_eq!(report.servers, vec!["10.0.0.1"]);
}
