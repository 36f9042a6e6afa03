//! # Cluster Readiness Gate
//!
//! Nothing is written to Consul until enough server pods are Ready and addressable.

use crate::constants::MAX_TIMEOUT_SECS;
use crate::controller::reconciler::types::ReconcilerError;
use crate::provider::kubernetes::{Orchestrator, PodStatus};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Poll until at least `expected` pods matching `selector` are Ready with an IP
///
/// Returns the addresses of the serving pods, ordered by pod name. List errors are logged
/// and polling continues until `timeout` elapses.
pub async fn wait_for_servers(
    orchestrator: &dyn Orchestrator,
    selector: &str,
    expected: usize,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<String>, ReconcilerError> {
    let start = Instant::now();
    let deadline = start
        .checked_add(timeout)
        .unwrap_or_else(|| start + Duration::from_secs(MAX_TIMEOUT_SECS));
    let mut ready = 0;

    info!(
        "Waiting for {} Consul server pod(s) matching '{}' (timeout {:?})",
        expected, selector, timeout
    );

    loop {
        match orchestrator.list_pods(selector).await {
            Ok(pods) => {
                let mut serving: Vec<PodStatus> =
                    pods.into_iter().filter(PodStatus::is_serving).collect();
                serving.sort_by(|a, b| a.name.cmp(&b.name));
                ready = serving.len();

                if ready >= expected {
                    info!("{}/{} Consul servers ready", ready, expected);
                    return Ok(serving.into_iter().filter_map(|pod| pod.ip).collect());
                }
                debug!("{}/{} Consul servers ready", ready, expected);
            }
            Err(e) => {
                warn!("Failed to list Consul server pods: {:#}", e);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ReconcilerError::ReadinessTimeout {
                ready,
                expected,
                timeout,
            });
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}
