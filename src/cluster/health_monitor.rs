//! Health monitor and heartbeat simulator sweeps
//!
//! A health sweep first detects every stale node (marking them failed under
//! one lock), then remediates them one by one with the lock released: alert
//! subscribers, then fail the node over.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::controller::ClusterController;
use super::publisher::ClusterMessage;

/// One health sweep; returns the ids of the nodes that failed
pub async fn run_health_sweep(controller: &ClusterController, now: DateTime<Utc>) -> Vec<String> {
    let threshold = controller.config().heartbeat_threshold_secs;
    let failed = controller.state().fail_stale(now, threshold).await;

    for node_id in &failed {
        controller.hub().publish(ClusterMessage::node_failed(node_id));
        if controller.fail_over(node_id).await.is_none() {
            debug!("Node {} was removed before failover", node_id);
        }
    }

    if !failed.is_empty() {
        controller.publish_state().await;
    }
    failed
}

/// One heartbeat simulator sweep; returns how many nodes were refreshed
pub async fn run_simulated_heartbeats(controller: &ClusterController, now: DateTime<Utc>) -> usize {
    let refreshed = controller.state().refresh_simulated_heartbeats(now).await;
    debug!("Simulated heartbeats for {} nodes", refreshed);
    refreshed
}
