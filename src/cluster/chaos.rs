//! Chaos injector - kills a random active node

use rand::seq::IndexedRandom;

use super::controller::ClusterController;

/// Message returned when there is nothing to kill
pub const NO_ACTIVE_NODES: &str = "No active nodes";

/// Fail a uniformly random active node and fail it over.
///
/// Returns a human-readable outcome; an empty cluster is a no-op.
pub async fn inject_fault(controller: &ClusterController) -> String {
    let victim = controller
        .state()
        .fail_one(
            |active| active.choose(&mut rand::rng()).cloned(),
            |node_id| format!("Chaos Monkey killed node {}", node_id),
        )
        .await;

    match victim {
        Some(node_id) => {
            controller.fail_over(&node_id).await;
            format!("Killed node {}", node_id)
        }
        None => NO_ACTIVE_NODES.to_string(),
    }
}
