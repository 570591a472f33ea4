//! Failover rescheduler
//!
//! Moves the pods of a failed or removed node onto the rest of the cluster.
//! The node is detached first, so its own capacity is never a candidate.
//! Every pod is re-submitted once with first-fit, in its original placement
//! order; a pod that fits nowhere is dropped and never retried.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::node::Node;
use super::placement::SchedulingAlgorithm;
use super::registry::ClusterState;

/// Outcome of rescheduling one node's pods
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleReport {
    /// `(pod_id, new node_id)` pairs, in processing order
    pub rescheduled: Vec<(String, String)>,
    /// Pods that found no eligible node
    pub dropped: Vec<String>,
}

impl RescheduleReport {
    pub fn is_empty(&self) -> bool {
        self.rescheduled.is_empty() && self.dropped.is_empty()
    }
}

/// Detach `node_id` and reschedule its pods.
///
/// Returns the detached node (with its original pod list) and the report, or
/// `None` when the node was already gone.
pub async fn fail_over(state: &ClusterState, node_id: &str) -> Option<(Node, RescheduleReport)> {
    let now = Utc::now();

    state
        .apply(|reg, mirrors| {
            let node = reg.detach(node_id, mirrors)?;
            let mut report = RescheduleReport::default();

            for pod in node.pods.iter().cloned() {
                let pod_id = pod.pod_id.clone();
                match reg.place(pod, SchedulingAlgorithm::FirstFit, now, mirrors) {
                    Some(target) => {
                        reg.log(
                            &format!("Rescheduled pod {} → {}", pod_id, target),
                            now,
                            mirrors,
                        );
                        report.rescheduled.push((pod_id, target));
                    }
                    None => {
                        reg.log(&format!("Failed to reschedule pod {}", pod_id), now, mirrors);
                        report.dropped.push(pod_id);
                    }
                }
            }

            Some((node, report))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::NodeSpec;
    use crate::cluster::pod::Pod;
    use crate::store::{ClusterStore, MemoryStore};
    use std::sync::Arc;

    async fn place(state: &ClusterState, cpu: u32, memory: u32) -> (String, String) {
        let pod = Pod::new(state.next_pod_id(), cpu, memory, "default");
        let pod_id = pod.pod_id.clone();
        let node = state
            .schedule(pod, SchedulingAlgorithm::FirstFit)
            .await
            .unwrap();
        (pod_id, node)
    }

    #[tokio::test]
    async fn test_pods_move_to_remaining_nodes() {
        let store = Arc::new(MemoryStore::new());
        let state = ClusterState::new(store.clone());
        let a = state.add_node(&NodeSpec::new(4, 8)).await;
        let (pod_id, on) = place(&state, 2, 2).await;
        assert_eq!(on, a.node_id);

        let b = state.add_node(&NodeSpec::new(4, 8)).await;

        let (detached, report) = fail_over(&state, &a.node_id).await.unwrap();
        assert_eq!(detached.pods.len(), 1);
        assert_eq!(report.rescheduled, vec![(pod_id.clone(), b.node_id.clone())]);
        assert!(report.dropped.is_empty());

        assert!(state.node(&a.node_id).await.is_none());
        let b = state.node(&b.node_id).await.unwrap();
        assert_eq!(b.cpu_available, 2);

        // The pod row follows the pod even though the old node's rows were deleted
        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.pods[&pod_id].node_id, b.node_id);
        assert!(!persisted.nodes.contains_key(&a.node_id));
    }

    #[tokio::test]
    async fn test_pods_without_room_are_dropped() {
        let state = ClusterState::new(Arc::new(MemoryStore::new()));
        let a = state.add_node(&NodeSpec::new(8, 8)).await;
        let (big, _) = place(&state, 6, 2).await;
        let (small, _) = place(&state, 1, 1).await;
        state.add_node(&NodeSpec::new(2, 2)).await;

        let (_, report) = fail_over(&state, &a.node_id).await.unwrap();

        assert_eq!(report.dropped, vec![big.clone()]);
        assert_eq!(report.rescheduled.len(), 1);
        assert_eq!(report.rescheduled[0].0, small);

        let logs = state.logs().await;
        assert!(logs
            .iter()
            .any(|l| l.ends_with(&format!("Failed to reschedule pod {}", big))));
    }

    #[tokio::test]
    async fn test_failover_of_missing_node() {
        let state = ClusterState::new(Arc::new(MemoryStore::new()));
        assert!(fail_over(&state, "missing").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_node_capacity_is_not_reused() {
        let state = ClusterState::new(Arc::new(MemoryStore::new()));
        let a = state.add_node(&NodeSpec::new(8, 8)).await;
        place(&state, 1, 1).await;

        let (_, report) = fail_over(&state, &a.node_id).await.unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert!(state.nodes().await.is_empty());
    }
}
