//! Node registry - the single authoritative cluster state
//!
//! One `RwLock` guards the node map (with every node's pod list and available
//! resources), the event log and the utilization history. Mutations record the
//! store writes they imply while holding the lock; those writes are flushed
//! as one batch after the lock is released. Flushes are serialized in lock
//! order, so the store never sees an older mutation land after a newer one.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{format_event, BoundedLog, UtilizationSample};
use super::node::{Node, NodeSpec, NodeStatus};
use super::placement::{select_node, SchedulingAlgorithm};
use super::pod::{Pod, PodIdAllocator};
use super::{ClusterError, EVENT_LOG_CAPACITY};
use crate::metrics;
use crate::store::{ClusterStore, PersistedState, StoreError, StoreOp};

/// The lock-guarded part of the cluster state
#[derive(Debug)]
pub(crate) struct Registry {
    /// Ordered by node id; every scan (and every tie-break) follows this order
    pub(crate) nodes: BTreeMap<String, Node>,
    pub(crate) events: BoundedLog<String>,
    pub(crate) history: BoundedLog<UtilizationSample>,
}

impl Registry {
    fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            events: BoundedLog::new(EVENT_LOG_CAPACITY),
            history: BoundedLog::new(EVENT_LOG_CAPACITY),
        }
    }

    /// Append a timestamped event line
    pub(crate) fn log(&mut self, message: &str, now: DateTime<Utc>, mirrors: &mut Vec<StoreOp>) {
        info!("{}", message);
        let line = format_event(message, now);
        self.events.push(line.clone());
        mirrors.push(StoreOp::AppendLog(line));
    }

    /// Place `pod` with `algorithm`; `None` leaves the registry untouched
    pub(crate) fn place(
        &mut self,
        pod: Pod,
        algorithm: SchedulingAlgorithm,
        now: DateTime<Utc>,
        mirrors: &mut Vec<StoreOp>,
    ) -> Option<String> {
        let node_id = select_node(self.nodes.values(), &pod, algorithm)?
            .node_id
            .clone();
        let node = self.nodes.get_mut(&node_id)?;

        let pod_id = pod.pod_id.clone();
        node.place(pod.clone());
        mirrors.push(StoreOp::SaveNode(node.without_pods()));
        mirrors.push(StoreOp::SavePod {
            pod,
            node_id: node_id.clone(),
        });

        self.log(
            &format!("Pod {} scheduled on node {} via {}", pod_id, node_id, algorithm),
            now,
            mirrors,
        );
        Some(node_id)
    }

    /// Mark an active node failed; returns false when it was absent or already failed
    pub(crate) fn mark_failed(&mut self, node_id: &str, mirrors: &mut Vec<StoreOp>) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) if node.is_active() => {
                node.status = NodeStatus::Failed;
                mirrors.push(StoreOp::SaveNode(node.without_pods()));
                true
            }
            _ => false,
        }
    }

    /// Remove a node from the map (its pods leave with it)
    pub(crate) fn detach(&mut self, node_id: &str, mirrors: &mut Vec<StoreOp>) -> Option<Node> {
        let node = self.nodes.remove(node_id)?;
        mirrors.push(StoreOp::DeleteNode(node_id.to_string()));
        Some(node)
    }

    fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_active())
    }
}

/// Consistent copy of the cluster taken under the lock
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub nodes: Vec<Node>,
    pub logs: Vec<String>,
    pub history: Vec<UtilizationSample>,
}

/// Shared cluster state
pub struct ClusterState {
    inner: RwLock<Registry>,
    store: Arc<dyn ClusterStore>,
    /// Taken under the registry write lock, held while flushing
    flush_order: Mutex<()>,
    pod_ids: PodIdAllocator,
}

/// What a restore brought back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Number of restored nodes
    pub nodes: usize,
    /// Nodes that were persisted as failed, still awaiting failover
    pub failed: Vec<String>,
}

impl ClusterState {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self {
            inner: RwLock::new(Registry::new()),
            store,
            flush_order: Mutex::new(()),
            pod_ids: PodIdAllocator::new(),
        }
    }

    /// Run `f` under the write lock, then flush the store writes it recorded
    pub(crate) async fn apply<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Registry, &mut Vec<StoreOp>) -> R,
    {
        let mut ops = Vec::new();
        let (result, order) = {
            let mut registry = self.inner.write().await;
            let result = f(&mut registry, &mut ops);
            if ops.is_empty() {
                return result;
            }
            (result, self.flush_order.lock().await)
        };

        let outcome = self.store.write_batch(&ops).await;
        drop(order);

        // Failures are recorded in memory only so a broken store cannot loop
        if let Err(e) = outcome {
            warn!("Failed to persist {} store writes: {}", ops.len(), e);
            let line = format_event(&format!("Persistence error: {}", e), Utc::now());
            self.inner.write().await.events.push(line);
        }
        result
    }

    // =========================================================================
    // Node lifecycle
    // =========================================================================

    /// Register a node with all capacity available
    pub async fn add_node(&self, spec: &NodeSpec) -> Node {
        self.add_node_at(spec, Utc::now(), "Added node").await
    }

    pub(crate) async fn add_node_at(&self, spec: &NodeSpec, now: DateTime<Utc>, verb: &str) -> Node {
        let node = Node::new(Uuid::new_v4().to_string(), spec, now);
        let message = format!(
            "{} {} ({} CPU, {}GB, {}/{})",
            verb, node.node_id, node.cpu_total, node.memory_total, node.node_type, node.network_group
        );

        self.apply(|reg, mirrors| {
            reg.nodes.insert(node.node_id.clone(), node.clone());
            mirrors.push(StoreOp::SaveNode(node.without_pods()));
            reg.log(&message, now, mirrors);
        })
        .await;

        node
    }

    /// Record the backing container of a node; false if the node is gone
    pub async fn attach_container(&self, node_id: &str, container_id: &str) -> bool {
        self.apply(|reg, mirrors| match reg.nodes.get_mut(node_id) {
            Some(node) => {
                node.container_id = Some(container_id.to_string());
                mirrors.push(StoreOp::SaveNode(node.without_pods()));
                true
            }
            None => false,
        })
        .await
    }

    /// Refresh a node's heartbeat, reactivating it if it had failed.
    ///
    /// Returns whether the node was reactivated.
    pub async fn heartbeat(&self, node_id: &str, now: DateTime<Utc>) -> Result<bool, ClusterError> {
        self.apply(|reg, mirrors| {
            let node = reg
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| ClusterError::node_not_found(node_id))?;

            node.last_heartbeat = now;
            let reactivated = node.status == NodeStatus::Failed;
            if reactivated {
                node.status = NodeStatus::Active;
            }
            mirrors.push(StoreOp::SaveNode(node.without_pods()));

            if reactivated {
                reg.log(&format!("Node {} reactivated", node_id), now, mirrors);
            }
            Ok(reactivated)
        })
        .await
    }

    /// Enable or disable the heartbeat simulator for a node
    pub async fn set_simulation(&self, node_id: &str, enabled: bool) -> Result<(), ClusterError> {
        let now = Utc::now();
        self.apply(|reg, mirrors| {
            let node = reg
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| ClusterError::node_not_found(node_id))?;
            node.simulate_heartbeat = enabled;
            mirrors.push(StoreOp::SaveNode(node.without_pods()));

            reg.log(
                &format!("Simulation for {} set to {}", node_id, enabled),
                now,
                mirrors,
            );
            Ok(())
        })
        .await
    }

    /// Refresh `last_heartbeat` of every node the simulator keeps alive
    pub async fn refresh_simulated_heartbeats(&self, now: DateTime<Utc>) -> usize {
        self.apply(|reg, mirrors| {
            let mut refreshed = 0;
            for node in reg.nodes.values_mut().filter(|n| n.simulate_heartbeat) {
                node.last_heartbeat = now;
                mirrors.push(StoreOp::SaveNode(node.without_pods()));
                refreshed += 1;
            }
            refreshed
        })
        .await
    }

    /// Mark every active node whose heartbeat is older than `threshold_secs`
    /// as failed; returns the ids marked
    pub async fn fail_stale(&self, now: DateTime<Utc>, threshold_secs: u64) -> Vec<String> {
        let threshold = i64::try_from(threshold_secs).unwrap_or(i64::MAX);
        self.apply(|reg, mirrors| {
            let stale: Vec<String> = reg
                .active_nodes()
                .filter(|n| n.is_stale(now, threshold))
                .map(|n| n.node_id.clone())
                .collect();

            for node_id in &stale {
                reg.mark_failed(node_id, mirrors);
                reg.log(&format!("Node {} marked FAILED", node_id), now, mirrors);
            }
            stale
        })
        .await
    }

    /// Fail one active node picked by `choose` from the ascending id list.
    ///
    /// `message` builds the event line from the chosen id.
    pub async fn fail_one<C, M>(&self, choose: C, message: M) -> Option<String>
    where
        C: FnOnce(&[String]) -> Option<String>,
        M: FnOnce(&str) -> String,
    {
        let now = Utc::now();
        self.apply(|reg, mirrors| {
            let active: Vec<String> = reg.active_nodes().map(|n| n.node_id.clone()).collect();
            let victim = choose(&active)?;
            if !reg.mark_failed(&victim, mirrors) {
                return None;
            }
            reg.log(&message(&victim), now, mirrors);
            Some(victim)
        })
        .await
    }

    // =========================================================================
    // Pods
    // =========================================================================

    /// Allocate a fresh pod id
    pub fn next_pod_id(&self) -> String {
        self.pod_ids.next_id()
    }

    /// Place a pending pod; the selection and the mutation happen under one lock
    pub async fn schedule(
        &self,
        pod: Pod,
        algorithm: SchedulingAlgorithm,
    ) -> Result<String, ClusterError> {
        let pod_id = pod.pod_id.clone();
        let now = Utc::now();
        self.apply(|reg, mirrors| reg.place(pod, algorithm, now, mirrors))
            .await
            .ok_or_else(|| {
                debug!("No eligible node for pod {}", pod_id);
                ClusterError::NoCapacity("No available node with sufficient resources".to_string())
            })
    }

    // =========================================================================
    // Metrics and reads
    // =========================================================================

    /// Current CPU utilization ratio over active nodes
    pub async fn utilization(&self) -> f64 {
        let reg = self.inner.read().await;
        metrics::cpu_utilization(reg.nodes.values())
    }

    /// Append a utilization sample (percentage) to the bounded history
    pub async fn record_utilization(&self, now: DateTime<Utc>) -> UtilizationSample {
        self.apply(|reg, mirrors| {
            let sample = UtilizationSample {
                timestamp: now,
                utilization: metrics::cpu_utilization(reg.nodes.values()) * 100.0,
            };
            reg.history.push(sample);
            mirrors.push(StoreOp::AppendSample(sample));
            sample
        })
        .await
    }

    /// Append an event line
    pub async fn log_event(&self, message: &str) {
        let now = Utc::now();
        self.apply(|reg, mirrors| reg.log(message, now, mirrors)).await;
    }

    pub async fn snapshot(&self) -> ClusterSnapshot {
        let reg = self.inner.read().await;
        ClusterSnapshot {
            nodes: reg.nodes.values().cloned().collect(),
            logs: reg.events.to_vec(),
            history: reg.history.to_vec(),
        }
    }

    pub async fn nodes(&self) -> Vec<Node> {
        self.inner.read().await.nodes.values().cloned().collect()
    }

    pub async fn node(&self, node_id: &str) -> Option<Node> {
        self.inner.read().await.nodes.get(node_id).cloned()
    }

    pub async fn logs(&self) -> Vec<String> {
        self.inner.read().await.events.to_vec()
    }

    pub async fn history(&self) -> Vec<UtilizationSample> {
        self.inner.read().await.history.to_vec()
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Load the mirrored rows from this state's store and restore them
    pub async fn restore_from_store(&self, now: DateTime<Utc>) -> Result<RestoreSummary, StoreError> {
        let persisted = self.store.load().await?;
        Ok(self.restore(persisted, now).await)
    }

    /// Rebuild the registry from mirrored rows.
    ///
    /// Available resources are recomputed from the restored pods, heartbeats
    /// are reset to `now` so restored nodes get a full grace window, and the
    /// pod id counter resumes after the highest restored pod number. Nodes
    /// persisted as failed come back failed; their ids are returned so the
    /// caller can fail them over.
    pub async fn restore(&self, persisted: PersistedState, now: DateTime<Utc>) -> RestoreSummary {
        let mut nodes = persisted.nodes;
        for node in nodes.values_mut() {
            node.pods.clear();
            node.last_heartbeat = now;
        }

        let mut pods: Vec<_> = persisted.pods.into_values().collect();
        pods.sort_by_key(|r| (r.pod.sequence().unwrap_or(u64::MAX), r.pod.pod_id.clone()));

        let mut orphans = 0;
        for record in pods {
            if let Some(seq) = record.pod.sequence() {
                self.pod_ids.advance_past(seq);
            }
            match nodes.get_mut(&record.node_id) {
                Some(node) => node.pods.push(record.pod),
                None => orphans += 1,
            }
        }
        if orphans > 0 {
            warn!("Skipped {} restored pods whose node no longer exists", orphans);
        }

        for node in nodes.values_mut() {
            node.recompute_available();
        }

        let summary = RestoreSummary {
            nodes: nodes.len(),
            failed: nodes
                .values()
                .filter(|n| n.status == NodeStatus::Failed)
                .map(|n| n.node_id.clone())
                .collect(),
        };

        let mut reg = self.inner.write().await;
        info!("Restored {} nodes from store", summary.nodes);
        reg.nodes = nodes;
        for line in persisted.event_logs {
            reg.events.push(line);
        }
        for sample in persisted.utilization_history {
            reg.history.push(sample);
        }
        summary
    }
}
