//! Cluster Controller - the operations surface of the simulator
//!
//! The controller is responsible for:
//! - Admitting nodes and pods
//! - Driving failover when nodes fail or are removed
//! - Starting and stopping backing containers
//! - Publishing state to subscribers
//! - Running the background loops

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::autoscaler::{self, AutoscalerState};
use super::failover::{self, RescheduleReport};
use super::health_monitor;
use super::node::{Node, NodeSpec, NodeType};
use super::placement::SchedulingAlgorithm;
use super::pod::Pod;
use super::publisher::{BroadcastHub, ClusterMessage};
use super::registry::{ClusterState, RestoreSummary};
use super::tasks::spawn_periodic;
use super::{chaos, ClusterError};
use super::{
    AUTOSCALE_COOLDOWN_SECS, AUTOSCALE_INTERVAL_SECS, AUTOSCALE_THRESHOLD,
    DEFAULT_NETWORK_GROUP, DEFAULT_NODE_CPU, DEFAULT_NODE_MEMORY, DEFAULT_POD_MEMORY,
    HEALTH_CHECK_INTERVAL_SECS, HEARTBEAT_THRESHOLD_SECS, PUBLISH_INTERVAL_SECS,
    SIMULATED_HEARTBEAT_INTERVAL_SECS, UTILIZATION_SAMPLE_INTERVAL_SECS,
};
use crate::metrics::ClusterStats;
use crate::runtime::{short_id, ContainerRequest, ContainerRuntime};
use crate::store::StoreError;

/// Controller tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// How often to check node health (seconds)
    pub health_check_interval_secs: u64,

    /// Seconds without a heartbeat before a node is marked failed
    pub heartbeat_threshold_secs: u64,

    /// How often simulated heartbeats are refreshed (seconds)
    pub simulated_heartbeat_interval_secs: u64,

    /// How often the auto-scaler evaluates the cluster (seconds)
    pub autoscale_interval_secs: u64,

    /// CPU utilization ratio that triggers a scale-out
    pub autoscale_threshold: f64,

    /// Minimum seconds between scale-outs
    pub autoscale_cooldown_secs: u64,

    /// How often a utilization sample is recorded (seconds)
    pub utilization_sample_interval_secs: u64,

    /// How often a full snapshot is broadcast (seconds)
    pub publish_interval_secs: u64,

    /// Capacity of nodes added by the auto-scaler
    pub default_node_cpu: u32,
    pub default_node_memory: u32,

    /// Memory given to pods that do not request any
    pub default_pod_memory: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: HEALTH_CHECK_INTERVAL_SECS,
            heartbeat_threshold_secs: HEARTBEAT_THRESHOLD_SECS,
            simulated_heartbeat_interval_secs: SIMULATED_HEARTBEAT_INTERVAL_SECS,
            autoscale_interval_secs: AUTOSCALE_INTERVAL_SECS,
            autoscale_threshold: AUTOSCALE_THRESHOLD,
            autoscale_cooldown_secs: AUTOSCALE_COOLDOWN_SECS,
            utilization_sample_interval_secs: UTILIZATION_SAMPLE_INTERVAL_SECS,
            publish_interval_secs: PUBLISH_INTERVAL_SECS,
            default_node_cpu: DEFAULT_NODE_CPU,
            default_node_memory: DEFAULT_NODE_MEMORY,
            default_pod_memory: DEFAULT_POD_MEMORY,
        }
    }
}

/// Parameters of a pod admission
#[derive(Debug, Clone, PartialEq)]
pub struct PodRequest {
    pub cpu: u32,
    pub memory: u32,
    pub algorithm: SchedulingAlgorithm,
    pub network_group: String,
    pub node_affinity: Option<NodeType>,
}

impl PodRequest {
    pub fn new(cpu: u32, memory: u32) -> Self {
        Self {
            cpu,
            memory,
            algorithm: SchedulingAlgorithm::default(),
            network_group: DEFAULT_NETWORK_GROUP.to_string(),
            node_affinity: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: SchedulingAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.network_group = group.into();
        self
    }

    pub fn with_affinity(mut self, affinity: Option<NodeType>) -> Self {
        self.node_affinity = affinity;
        self
    }
}

/// Where an admitted pod landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodPlacement {
    pub pod_id: String,
    pub assigned_node: String,
    pub scheduling_algorithm: SchedulingAlgorithm,
}

/// The cluster controller owns the shared state and its collaborators
pub struct ClusterController {
    state: Arc<ClusterState>,
    runtime: Arc<dyn ContainerRuntime>,
    hub: BroadcastHub,
    config: ControllerConfig,
    autoscaler: Mutex<AutoscalerState>,
}

impl ClusterController {
    pub fn new(
        state: Arc<ClusterState>,
        runtime: Arc<dyn ContainerRuntime>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            state,
            runtime,
            hub: BroadcastHub::new(),
            config,
            autoscaler: Mutex::new(AutoscalerState::new()),
        }
    }

    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub(crate) fn autoscaler(&self) -> &Mutex<AutoscalerState> {
        &self.autoscaler
    }

    // =========================================================================
    // Node Management
    // =========================================================================

    /// Register a node and request its backing container
    pub async fn add_node(&self, spec: NodeSpec) -> Node {
        let node = self.state.add_node(&spec).await;
        self.launch_container(&node, false);
        self.publish_state().await;
        node
    }

    /// Register an auto-scaled node (self-removing container, distinct log line)
    pub(crate) async fn add_autoscaled_node(&self, spec: NodeSpec) -> Node {
        let node = self
            .state
            .add_node_at(&spec, Utc::now(), "Auto-scaled: Added node")
            .await;
        self.launch_container(&node, true);
        self.publish_state().await;
        node
    }

    /// Remove a node and reschedule its pods onto the rest of the cluster
    pub async fn remove_node(&self, node_id: &str) -> Result<RescheduleReport, ClusterError> {
        let report = self
            .fail_over(node_id)
            .await
            .ok_or_else(|| ClusterError::node_not_found(node_id))?;
        self.state.log_event(&format!("Removed node {}", node_id)).await;
        self.publish_state().await;
        Ok(report)
    }

    /// Record a heartbeat from a node agent; a reactivation is published
    pub async fn heartbeat(&self, node_id: &str) -> Result<(), ClusterError> {
        if self.state.heartbeat(node_id, Utc::now()).await? {
            self.publish_state().await;
        }
        Ok(())
    }

    /// Turn the heartbeat simulator on or off for a node
    pub async fn toggle_simulation(&self, node_id: &str, enabled: bool) -> Result<(), ClusterError> {
        self.state.set_simulation(node_id, enabled).await?;
        self.publish_state().await;
        Ok(())
    }

    /// Detach a node, reschedule its pods and stop its container.
    ///
    /// `None` when the node was already gone.
    pub async fn fail_over(&self, node_id: &str) -> Option<RescheduleReport> {
        let (node, report) = failover::fail_over(&self.state, node_id).await?;
        if let Some(container_id) = node.container_id {
            self.stop_container(node.node_id, container_id);
        }
        Some(report)
    }

    /// Restore mirrored state and fail over the nodes that were persisted as
    /// failed, so their pods get another chance at placement
    pub async fn restore_from_store(&self, now: DateTime<Utc>) -> Result<RestoreSummary, StoreError> {
        let summary = self.state.restore_from_store(now).await?;
        for node_id in &summary.failed {
            info!("Failing over node {} restored as failed", node_id);
            if let Some(report) = self.fail_over(node_id).await {
                debug!(
                    "Restored node {}: {} pods rescheduled, {} dropped",
                    node_id,
                    report.rescheduled.len(),
                    report.dropped.len()
                );
            }
        }
        Ok(summary)
    }

    // =========================================================================
    // Pod Management
    // =========================================================================

    /// Admit a pod and place it; a pod with nowhere to go is dropped
    pub async fn launch_pod(&self, request: PodRequest) -> Result<PodPlacement, ClusterError> {
        let pod = Pod::new(
            self.state.next_pod_id(),
            request.cpu,
            request.memory,
            request.network_group,
        )
        .with_affinity(request.node_affinity);
        let pod_id = pod.pod_id.clone();

        match self.state.schedule(pod, request.algorithm).await {
            Ok(assigned_node) => {
                self.publish_state().await;
                Ok(PodPlacement {
                    pod_id,
                    assigned_node,
                    scheduling_algorithm: request.algorithm,
                })
            }
            Err(e) => {
                warn!("No capacity for pod {}", pod_id);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Chaos, stats and reports
    // =========================================================================

    /// Kill a random active node
    pub async fn trigger_chaos(&self) -> String {
        let message = chaos::inject_fault(self).await;
        self.publish_state().await;
        message
    }

    pub async fn cluster_stats(&self) -> ClusterStats {
        ClusterStats::from_nodes(&self.state.nodes().await)
    }

    /// CSV report of every node
    pub async fn report_csv(&self) -> String {
        render_report(&self.state.nodes().await)
    }

    /// Broadcast a full snapshot
    pub async fn publish_state(&self) {
        let snapshot = self.state.snapshot().await;
        self.hub.publish(ClusterMessage::StateUpdate(snapshot));
    }

    // =========================================================================
    // Containers
    // =========================================================================

    fn launch_container(&self, node: &Node, autoscaled: bool) {
        if !self.runtime.is_enabled() {
            debug!("Skipping container launch for node {}", node.node_id);
            return;
        }

        let request = ContainerRequest {
            node_id: node.node_id.clone(),
            cpu: node.cpu_total,
            memory_gb: node.memory_total,
            network_group: node.network_group.clone(),
            autoscaled,
        };
        let state = self.state.clone();
        let runtime = self.runtime.clone();

        tokio::spawn(async move {
            match runtime.start_node(&request).await {
                Ok(container_id) => {
                    if state.attach_container(&request.node_id, &container_id).await {
                        state
                            .log_event(&format!(
                                "Container {} launched for node {}",
                                short_id(&container_id),
                                request.node_id
                            ))
                            .await;
                    } else if let Err(e) = runtime.stop_node(&container_id).await {
                        // Node went away while the container was starting
                        warn!("Failed to stop orphan container {}: {}", container_id, e);
                    }
                }
                Err(e) => {
                    state
                        .log_event(&format!(
                            "ERROR launching container for node {}: {}",
                            request.node_id, e
                        ))
                        .await;
                }
            }
        });
    }

    fn stop_container(&self, node_id: String, container_id: String) {
        let state = self.state.clone();
        let runtime = self.runtime.clone();

        tokio::spawn(async move {
            if let Err(e) = runtime.stop_node(&container_id).await {
                warn!("Failed to stop container {}: {}", container_id, e);
                state
                    .log_event(&format!(
                        "ERROR stopping container for node {}: {}",
                        node_id, e
                    ))
                    .await;
            }
        });
    }

    // =========================================================================
    // Background loops
    // =========================================================================

    /// Spawn every periodic loop; they all stop when `shutdown` flips to true
    pub fn spawn_background_tasks(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let secs = Duration::from_secs;
        let config = &self.config;
        let mut handles = Vec::new();

        let controller = self.clone();
        handles.push(spawn_periodic(
            "health monitor",
            secs(config.health_check_interval_secs),
            shutdown.clone(),
            move || {
                let controller = controller.clone();
                async move {
                    health_monitor::run_health_sweep(&controller, Utc::now()).await;
                }
            },
        ));

        let controller = self.clone();
        handles.push(spawn_periodic(
            "heartbeat simulator",
            secs(config.simulated_heartbeat_interval_secs),
            shutdown.clone(),
            move || {
                let controller = controller.clone();
                async move {
                    health_monitor::run_simulated_heartbeats(&controller, Utc::now()).await;
                }
            },
        ));

        let controller = self.clone();
        handles.push(spawn_periodic(
            "auto-scaler",
            secs(config.autoscale_interval_secs),
            shutdown.clone(),
            move || {
                let controller = controller.clone();
                async move {
                    autoscaler::autoscale_sweep(&controller, Utc::now()).await;
                }
            },
        ));

        let controller = self.clone();
        handles.push(spawn_periodic(
            "utilization sampler",
            secs(config.utilization_sample_interval_secs),
            shutdown.clone(),
            move || {
                let controller = controller.clone();
                async move {
                    controller.state.record_utilization(Utc::now()).await;
                }
            },
        ));

        let controller = self.clone();
        handles.push(spawn_periodic(
            "state publisher",
            secs(config.publish_interval_secs),
            shutdown,
            move || {
                let controller = controller.clone();
                async move {
                    controller.publish_state().await;
                }
            },
        ));

        handles
    }
}

/// Render the node report as CSV
pub fn render_report(nodes: &[Node]) -> String {
    let mut out = String::from("Node,CPU tot/avail,Mem tot/avail,Status,Type,Group,Pods\n");

    for node in nodes {
        let pods = if node.pods.is_empty() {
            "None".to_string()
        } else {
            node.pods
                .iter()
                .map(|p| p.pod_id.as_str())
                .collect::<Vec<_>>()
                .join(";")
        };

        let row = [
            node.node_id.clone(),
            format!("{}/{}", node.cpu_total, node.cpu_available),
            format!("{}/{}", node.memory_total, node.memory_available),
            node.status.to_string(),
            node.node_type.to_string(),
            node.network_group.clone(),
            pods,
        ];
        let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

/// Quote a CSV field when it contains a separator, quote or newline
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::NodeStatus;
    use crate::runtime::DisabledRuntime;
    use crate::store::{ClusterStore, MemoryStore, PersistedState, PodRecord};

    fn controller() -> ClusterController {
        let state = Arc::new(ClusterState::new(Arc::new(MemoryStore::new())));
        ClusterController::new(state, Arc::new(DisabledRuntime), ControllerConfig::default())
    }

    #[tokio::test]
    async fn test_launch_pod_reports_placement() {
        let controller = controller();
        let node = controller.add_node(NodeSpec::new(8, 16)).await;

        let placement = controller
            .launch_pod(PodRequest::new(2, 4).with_algorithm(SchedulingAlgorithm::BestFit))
            .await
            .unwrap();

        assert_eq!(placement.pod_id, "pod_1");
        assert_eq!(placement.assigned_node, node.node_id);
        assert_eq!(placement.scheduling_algorithm, SchedulingAlgorithm::BestFit);
    }

    #[tokio::test]
    async fn test_launch_pod_without_capacity() {
        let controller = controller();
        let err = controller.launch_pod(PodRequest::new(1, 1)).await.unwrap_err();
        assert_eq!(err.kind(), "no_capacity");

        // The id is consumed even though the pod was dropped
        controller.add_node(NodeSpec::new(2, 2)).await;
        let placement = controller.launch_pod(PodRequest::new(1, 1)).await.unwrap();
        assert_eq!(placement.pod_id, "pod_2");
    }

    #[tokio::test]
    async fn test_remove_node_twice() {
        let controller = controller();
        let node = controller.add_node(NodeSpec::new(4, 4)).await;

        assert!(controller.remove_node(&node.node_id).await.is_ok());
        assert!(matches!(
            controller.remove_node(&node.node_id).await,
            Err(ClusterError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_are_published() {
        let controller = controller();
        let mut rx = controller.hub().subscribe();

        controller.add_node(NodeSpec::new(4, 4)).await;

        match rx.recv().await.unwrap() {
            ClusterMessage::StateUpdate(snapshot) => assert_eq!(snapshot.nodes.len(), 1),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reactivating_heartbeat_is_published() {
        let controller = controller();
        let node = controller.add_node(NodeSpec::new(4, 4)).await;
        let later = Utc::now() + chrono::Duration::seconds(30);
        controller.state().fail_stale(later, 15).await;

        let mut rx = controller.hub().subscribe();
        controller.heartbeat(&node.node_id).await.unwrap();

        match rx.try_recv().unwrap() {
            ClusterMessage::StateUpdate(snapshot) => {
                assert!(snapshot.nodes[0].is_active());
                assert!(snapshot.logs.last().unwrap().contains("reactivated"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // A routine heartbeat changes no status and publishes nothing
        controller.heartbeat(&node.node_id).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restore_fails_over_nodes_persisted_as_failed() {
        let now = Utc::now();
        let mut dead = Node::new("a", &NodeSpec::new(4, 4), now);
        dead.status = NodeStatus::Failed;
        let live = Node::new("b", &NodeSpec::new(4, 4), now);

        let mut persisted = PersistedState::default();
        persisted.nodes.insert("a".into(), dead);
        persisted.nodes.insert("b".into(), live);
        persisted.pods.insert(
            "pod_1".into(),
            PodRecord {
                node_id: "a".into(),
                pod: Pod::new("pod_1", 2, 2, "default"),
            },
        );

        let store = Arc::new(MemoryStore::with_state(persisted));
        let state = Arc::new(ClusterState::new(store.clone()));
        let controller =
            ClusterController::new(state, Arc::new(DisabledRuntime), ControllerConfig::default());

        let summary = controller.restore_from_store(now).await.unwrap();
        assert_eq!(summary.failed, vec!["a".to_string()]);

        let nodes = controller.state().nodes().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "b");
        assert_eq!(nodes[0].pods[0].pod_id, "pod_1");

        let persisted = store.load().await.unwrap();
        assert!(!persisted.nodes.contains_key("a"));
        assert_eq!(persisted.pods["pod_1"].node_id, "b");
    }

    #[test]
    fn test_render_report() {
        let mut node = Node::new("n1", &NodeSpec::new(8, 16), Utc::now());
        node.place(Pod::new("pod_1", 2, 4, "default"));
        node.place(Pod::new("pod_2", 1, 1, "default"));
        let empty = Node::new(
            "n2",
            &NodeSpec::new(4, 4)
                .with_type(NodeType::HighCpu)
                .with_group("a,b"),
            Utc::now(),
        );

        let csv = render_report(&[node, empty]);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "Node,CPU tot/avail,Mem tot/avail,Status,Type,Group,Pods");
        assert_eq!(lines[1], "n1,8/5,16/11,active,balanced,default,pod_1;pod_2");
        assert_eq!(lines[2], "n2,4/4,4/4,active,high_cpu,\"a,b\",None");
    }

    #[test]
    fn test_config_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.heartbeat_threshold_secs, 15);
        assert_eq!(config.autoscale_cooldown_secs, 60);
        assert_eq!(config.default_node_cpu, 8);
        assert_eq!(config.default_node_memory, 16);
    }
}
