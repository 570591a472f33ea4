//! Cluster behavior tests against the library API

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use clustersim::cluster::autoscaler::autoscale_sweep;
use clustersim::cluster::controller::PodRequest;
use clustersim::cluster::health_monitor::run_health_sweep;
use clustersim::cluster::{
    ClusterController, ClusterError, ClusterState, ControllerConfig, NodeSpec, NodeType,
    SchedulingAlgorithm,
};
use clustersim::runtime::DisabledRuntime;
use clustersim::store::{ClusterStore, JsonFileStore, MemoryStore};
use tempfile::TempDir;

fn controller_with_store(store: Arc<dyn ClusterStore>) -> ClusterController {
    let state = Arc::new(ClusterState::new(store));
    ClusterController::new(state, Arc::new(DisabledRuntime), ControllerConfig::default())
}

fn controller() -> ClusterController {
    controller_with_store(Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn test_resources_never_exceed_totals() {
    let controller = controller();
    controller.add_node(NodeSpec::new(4, 8)).await;
    controller.add_node(NodeSpec::new(6, 8)).await;

    let mut placed = 0;
    for _ in 0..10 {
        if controller.launch_pod(PodRequest::new(2, 3)).await.is_ok() {
            placed += 1;
        }
    }
    // Memory limits each node to two pods
    assert_eq!(placed, 4);

    for node in controller.state().nodes().await {
        assert!(node.cpu_available <= node.cpu_total);
        assert!(node.memory_available <= node.memory_total);
        let cpu_used: u32 = node.pods.iter().map(|p| p.cpu).sum();
        assert_eq!(node.cpu_available + cpu_used, node.cpu_total);
    }
}

#[tokio::test]
async fn test_pod_lands_on_exactly_one_node_in_its_group() {
    let controller = controller();
    controller
        .add_node(NodeSpec::new(8, 16).with_group("default"))
        .await;
    let isolated = controller
        .add_node(NodeSpec::new(8, 16).with_group("isolated"))
        .await;

    let placement = controller
        .launch_pod(PodRequest::new(2, 2).with_group("isolated"))
        .await
        .unwrap();
    assert_eq!(placement.assigned_node, isolated.node_id);

    let holders: Vec<_> = controller
        .state()
        .nodes()
        .await
        .into_iter()
        .filter(|n| n.pods.iter().any(|p| p.pod_id == placement.pod_id))
        .collect();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].network_group, "isolated");
}

#[tokio::test]
async fn test_rejected_pod_changes_nothing() {
    let controller = controller();
    controller.add_node(NodeSpec::new(2, 2)).await;
    let before = controller.state().nodes().await;

    let err = controller.launch_pod(PodRequest::new(4, 1)).await.unwrap_err();
    assert!(matches!(err, ClusterError::NoCapacity(_)));
    assert_eq!(controller.state().nodes().await, before);
}

#[tokio::test]
async fn test_best_fit_and_worst_fit() {
    let controller = controller();
    let large = controller.add_node(NodeSpec::new(8, 16)).await;
    let small = controller.add_node(NodeSpec::new(4, 16)).await;

    let best = controller
        .launch_pod(PodRequest::new(2, 1).with_algorithm(SchedulingAlgorithm::BestFit))
        .await
        .unwrap();
    assert_eq!(best.assigned_node, small.node_id);

    let worst = controller
        .launch_pod(PodRequest::new(2, 1).with_algorithm(SchedulingAlgorithm::WorstFit))
        .await
        .unwrap();
    assert_eq!(worst.assigned_node, large.node_id);
}

#[tokio::test]
async fn test_affinity_is_a_hard_constraint() {
    let controller = controller();
    controller
        .add_node(NodeSpec::new(16, 16).with_type(NodeType::Balanced))
        .await;

    let err = controller
        .launch_pod(PodRequest::new(1, 1).with_affinity(Some(NodeType::HighMem)))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::NoCapacity(_)));
}

#[tokio::test]
async fn test_heartbeat_timeout_fails_over_and_logs_drops() {
    let controller = controller();
    let a = controller.add_node(NodeSpec::new(4, 8)).await;
    let p1 = controller.launch_pod(PodRequest::new(3, 2)).await.unwrap();
    let p2 = controller.launch_pod(PodRequest::new(1, 2)).await.unwrap();
    assert_eq!(p1.assigned_node, a.node_id);
    assert_eq!(p2.assigned_node, a.node_id);

    // Room for the small pod only
    let b = controller.add_node(NodeSpec::new(2, 8)).await;

    let later = Utc::now() + Duration::seconds(30);
    controller.state().heartbeat(&b.node_id, later).await.unwrap();

    let failed = run_health_sweep(&controller, later).await;
    assert_eq!(failed, vec![a.node_id.clone()]);

    let nodes = controller.state().nodes().await;
    assert_eq!(nodes.len(), 1);
    let pods: Vec<_> = nodes[0].pods.iter().map(|p| p.pod_id.clone()).collect();
    assert_eq!(pods, vec![p2.pod_id.clone()]);

    let logs = controller.state().logs().await;
    assert!(logs.iter().any(|l| l.contains(&format!("Node {} marked FAILED", a.node_id))));
    assert!(logs
        .iter()
        .any(|l| l.contains(&format!("Failed to reschedule pod {}", p1.pod_id))));
}

#[tokio::test]
async fn test_remove_node_reschedules_pods() {
    let controller = controller();
    let a = controller.add_node(NodeSpec::new(4, 8)).await;
    let pod = controller.launch_pod(PodRequest::new(2, 2)).await.unwrap();
    let b = controller.add_node(NodeSpec::new(4, 8)).await;

    let report = controller.remove_node(&a.node_id).await.unwrap();
    assert_eq!(report.rescheduled, vec![(pod.pod_id.clone(), b.node_id.clone())]);
    assert!(report.dropped.is_empty());

    assert!(controller.state().node(&a.node_id).await.is_none());
    let b_now = controller.state().node(&b.node_id).await.unwrap();
    assert_eq!(b_now.cpu_available, 2);

    assert!(matches!(
        controller.remove_node(&a.node_id).await,
        Err(ClusterError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_autoscale_waits_for_cooldown() {
    let controller = controller();
    controller.add_node(NodeSpec::new(10, 10)).await;
    controller.launch_pod(PodRequest::new(9, 1)).await.unwrap();

    let t0 = Utc::now();
    assert!(autoscale_sweep(&controller, t0).await.is_some());
    // Utilization dropped to 9/18 after the scale-out
    assert!(autoscale_sweep(&controller, t0 + Duration::seconds(120)).await.is_none());
    assert_eq!(controller.state().nodes().await.len(), 2);
}

#[tokio::test]
async fn test_chaos_on_empty_cluster_is_noop() {
    let controller = controller();
    assert_eq!(controller.trigger_chaos().await, "No active nodes");
    assert!(controller.state().nodes().await.is_empty());
}

#[tokio::test]
async fn test_chaos_kills_the_only_node() {
    let controller = controller();
    let node = controller.add_node(NodeSpec::new(4, 4)).await;
    assert_eq!(
        controller.trigger_chaos().await,
        format!("Killed node {}", node.node_id)
    );
    assert!(controller.state().nodes().await.is_empty());
}

#[tokio::test]
async fn test_heartbeat_unknown_node() {
    let controller = controller();
    assert!(matches!(
        controller.heartbeat("missing").await,
        Err(ClusterError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let (node_id, pod_id) = {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let controller = controller_with_store(store);
        let node = controller.add_node(NodeSpec::new(8, 16)).await;
        let pod = controller.launch_pod(PodRequest::new(2, 4)).await.unwrap();
        (node.node_id, pod.pod_id)
    };

    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let controller = controller_with_store(store);
    let restored = controller.restore_from_store(Utc::now()).await.unwrap();
    assert_eq!(restored.nodes, 1);
    assert!(restored.failed.is_empty());

    let node = controller.state().node(&node_id).await.unwrap();
    assert_eq!(node.pods.len(), 1);
    assert_eq!(node.pods[0].pod_id, pod_id);
    assert_eq!(node.cpu_available, 6);
    assert_eq!(node.memory_available, 12);

    // The pod counter resumes after the restored pod
    let next = controller.launch_pod(PodRequest::new(1, 1)).await.unwrap();
    assert_ne!(next.pod_id, pod_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invariants_hold_under_concurrent_operations() {
    let store = Arc::new(MemoryStore::new());
    let controller = Arc::new(controller_with_store(store.clone()));

    let mut node_ids = Vec::new();
    for i in 0..6 {
        let group = if i % 2 == 0 { "default" } else { "isolated" };
        let node = controller
            .add_node(NodeSpec::new(8, 16).with_group(group))
            .await;
        node_ids.push(node.node_id);
    }

    let algorithms = [
        SchedulingAlgorithm::FirstFit,
        SchedulingAlgorithm::BestFit,
        SchedulingAlgorithm::WorstFit,
    ];
    let mut launches = Vec::new();
    for i in 0..120u32 {
        let controller = controller.clone();
        let group = if i % 3 == 0 { "isolated" } else { "default" };
        let request = PodRequest::new(1 + i % 3, 1 + i % 4)
            .with_algorithm(algorithms[(i % 3) as usize])
            .with_group(group);
        launches.push(tokio::spawn(async move {
            controller
                .launch_pod(request)
                .await
                .ok()
                .map(|placement| (placement.pod_id, group.to_string()))
        }));
    }

    let mut disruptions = Vec::new();
    for i in 0..4i64 {
        let chaos = controller.clone();
        disruptions.push(tokio::spawn(async move {
            chaos.trigger_chaos().await;
        }));

        let scaler = controller.clone();
        disruptions.push(tokio::spawn(async move {
            autoscale_sweep(&scaler, Utc::now() + Duration::seconds(61 * i)).await;
        }));

        let monitor = controller.clone();
        disruptions.push(tokio::spawn(async move {
            run_health_sweep(&monitor, Utc::now()).await;
        }));
    }
    for node_id in node_ids.iter().take(2).cloned() {
        let controller = controller.clone();
        disruptions.push(tokio::spawn(async move {
            // Chaos may have taken the node first
            let _ = controller.remove_node(&node_id).await;
        }));
    }

    let mut admitted = Vec::new();
    for handle in launches {
        if let Some(pod) = handle.await.unwrap() {
            admitted.push(pod);
        }
    }
    for handle in disruptions {
        handle.await.unwrap();
    }

    let nodes = controller.state().nodes().await;
    let mut placed: HashMap<String, String> = HashMap::new();
    for node in &nodes {
        assert!(node.is_active(), "node {} left behind", node.node_id);
        assert!(node.cpu_available <= node.cpu_total);
        assert!(node.memory_available <= node.memory_total);

        let cpu_used: u32 = node.pods.iter().map(|p| p.cpu).sum();
        let memory_used: u32 = node.pods.iter().map(|p| p.memory).sum();
        assert_eq!(node.cpu_available + cpu_used, node.cpu_total);
        assert_eq!(node.memory_available + memory_used, node.memory_total);

        for pod in &node.pods {
            assert_eq!(pod.network_group, node.network_group);
            let previous = placed.insert(pod.pod_id.clone(), node.network_group.clone());
            assert!(previous.is_none(), "pod {} placed twice", pod.pod_id);
        }
    }

    // The mirrored log is unbounded, unlike the in-memory one
    let logs = store.load().await.unwrap().event_logs;
    let dropped: HashSet<&str> = logs
        .iter()
        .filter_map(|l| l.split("Failed to reschedule pod ").nth(1))
        .collect();

    for (pod_id, group) in &admitted {
        match placed.get(pod_id) {
            Some(node_group) => assert_eq!(node_group, group),
            None => assert!(
                dropped.contains(pod_id.as_str()),
                "pod {} vanished without a drop event",
                pod_id
            ),
        }
    }
    assert!(!admitted.is_empty());
}
