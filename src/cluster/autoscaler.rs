//! Cluster auto-scaler
//!
//! Adds one default-sized node whenever CPU utilization over active nodes
//! reaches the threshold, at most once per cooldown window.

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use tracing::debug;

use super::controller::ClusterController;
use super::node::{NodeSpec, NodeType};
use super::AUTOSCALE_NETWORK_GROUPS;

/// Auto-scaler state
///
/// Tracks the last scale-out to enforce the cooldown period.
#[derive(Debug, Clone, Default)]
pub struct AutoscalerState {
    /// Time of the last successful scale-out
    pub last_scale_up: Option<DateTime<Utc>>,
}

impl AutoscalerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scale-out action
    pub fn record_scale_up(&mut self, at: DateTime<Utc>) {
        self.last_scale_up = Some(at);
    }

    /// Check if scale-up is allowed (more than the cooldown has elapsed)
    pub fn can_scale_up(&self, cooldown_seconds: u64, now: DateTime<Utc>) -> bool {
        self.last_scale_up
            .map(|t| (now - t).num_seconds() > cooldown_seconds as i64)
            .unwrap_or(true)
    }
}

/// Scaling decision from the auto-scaler
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingDecision {
    /// No change needed
    NoChange,
    /// Add one node
    ScaleOut { reason: String },
}

/// Decide whether to scale out given the current utilization ratio
pub fn evaluate_scaling(
    utilization: f64,
    threshold: f64,
    state: &AutoscalerState,
    cooldown_secs: u64,
    now: DateTime<Utc>,
) -> ScalingDecision {
    if utilization < threshold {
        return ScalingDecision::NoChange;
    }

    if !state.can_scale_up(cooldown_secs, now) {
        debug!(
            "Utilization {:.1}% above threshold but scale-out is cooling down",
            utilization * 100.0
        );
        return ScalingDecision::NoChange;
    }

    ScalingDecision::ScaleOut {
        reason: format!(
            "CPU utilization {:.1}% >= threshold {:.1}%",
            utilization * 100.0,
            threshold * 100.0
        ),
    }
}

/// Spec for an auto-scaled node: default capacity, random type and group
pub fn autoscaled_node_spec(cpu: u32, memory: u32) -> NodeSpec {
    let mut rng = rand::rng();
    let node_type = *NodeType::ALL.choose(&mut rng).unwrap_or(&NodeType::Balanced);
    let group = AUTOSCALE_NETWORK_GROUPS
        .choose(&mut rng)
        .copied()
        .unwrap_or(super::DEFAULT_NETWORK_GROUP);

    NodeSpec::new(cpu, memory)
        .with_type(node_type)
        .with_group(group)
}

/// One auto-scaler sweep; returns the id of the node added, if any
pub async fn autoscale_sweep(controller: &ClusterController, now: DateTime<Utc>) -> Option<String> {
    let config = controller.config();

    // Held across the add so concurrent sweeps cannot both scale out
    let mut state = controller.autoscaler().lock().await;

    let utilization = controller.state().utilization().await;
    match evaluate_scaling(
        utilization,
        config.autoscale_threshold,
        &state,
        config.autoscale_cooldown_secs,
        now,
    ) {
        ScalingDecision::NoChange => None,
        ScalingDecision::ScaleOut { reason } => {
            debug!("Scaling out: {}", reason);
            let spec = autoscaled_node_spec(config.default_node_cpu, config.default_node_memory);
            let node = controller.add_autoscaled_node(spec).await;
            state.record_scale_up(now);
            Some(node.node_id)
        }
    }
}
