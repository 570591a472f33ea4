//! Node resource - a simulated machine in the cluster
//!
//! A Node is a machine that can host pods. Each Node:
//! - Advertises a fixed CPU and memory capacity
//! - Belongs to a network group that pods must match
//! - Sends (or has simulated) heartbeats to stay active
//! - Optionally runs a backing container

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pod::Pod;
use super::ClusterError;

/// Hardware profile of a node, usable as a pod affinity constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[default]
    Balanced,
    HighCpu,
    HighMem,
}

impl NodeType {
    pub const ALL: [NodeType; 3] = [NodeType::HighCpu, NodeType::HighMem, NodeType::Balanced];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Balanced => "balanced",
            NodeType::HighCpu => "high_cpu",
            NodeType::HighMem => "high_mem",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(NodeType::Balanced),
            "high_cpu" => Ok(NodeType::HighCpu),
            "high_mem" => Ok(NodeType::HighMem),
            other => Err(ClusterError::InvalidArgument(format!(
                "unknown node type '{}'",
                other
            ))),
        }
    }
}

/// Liveness state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Node is heartbeating and accepts pods
    #[default]
    Active,
    /// Node missed its heartbeat window or was killed
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capacity and placement attributes requested for a new node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub cpu: u32,
    pub memory: u32,
    pub node_type: NodeType,
    pub network_group: String,
}

impl NodeSpec {
    pub fn new(cpu: u32, memory: u32) -> Self {
        Self {
            cpu,
            memory,
            node_type: NodeType::default(),
            network_group: super::DEFAULT_NETWORK_GROUP.to_string(),
        }
    }

    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.network_group = group.into();
        self
    }
}

/// A Node in the simulated cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier (UUID v4)
    pub node_id: String,

    /// Total CPU units
    pub cpu_total: u32,

    /// CPU units not claimed by placed pods
    pub cpu_available: u32,

    /// Total memory in GB
    pub memory_total: u32,

    /// Memory in GB not claimed by placed pods
    pub memory_available: u32,

    pub node_type: NodeType,

    /// Hard placement constraint: pods only land on nodes of their group
    pub network_group: String,

    pub status: NodeStatus,

    /// Last heartbeat received (or simulated) for this node
    pub last_heartbeat: DateTime<Utc>,

    /// Whether the heartbeat simulator keeps this node alive
    pub simulate_heartbeat: bool,

    /// Pods placed on this node, in placement order
    #[serde(default)]
    pub pods: Vec<Pod>,

    /// Backing container, when one was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

impl Node {
    /// Create an active node with all capacity available
    pub fn new(node_id: impl Into<String>, spec: &NodeSpec, now: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            cpu_total: spec.cpu,
            cpu_available: spec.cpu,
            memory_total: spec.memory,
            memory_available: spec.memory,
            node_type: spec.node_type,
            network_group: spec.network_group.clone(),
            status: NodeStatus::Active,
            last_heartbeat: now,
            simulate_heartbeat: true,
            pods: Vec::new(),
            container_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Whether the node has not heartbeated for longer than `threshold_secs`
    pub fn is_stale(&self, now: DateTime<Utc>, threshold_secs: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() > threshold_secs
    }

    /// Whether `pod` fits in the currently available resources
    pub fn has_room_for(&self, pod: &Pod) -> bool {
        self.cpu_available >= pod.cpu && self.memory_available >= pod.memory
    }

    /// Append a pod and claim its resources.
    ///
    /// Callers must check eligibility first; the subtraction saturates so the
    /// `available <= total` bound holds even if they don't.
    pub fn place(&mut self, pod: Pod) {
        debug_assert!(self.has_room_for(&pod));
        self.cpu_available = self.cpu_available.saturating_sub(pod.cpu);
        self.memory_available = self.memory_available.saturating_sub(pod.memory);
        self.pods.push(pod);
    }

    /// Recompute available resources from the placed pod list
    pub fn recompute_available(&mut self) {
        let cpu_used: u32 = self.pods.iter().map(|p| p.cpu).sum();
        let mem_used: u32 = self.pods.iter().map(|p| p.memory).sum();
        self.cpu_available = self.cpu_total.saturating_sub(cpu_used);
        self.memory_available = self.memory_total.saturating_sub(mem_used);
    }

    /// CPU units claimed by placed pods
    pub fn cpu_used(&self) -> u32 {
        self.cpu_total - self.cpu_available
    }

    /// Copy of this node without its pod list (the shape mirrored to the nodes table)
    pub fn without_pods(&self) -> Node {
        Node {
            pods: Vec::new(),
            ..self.clone()
        }
    }
}
