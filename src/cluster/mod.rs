//! # Cluster state engine
//!
//! The simulated control plane: a registry of nodes and their pods, three
//! placement policies, a heartbeat-based health state machine, failover
//! rescheduling, an auto-scaler and a chaos injector.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ClusterController                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ ClusterState │  │ BroadcastHub │  │ ContainerRuntime   │  │
//! │  │ (RwLock)     │  │ (ws fan-out) │  │ (docker / none)    │  │
//! │  └──────┬───────┘  └──────────────┘  └────────────────────┘  │
//! │         │ mirror (after lock release)                         │
//! │         ▼                                                     │
//! │  ┌──────────────┐                                             │
//! │  │ ClusterStore │                                             │
//! │  └──────────────┘                                             │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲            ▲             ▲            ▲           ▲
//!   health sweep  heartbeat sim  autoscaler  utilization  publisher
//! ```
//!
//! Every background loop holds an `Arc<ClusterController>`, exposes a
//! single-sweep function and stops on a `watch` shutdown signal.

pub mod autoscaler;
pub mod chaos;
pub mod controller;
pub mod events;
pub mod failover;
pub mod health_monitor;
pub mod heartbeat;
pub mod node;
pub mod placement;
pub mod pod;
pub mod publisher;
pub mod registry;
pub mod tasks;

pub use autoscaler::{AutoscalerState, ScalingDecision};
pub use controller::{ClusterController, ControllerConfig};
pub use events::{format_event, BoundedLog, UtilizationSample};
pub use failover::RescheduleReport;
pub use heartbeat::{spawn_heartbeat, HeartbeatClient, HeartbeatConfig, HeartbeatError};
pub use node::{Node, NodeSpec, NodeStatus, NodeType};
pub use placement::{select_node, SchedulingAlgorithm};
pub use pod::{Pod, PodIdAllocator};
pub use publisher::{BroadcastHub, ClusterMessage};
pub use registry::{ClusterSnapshot, ClusterState, RestoreSummary};

use thiserror::Error;

/// Network group assigned when none is requested
pub const DEFAULT_NETWORK_GROUP: &str = "default";

/// Groups the auto-scaler picks from
pub const AUTOSCALE_NETWORK_GROUPS: [&str; 2] = ["default", "isolated"];

/// Default capacity of a node (CPU units)
pub const DEFAULT_NODE_CPU: u32 = 8;

/// Default capacity of a node (GB)
pub const DEFAULT_NODE_MEMORY: u32 = 16;

/// Default pod memory requirement (GB)
pub const DEFAULT_POD_MEMORY: u32 = 4;

/// Maximum number of event lines and utilization samples kept in memory
pub const EVENT_LOG_CAPACITY: usize = 50;

/// Seconds without a heartbeat before a node is marked failed
pub const HEARTBEAT_THRESHOLD_SECS: u64 = 15;

/// Health sweep period
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 5;

/// Heartbeat simulator period (also the agent's default interval)
pub const SIMULATED_HEARTBEAT_INTERVAL_SECS: u64 = 7;

/// Auto-scaler period
pub const AUTOSCALE_INTERVAL_SECS: u64 = 5;

/// Utilization ratio at which the auto-scaler adds a node
pub const AUTOSCALE_THRESHOLD: f64 = 0.8;

/// Minimum seconds between two scale-outs
pub const AUTOSCALE_COOLDOWN_SECS: u64 = 60;

/// Utilization sampler period
pub const UTILIZATION_SAMPLE_INTERVAL_SECS: u64 = 10;

/// Periodic state broadcast period
pub const PUBLISH_INTERVAL_SECS: u64 = 3;

/// Errors returned by cluster operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// Missing or malformed required field; nothing was mutated
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown node or pod id; nothing was mutated
    #[error("Not found: {0}")]
    NotFound(String),

    /// No eligible node; the pod was dropped
    #[error("No capacity: {0}")]
    NoCapacity(String),
}

impl ClusterError {
    /// Stable machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterError::InvalidArgument(_) => "invalid_argument",
            ClusterError::NotFound(_) => "not_found",
            ClusterError::NoCapacity(_) => "no_capacity",
        }
    }

    pub(crate) fn node_not_found(node_id: &str) -> Self {
        ClusterError::NotFound(format!("node '{}' not found", node_id))
    }
}
