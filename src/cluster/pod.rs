//! Pod resource - a unit of work placed on exactly one node

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::node::NodeType;

/// A pod with its resource requirements.
///
/// A pod that has not been placed yet is *pending*; it only lives in the
/// caller's hands and is never mirrored to the store. Once placed it is owned
/// by exactly one node's pod list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Identifier of the form `pod_<n>`
    pub pod_id: String,

    /// Required CPU units
    pub cpu: u32,

    /// Required memory in GB
    pub memory: u32,

    /// Must equal the hosting node's group
    pub network_group: String,

    /// Optional node type the pod must land on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_affinity: Option<NodeType>,

    /// Simulated usage counter, not enforced
    #[serde(default)]
    pub cpu_usage: u32,
}

impl Pod {
    pub fn new(pod_id: impl Into<String>, cpu: u32, memory: u32, group: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            cpu,
            memory,
            network_group: group.into(),
            node_affinity: None,
            cpu_usage: 0,
        }
    }

    pub fn with_affinity(mut self, affinity: Option<NodeType>) -> Self {
        self.node_affinity = affinity;
        self
    }

    /// Numeric part of a `pod_<n>` identifier
    pub fn sequence(&self) -> Option<u64> {
        self.pod_id.strip_prefix("pod_")?.parse().ok()
    }
}

/// Hands out process-unique pod identifiers.
///
/// Independent of the registry lock so concurrent admissions never collide.
#[derive(Debug, Default)]
pub struct PodIdAllocator {
    counter: AtomicU64,
}

impl PodIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("pod_{}", n)
    }

    /// Make sure future identifiers come after `seen` (used after a restore)
    pub fn advance_past(&self, seen: u64) {
        self.counter.fetch_max(seen, Ordering::SeqCst);
    }
}
