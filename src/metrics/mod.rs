//! Cluster utilization metrics
//!
//! Utilization is derived from claimed capacity, not from any real load: a
//! node's CPU is "used" by the pods placed on it.

use serde::{Deserialize, Serialize};

use crate::cluster::Node;

/// CPU utilization ratio in `[0, 1]` over active nodes.
///
/// `Σ(cpu_total - cpu_available) / Σ cpu_total`; 0 when no active node has
/// any capacity.
pub fn cpu_utilization<'a, I>(nodes: I) -> f64
where
    I: IntoIterator<Item = &'a Node>,
{
    let (used, total) = nodes
        .into_iter()
        .filter(|n| n.is_active())
        .fold((0u64, 0u64), |(used, total), n| {
            (used + n.cpu_used() as u64, total + n.cpu_total as u64)
        });

    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}

/// Memory utilization ratio in `[0, 1]` over active nodes
pub fn memory_utilization<'a, I>(nodes: I) -> f64
where
    I: IntoIterator<Item = &'a Node>,
{
    let (used, total) = nodes
        .into_iter()
        .filter(|n| n.is_active())
        .fold((0u64, 0u64), |(used, total), n| {
            let node_used = n.memory_total.saturating_sub(n.memory_available);
            (used + node_used as u64, total + n.memory_total as u64)
        });

    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}

/// Convert a ratio to a percentage rounded to two decimals
pub fn to_percent(ratio: f64) -> f64 {
    (ratio * 10_000.0).round() / 100.0
}

/// Summary returned by the stats endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    /// All registered nodes, failed ones included
    pub total_nodes: usize,
    pub total_pods: usize,
    /// CPU utilization percentage over active nodes, two decimals
    pub utilization: f64,
}

impl ClusterStats {
    pub fn from_nodes(nodes: &[Node]) -> Self {
        Self {
            total_nodes: nodes.len(),
            total_pods: nodes.iter().map(|n| n.pods.len()).sum(),
            utilization: to_percent(cpu_utilization(nodes)),
        }
    }
}
