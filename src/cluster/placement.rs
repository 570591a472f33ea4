//! Placement engine: chooses a node for a pod
//!
//! Pure functions over a node listing. The registry calls these under its lock
//! and applies the result, so selection and mutation are one atomic step.
//!
//! Nodes are iterated in ascending node-id order (the registry keeps them in an
//! ordered map), so every algorithm breaks ties toward the smallest id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::node::Node;
use super::pod::Pod;
use super::ClusterError;

/// Rule used to pick among eligible nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingAlgorithm {
    /// First eligible node
    #[default]
    FirstFit,
    /// Node left with the least combined CPU + memory slack
    BestFit,
    /// Node with the most combined CPU + memory available
    WorstFit,
}

impl SchedulingAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingAlgorithm::FirstFit => "first_fit",
            SchedulingAlgorithm::BestFit => "best_fit",
            SchedulingAlgorithm::WorstFit => "worst_fit",
        }
    }
}

impl fmt::Display for SchedulingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulingAlgorithm {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first_fit" => Ok(SchedulingAlgorithm::FirstFit),
            "best_fit" => Ok(SchedulingAlgorithm::BestFit),
            "worst_fit" => Ok(SchedulingAlgorithm::WorstFit),
            other => Err(ClusterError::InvalidArgument(format!(
                "unknown scheduling algorithm '{}'",
                other
            ))),
        }
    }
}

/// Eligibility filter, checked in order: active, CPU, memory, group, affinity
pub fn is_eligible(node: &Node, pod: &Pod) -> bool {
    node.is_active()
        && node.cpu_available >= pod.cpu
        && node.memory_available >= pod.memory
        && node.network_group == pod.network_group
        && pod.node_affinity.map_or(true, |t| node.node_type == t)
}

/// Combined slack left on `node` after placing `pod` (node must be eligible)
fn leftover_slack(node: &Node, pod: &Pod) -> u64 {
    (node.cpu_available - pod.cpu) as u64 + (node.memory_available - pod.memory) as u64
}

/// Combined room currently available on `node`
fn roominess(node: &Node) -> u64 {
    node.cpu_available as u64 + node.memory_available as u64
}

/// Choose the target node for `pod`, or `None` when nothing is eligible
pub fn select_node<'a, I>(nodes: I, pod: &Pod, algorithm: SchedulingAlgorithm) -> Option<&'a Node>
where
    I: IntoIterator<Item = &'a Node>,
{
    let mut eligible = nodes.into_iter().filter(|n| is_eligible(n, pod));

    match algorithm {
        SchedulingAlgorithm::FirstFit => eligible.next(),
        // min_by_key keeps the first of equal minima
        SchedulingAlgorithm::BestFit => eligible.min_by_key(|n| leftover_slack(n, pod)),
        // strict comparison keeps the first of equal maxima
        SchedulingAlgorithm::WorstFit => {
            eligible.reduce(|best, n| if roominess(n) > roominess(best) { n } else { best })
        }
    }
}
