//! Persistence mirror for cluster state
//!
//! The in-memory registry is authoritative while the process runs; a store
//! only mirrors it so state can be restored on the next start. Every write is
//! best effort: failures are reported to the caller, which logs them and moves
//! on without undoing anything.
//!
//! The writes of one registry mutation arrive together as a batch of
//! [`StoreOp`]s, in the order the mutations took the registry lock.

mod json_file;

pub use json_file::JsonFileStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::cluster::{Node, Pod, UtilizationSample};

/// Errors that can occur while mirroring state
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One mirrored write
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    SaveNode(Node),
    DeleteNode(String),
    SavePod { pod: Pod, node_id: String },
    AppendLog(String),
    AppendSample(UtilizationSample),
}

/// A pod row: the pod plus the node it currently lives on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRecord {
    pub node_id: String,
    #[serde(flatten)]
    pub pod: Pod,
}

/// Everything a store holds, as loaded at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Node rows keyed by node id (pod lists are kept in `pods`)
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,

    /// Pod rows keyed by pod id
    #[serde(default)]
    pub pods: BTreeMap<String, PodRecord>,

    /// Formatted event lines, oldest first
    #[serde(default)]
    pub event_logs: Vec<String>,

    #[serde(default)]
    pub utilization_history: Vec<UtilizationSample>,
}

impl PersistedState {
    fn save_node(&mut self, node: &Node) {
        self.nodes
            .insert(node.node_id.clone(), node.without_pods());
    }

    fn delete_node(&mut self, node_id: &str) {
        self.nodes.remove(node_id);
        self.pods.retain(|_, record| record.node_id != node_id);
    }

    fn save_pod(&mut self, pod: &Pod, node_id: &str) {
        self.pods.insert(
            pod.pod_id.clone(),
            PodRecord {
                node_id: node_id.to_string(),
                pod: pod.clone(),
            },
        );
    }

    fn apply(&mut self, op: &StoreOp) {
        match op {
            StoreOp::SaveNode(node) => self.save_node(node),
            StoreOp::DeleteNode(node_id) => self.delete_node(node_id),
            StoreOp::SavePod { pod, node_id } => self.save_pod(pod, node_id),
            StoreOp::AppendLog(line) => self.event_logs.push(line.clone()),
            StoreOp::AppendSample(sample) => self.utilization_history.push(*sample),
        }
    }

    fn trim_history(&mut self, limit: usize) {
        if self.event_logs.len() > limit {
            let excess = self.event_logs.len() - limit;
            self.event_logs.drain(..excess);
        }
        if self.utilization_history.len() > limit {
            let excess = self.utilization_history.len() - limit;
            self.utilization_history.drain(..excess);
        }
    }
}

/// Upsert/delete sink for the mirrored tables
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Upsert a node row (its pod list is ignored)
    async fn save_node(&self, node: &Node) -> Result<(), StoreError>;

    /// Delete a node row and every pod row still pointing at it
    async fn delete_node(&self, node_id: &str) -> Result<(), StoreError>;

    /// Upsert a pod row (also how a rescheduled pod is re-pointed)
    async fn save_pod(&self, pod: &Pod, node_id: &str) -> Result<(), StoreError>;

    async fn append_log(&self, line: &str) -> Result<(), StoreError>;

    async fn append_utilization(&self, sample: &UtilizationSample) -> Result<(), StoreError>;

    /// Load the full mirrored state
    async fn load(&self) -> Result<PersistedState, StoreError>;

    /// Apply the writes of one mutation in order.
    ///
    /// The default issues them row by row, keeps going past a failed row and
    /// returns the first error.
    async fn write_batch(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        let mut first_error = None;
        for op in ops {
            let result = match op {
                StoreOp::SaveNode(node) => self.save_node(node).await,
                StoreOp::DeleteNode(node_id) => self.delete_node(node_id).await,
                StoreOp::SavePod { pod, node_id } => self.save_pod(pod, node_id).await,
                StoreOp::AppendLog(line) => self.append_log(line).await,
                StoreOp::AppendSample(sample) => self.append_utilization(sample).await,
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Store that keeps its tables in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing rows (used to simulate a restart)
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn save_node(&self, node: &Node) -> Result<(), StoreError> {
        self.state.lock().await.save_node(node);
        Ok(())
    }

    async fn delete_node(&self, node_id: &str) -> Result<(), StoreError> {
        self.state.lock().await.delete_node(node_id);
        Ok(())
    }

    async fn save_pod(&self, pod: &Pod, node_id: &str) -> Result<(), StoreError> {
        self.state.lock().await.save_pod(pod, node_id);
        Ok(())
    }

    async fn append_log(&self, line: &str) -> Result<(), StoreError> {
        self.state.lock().await.event_logs.push(line.to_string());
        Ok(())
    }

    async fn append_utilization(&self, sample: &UtilizationSample) -> Result<(), StoreError> {
        self.state.lock().await.utilization_history.push(*sample);
        Ok(())
    }

    async fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(self.state.lock().await.clone())
    }

    async fn write_batch(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for op in ops {
            state.apply(op);
        }
        Ok(())
    }
}
