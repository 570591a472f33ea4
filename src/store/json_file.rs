//! Store that mirrors the tables into a single JSON file

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ClusterStore, PersistedState, StoreError, StoreOp};
use crate::cluster::{Node, Pod, UtilizationSample};

/// Maximum number of log lines and utilization samples kept in the file
const FILE_HISTORY_LIMIT: usize = 1000;

/// JSON file store.
///
/// Rows are held in memory and the whole document is rewritten once per
/// write call (write to a sibling temp file, then rename), so a crash
/// mid-write leaves the previous version intact. A batch is one rewrite.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
    writes: AtomicU64,
}

impl JsonFileStore {
    /// Open the store, loading existing rows when the file exists
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => PersistedState::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(
            "Opened state file {} ({} nodes, {} pods)",
            path.display(),
            state.nodes.len(),
            state.pods.len()
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
            writes: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of times the file has been rewritten since opening
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    async fn mutate<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut PersistedState),
    {
        let mut state = self.state.lock().await;
        f(&mut state);
        state.trim_history(FILE_HISTORY_LIMIT);

        let content = serde_json::to_vec_pretty(&*state)?;
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for JsonFileStore {
    async fn save_node(&self, node: &Node) -> Result<(), StoreError> {
        self.mutate(|s| s.save_node(node)).await
    }

    async fn delete_node(&self, node_id: &str) -> Result<(), StoreError> {
        self.mutate(|s| s.delete_node(node_id)).await
    }

    async fn save_pod(&self, pod: &Pod, node_id: &str) -> Result<(), StoreError> {
        self.mutate(|s| s.save_pod(pod, node_id)).await
    }

    async fn append_log(&self, line: &str) -> Result<(), StoreError> {
        self.mutate(|s| s.event_logs.push(line.to_string())).await
    }

    async fn append_utilization(&self, sample: &UtilizationSample) -> Result<(), StoreError> {
        self.mutate(|s| s.utilization_history.push(*sample)).await
    }

    async fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(self.state.lock().await.clone())
    }

    async fn write_batch(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        self.mutate(|s| {
            for op in ops {
                s.apply(op);
            }
        })
        .await
    }
}
