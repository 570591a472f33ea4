//! Container lifecycle for node backing processes
//!
//! A node can be backed by a container running `clustersim agent`, which
//! posts real heartbeats for it. The cluster never depends on containers:
//! start and stop failures are logged and the node stays simulated-only.

pub mod docker;

pub use docker::{DockerConfig, DockerRuntime};

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while managing node containers
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Container runtime not available: {0}")]
    NotAvailable(String),

    #[error("docker {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to run docker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What a node container needs to know about its node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    pub node_id: String,
    pub cpu: u32,
    pub memory_gb: u32,
    pub network_group: String,
    /// Auto-scaled nodes get a self-removing, labelled container
    pub autoscaled: bool,
}

/// Starts and stops node containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a container for the node; returns the full container id
    async fn start_node(&self, request: &ContainerRequest) -> Result<String, ContainerError>;

    /// Stop (and remove) a container
    async fn stop_node(&self, container_id: &str) -> Result<(), ContainerError>;

    /// Whether containers are actually launched
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Runtime used when docker is absent or disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRuntime;

#[async_trait]
impl ContainerRuntime for DisabledRuntime {
    async fn start_node(&self, _request: &ContainerRequest) -> Result<String, ContainerError> {
        Err(ContainerError::NotAvailable(
            "container launches are disabled".to_string(),
        ))
    }

    async fn stop_node(&self, _container_id: &str) -> Result<(), ContainerError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// First 12 characters of a container id, as docker prints it
pub fn short_id(container_id: &str) -> &str {
    container_id.get(..12).unwrap_or(container_id)
}
