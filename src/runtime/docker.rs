//! Docker-backed node containers
//!
//! Every node container runs `clustersim agent` on a per-group bridge network
//! (`net_<group>`), limited to the node's CPU and memory capacity.

use async_trait::async_trait;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use super::{ContainerError, ContainerRequest, ContainerRuntime};
use crate::cluster::SIMULATED_HEARTBEAT_INTERVAL_SECS;

/// Docker settings for node containers
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DockerConfig {
    /// Launch containers at all (the server also checks that docker responds)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Image that contains the `clustersim` binary
    #[serde(default = "default_image")]
    pub image: String,

    /// Control plane URL as seen from inside a container
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Heartbeat interval passed to the agent
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_image() -> String {
    "node-simulator:latest".to_string()
}

fn default_server_url() -> String {
    "http://host.docker.internal:5000".to_string()
}

fn default_heartbeat_interval() -> u64 {
    SIMULATED_HEARTBEAT_INTERVAL_SECS
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            image: default_image(),
            server_url: default_server_url(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

// ============================================================================
// Pure argument builders (no I/O)
// ============================================================================

/// Bridge network a group's containers join
pub fn network_name(group: &str) -> String {
    format!("net_{}", group)
}

/// Container name for a node
pub fn container_name(node_id: &str) -> String {
    format!("node_{}", node_id)
}

pub fn generate_network_inspect_args(network: &str) -> Vec<String> {
    vec![
        "network".to_string(),
        "inspect".to_string(),
        network.to_string(),
    ]
}

pub fn generate_network_create_args(network: &str) -> Vec<String> {
    vec![
        "network".to_string(),
        "create".to_string(),
        "--driver".to_string(),
        "bridge".to_string(),
        network.to_string(),
    ]
}

/// Generate `docker run` arguments for a node container
pub fn generate_run_args(config: &DockerConfig, request: &ContainerRequest) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        container_name(&request.node_id),
        "--network".to_string(),
        network_name(&request.network_group),
        "--cpus".to_string(),
        request.cpu.to_string(),
        "--memory".to_string(),
        format!("{}g", request.memory_gb),
        "--label".to_string(),
        format!("sim-node={}", request.node_id),
    ];

    if request.autoscaled {
        args.push("--label".to_string());
        args.push("autoscaled=true".to_string());
        args.push("--rm".to_string());
    }

    // Reach the host from inside the bridge network on Linux too
    args.push("--add-host".to_string());
    args.push("host.docker.internal:host-gateway".to_string());

    args.push(config.image.clone());

    args.extend([
        "clustersim".to_string(),
        "agent".to_string(),
        "--server".to_string(),
        config.server_url.clone(),
        "--node-id".to_string(),
        request.node_id.clone(),
        "--interval".to_string(),
        config.heartbeat_interval_secs.to_string(),
    ]);

    args
}

pub fn generate_stop_args(container_id: &str) -> Vec<String> {
    vec!["stop".to_string(), container_id.to_string()]
}

pub fn generate_rm_args(container_id: &str) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), container_id.to_string()]
}

// ============================================================================
// Runtime
// ============================================================================

/// Runs node containers through the docker CLI
#[derive(Debug)]
pub struct DockerRuntime {
    config: DockerConfig,
    /// Networks already ensured by this process
    networks: DashSet<String>,
}

impl DockerRuntime {
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config,
            networks: DashSet::new(),
        }
    }

    /// Build a runtime if the docker daemon answers
    pub async fn detect(config: DockerConfig) -> Result<Self, ContainerError> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        let version = run_docker(&args)
            .await
            .map_err(|e| ContainerError::NotAvailable(e.to_string()))?;
        info!("Docker available (server {})", version.trim());
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    async fn ensure_network(&self, group: &str) -> Result<String, ContainerError> {
        let network = network_name(group);
        if self.networks.contains(&network) {
            return Ok(network);
        }

        if run_docker(&generate_network_inspect_args(&network)).await.is_err() {
            debug!("Creating docker network {}", network);
            run_docker(&generate_network_create_args(&network)).await?;
        }

        self.networks.insert(network.clone());
        Ok(network)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start_node(&self, request: &ContainerRequest) -> Result<String, ContainerError> {
        self.ensure_network(&request.network_group).await?;

        let args = generate_run_args(&self.config, request);
        debug!("Docker run args: {:?}", args);

        let stdout = run_docker(&args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn stop_node(&self, container_id: &str) -> Result<(), ContainerError> {
        run_docker(&generate_stop_args(container_id)).await?;
        // Auto-removed containers are already gone after stop
        let _ = run_docker(&generate_rm_args(container_id)).await;
        Ok(())
    }
}

/// Run one docker command and return its stdout
async fn run_docker(args: &[String]) -> Result<String, ContainerError> {
    let output = Command::new("docker").args(args).output().await?;

    if !output.status.success() {
        return Err(ContainerError::CommandFailed {
            command: args.first().cloned().unwrap_or_default(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(autoscaled: bool) -> ContainerRequest {
        ContainerRequest {
            node_id: "abc".to_string(),
            cpu: 4,
            memory_gb: 8,
            network_group: "isolated".to_string(),
            autoscaled,
        }
    }

    #[test]
    fn test_generate_run_args() {
        let args = generate_run_args(&DockerConfig::default(), &request(false));

        assert_eq!(&args[..4], &["run", "-d", "--name", "node_abc"]);
        assert!(args.windows(2).any(|w| w == ["--network", "net_isolated"]));
        assert!(args.windows(2).any(|w| w == ["--cpus", "4"]));
        assert!(args.windows(2).any(|w| w == ["--memory", "8g"]));
        assert!(args.windows(2).any(|w| w == ["--label", "sim-node=abc"]));
        assert!(!args.contains(&"--rm".to_string()));
        assert!(!args.contains(&"autoscaled=true".to_string()));

        let image_pos = args.iter().position(|a| a == "node-simulator:latest").unwrap();
        assert_eq!(
            &args[image_pos + 1..],
            &[
                "clustersim",
                "agent",
                "--server",
                "http://host.docker.internal:5000",
                "--node-id",
                "abc",
                "--interval",
                "7"
            ]
        );
    }

    #[test]
    fn test_autoscaled_containers_are_labelled_and_removed() {
        let args = generate_run_args(&DockerConfig::default(), &request(true));
        assert!(args.windows(2).any(|w| w == ["--label", "autoscaled=true"]));
        assert!(args.contains(&"--rm".to_string()));
    }

    #[test]
    fn test_network_args() {
        assert_eq!(network_name("default"), "net_default");
        assert_eq!(
            generate_network_create_args("net_default"),
            vec!["network", "create", "--driver", "bridge", "net_default"]
        );
        assert_eq!(
            generate_network_inspect_args("net_default"),
            vec!["network", "inspect", "net_default"]
        );
    }

    #[test]
    fn test_generate_stop_args() {
        assert_eq!(generate_stop_args("c1"), vec!["stop", "c1"]);
        assert_eq!(generate_rm_args("c1"), vec!["rm", "-f", "c1"]);
    }

    #[test]
    fn test_config_defaults_from_yaml() {
        let config: DockerConfig = serde_yaml::from_str("image: custom:1").unwrap();
        assert_eq!(config.image, "custom:1");
        assert!(config.enabled);
        assert_eq!(config.heartbeat_interval_secs, 7);
    }
}
