//! Command implementations for the CLI
//!
//! Client subcommands are thin wrappers over the control plane's HTTP API.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{Node, UtilizationSample};
use crate::metrics::ClusterStats;

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AddNodeBody {
    pub cpu: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_group: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LaunchPodBody {
    pub cpu_required: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_required: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling_algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_affinity: Option<String>,
}

/// `{"message": ...}` acknowledgement
#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AddNodeResponse {
    pub node_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LaunchPodResponse {
    pub pod_id: String,
    pub assigned_node: String,
    pub scheduling_algorithm: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveNodeResponse {
    pub message: String,
    #[serde(default)]
    pub rescheduled: Vec<(String, String)>,
    #[serde(default)]
    pub dropped: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NodesResponse {
    nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: Vec<UtilizationSample>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// HTTP Client for the control plane
// ============================================================================

/// Client for communicating with the control plane
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-2xx response into `CommandError::Server`
    async fn check(resp: reqwest::Response) -> CommandResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error)
            .unwrap_or(text);
        Err(CommandError::Server {
            status: status.as_u16(),
            message,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> CommandResult<T> {
        let resp = self.client.get(self.url(path)).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> CommandResult<T> {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Register a node
    pub async fn add_node(&self, body: &AddNodeBody) -> CommandResult<AddNodeResponse> {
        self.post("/api/add_node", body).await
    }

    /// Launch a pod
    pub async fn launch_pod(&self, body: &LaunchPodBody) -> CommandResult<LaunchPodResponse> {
        self.post("/api/launch_pod", body).await
    }

    /// List all nodes
    pub async fn list_nodes(&self) -> CommandResult<Vec<Node>> {
        let resp: NodesResponse = self.get("/api/list_nodes").await?;
        Ok(resp.nodes)
    }

    /// Remove a node
    pub async fn remove_node(&self, node_id: &str) -> CommandResult<RemoveNodeResponse> {
        self.post("/api/remove_node", &serde_json::json!({ "node_id": node_id }))
            .await
    }

    /// Send one heartbeat for a node
    pub async fn heartbeat(&self, node_id: &str) -> CommandResult<MessageResponse> {
        self.post("/api/heartbeat", &serde_json::json!({ "node_id": node_id }))
            .await
    }

    /// Enable or disable simulated heartbeats
    pub async fn toggle_simulation(&self, node_id: &str, simulate: bool) -> CommandResult<MessageResponse> {
        self.post(
            "/api/toggle_simulation",
            &serde_json::json!({ "node_id": node_id, "simulate": simulate }),
        )
        .await
    }

    /// Kill a random active node
    pub async fn chaos(&self) -> CommandResult<MessageResponse> {
        self.post("/api/chaos_monkey", &serde_json::json!({})).await
    }

    /// Cluster statistics
    pub async fn stats(&self) -> CommandResult<ClusterStats> {
        self.get("/api/cluster_stats").await
    }

    /// Recent event log
    pub async fn logs(&self) -> CommandResult<Vec<String>> {
        let resp: LogsResponse = self.get("/api/logs").await?;
        Ok(resp.logs)
    }

    /// Utilization history
    pub async fn history(&self) -> CommandResult<Vec<UtilizationSample>> {
        let resp: HistoryResponse = self.get("/api/utilization_history").await?;
        Ok(resp.history)
    }

    /// CSV report body
    pub async fn report(&self) -> CommandResult<String> {
        let resp = self.client.get(self.url("/api/download_report")).send().await?;
        Ok(Self::check(resp).await?.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ApiClient::new("http://localhost:5000/");
        assert_eq!(client.base_url(), "http://localhost:5000");
        assert_eq!(client.url("/api/logs"), "http://localhost:5000/api/logs");
    }

    #[test]
    fn test_launch_body_omits_defaults() {
        let body = LaunchPodBody {
            cpu_required: 2,
            memory_required: None,
            scheduling_algorithm: Some("worst_fit".to_string()),
            network_group: None,
            node_affinity: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "cpu_required": 2, "scheduling_algorithm": "worst_fit" })
        );
    }

    #[test]
    fn test_remove_response_parses_report() {
        let resp: RemoveNodeResponse = serde_json::from_str(
            r#"{"message":"Node n1 removed","rescheduled":[["pod_1","n2"]],"dropped":["pod_2"]}"#,
        )
        .unwrap();
        assert_eq!(resp.rescheduled, vec![("pod_1".to_string(), "n2".to_string())]);
        assert_eq!(resp.dropped, vec!["pod_2".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = ApiClient::new("http://127.0.0.1:1");
        assert!(matches!(client.logs().await, Err(CommandError::Http(_))));
    }
}
