use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{ApiError, ApiState, OperationStatus};
use crate::cluster::controller::PodRequest;
use crate::cluster::{
    ClusterMessage, Node, NodeSpec, NodeType, RescheduleReport, SchedulingAlgorithm,
    UtilizationSample, DEFAULT_NETWORK_GROUP,
};

// ============================================================================
// Request bodies
// ============================================================================

/// Body of `POST /api/add_node`
#[derive(Debug, Default, Deserialize)]
pub struct AddNodeRequest {
    pub cpu: Option<u32>,
    pub memory: Option<u32>,
    pub node_type: Option<String>,
    pub network_group: Option<String>,
}

/// Body of `POST /api/launch_pod`
#[derive(Debug, Default, Deserialize)]
pub struct LaunchPodRequest {
    pub cpu_required: Option<u32>,
    pub memory_required: Option<u32>,
    pub scheduling_algorithm: Option<String>,
    pub network_group: Option<String>,
    pub node_affinity: Option<String>,
}

/// Body of the endpoints that address one node
#[derive(Debug, Default, Deserialize)]
pub struct NodeIdRequest {
    pub node_id: Option<String>,
}

/// Body of `POST /api/toggle_simulation`
#[derive(Debug, Default, Deserialize)]
pub struct ToggleSimulationRequest {
    pub node_id: Option<String>,
    pub simulate: Option<bool>,
}

// ============================================================================
// Response bodies
// ============================================================================

#[derive(Debug, Serialize)]
struct AddNodeResponse {
    message: String,
    node_id: String,
}

#[derive(Debug, Serialize)]
struct LaunchPodResponse {
    message: String,
    pod_id: String,
    assigned_node: String,
    scheduling_algorithm: SchedulingAlgorithm,
}

#[derive(Debug, Serialize)]
struct RemoveNodeResponse {
    message: String,
    #[serde(flatten)]
    report: RescheduleReport,
}

#[derive(Debug, Serialize)]
struct NodesResponse {
    nodes: Vec<Node>,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    logs: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    history: Vec<UtilizationSample>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Unwrap a JSON body, turning malformed input into `InvalidArgument`
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::invalid(e.body_text()))
}

fn required_node_id(node_id: Option<String>) -> Result<String, ApiError> {
    match node_id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(ApiError::invalid("Missing node_id")),
    }
}

fn group_or_default(group: Option<String>) -> String {
    group
        .filter(|g| !g.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_NETWORK_GROUP.to_string())
}

// ============================================================================
// Health
// ============================================================================

pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

// ============================================================================
// Nodes
// ============================================================================

pub async fn add_node(
    State(state): State<ApiState>,
    payload: Result<Json<AddNodeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let cpu = req.cpu.ok_or_else(|| ApiError::invalid("Missing cpu"))?;
    let node_type = match req.node_type {
        Some(t) => t.parse::<NodeType>()?,
        None => NodeType::default(),
    };

    let config = state.controller.config();
    let spec = NodeSpec::new(cpu, req.memory.unwrap_or(config.default_node_memory))
        .with_type(node_type)
        .with_group(group_or_default(req.network_group));

    let node = state.controller.add_node(spec).await;
    Ok(Json(AddNodeResponse {
        message: "Node added".to_string(),
        node_id: node.node_id,
    }))
}

pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    Json(NodesResponse {
        nodes: state.controller.state().nodes().await,
    })
}

pub async fn remove_node(
    State(state): State<ApiState>,
    payload: Result<Json<NodeIdRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let node_id = required_node_id(body(payload)?.node_id)?;
    let report = state.controller.remove_node(&node_id).await?;
    Ok(Json(RemoveNodeResponse {
        message: format!("Node {} removed", node_id),
        report,
    }))
}

pub async fn heartbeat(
    State(state): State<ApiState>,
    payload: Result<Json<NodeIdRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let node_id = required_node_id(body(payload)?.node_id)?;
    state.controller.heartbeat(&node_id).await?;
    Ok(Json(OperationStatus::ok()))
}

pub async fn toggle_simulation(
    State(state): State<ApiState>,
    payload: Result<Json<ToggleSimulationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let node_id = required_node_id(req.node_id)?;
    state
        .controller
        .toggle_simulation(&node_id, req.simulate.unwrap_or(false))
        .await?;
    Ok(Json(OperationStatus::ok()))
}

// ============================================================================
// Pods
// ============================================================================

pub async fn launch_pod(
    State(state): State<ApiState>,
    payload: Result<Json<LaunchPodRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let cpu = req
        .cpu_required
        .ok_or_else(|| ApiError::invalid("Missing cpu_required"))?;
    let algorithm = match req.scheduling_algorithm {
        Some(a) => a.parse::<SchedulingAlgorithm>()?,
        None => SchedulingAlgorithm::default(),
    };
    let affinity = req
        .node_affinity
        .filter(|a| !a.trim().is_empty())
        .map(|a| a.parse::<NodeType>())
        .transpose()?;

    let memory = req
        .memory_required
        .unwrap_or(state.controller.config().default_pod_memory);
    let request = PodRequest::new(cpu, memory)
        .with_algorithm(algorithm)
        .with_group(group_or_default(req.network_group))
        .with_affinity(affinity);

    let placement = state.controller.launch_pod(request).await?;
    Ok(Json(LaunchPodResponse {
        message: "Pod launched".to_string(),
        pod_id: placement.pod_id,
        assigned_node: placement.assigned_node,
        scheduling_algorithm: placement.scheduling_algorithm,
    }))
}

// ============================================================================
// Chaos, stats and reports
// ============================================================================

pub async fn chaos_monkey(State(state): State<ApiState>) -> impl IntoResponse {
    Json(OperationStatus::message(state.controller.trigger_chaos().await))
}

pub async fn cluster_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.controller.cluster_stats().await)
}

pub async fn download_report(State(state): State<ApiState>) -> impl IntoResponse {
    let csv = state.controller.report_csv().await;
    (
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"cluster_report.csv\"",
            ),
        ],
        csv,
    )
}

pub async fn logs(State(state): State<ApiState>) -> impl IntoResponse {
    Json(LogsResponse {
        logs: state.controller.state().logs().await,
    })
}

pub async fn utilization_history(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HistoryResponse {
        history: state.controller.state().history().await,
    })
}

// ============================================================================
// Push channel
// ============================================================================

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_updates(socket, state))
}

/// Send the current snapshot, then forward every broadcast until either side closes
async fn stream_updates(mut socket: WebSocket, state: ApiState) {
    // Subscribe first so nothing published after the snapshot is missed
    let mut rx = state.controller.hub().subscribe();
    let initial = ClusterMessage::StateUpdate(state.controller.state().snapshot().await);
    if send_message(&mut socket, &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(message) => {
                    if send_message(&mut socket, &message).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("WebSocket subscriber lagged, skipped {} messages", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("WebSocket subscriber disconnected");
}

async fn send_message(socket: &mut WebSocket, message: &ClusterMessage) -> Result<(), ()> {
    let text = message.to_json().map_err(|e| {
        warn!("Failed to encode cluster message: {}", e);
    })?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| debug!("WebSocket send failed: {}", e))
}
