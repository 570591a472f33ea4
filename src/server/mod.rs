//! HTTP API server
//!
//! REST endpoints under `/api`, a `/ws` push channel and `/health`.

mod handlers;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cluster::{ClusterController, ClusterError};

/// Shared state for the API handlers
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<ClusterController>,
}

impl ApiState {
    pub fn new(controller: Arc<ClusterController>) -> Self {
        Self { controller }
    }
}

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        // Nodes
        .route("/api/add_node", post(handlers::add_node))
        .route("/api/list_nodes", get(handlers::list_nodes))
        .route("/api/remove_node", post(handlers::remove_node))
        .route("/api/heartbeat", post(handlers::heartbeat))
        .route("/api/toggle_simulation", post(handlers::toggle_simulation))
        // Pods
        .route("/api/launch_pod", post(handlers::launch_pod))
        // Chaos, stats and reports
        .route("/api/chaos_monkey", post(handlers::chaos_monkey))
        .route("/api/cluster_stats", get(handlers::cluster_stats))
        .route("/api/download_report", get(handlers::download_report))
        .route("/api/logs", get(handlers::logs))
        .route("/api/utilization_history", get(handlers::utilization_history))
        // Push channel
        .route("/ws", get(handlers::ws_handler))
        // Health check
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Responses
// ============================================================================

/// Generic success body
#[derive(Debug, Serialize)]
pub struct OperationStatus {
    pub message: String,
}

impl OperationStatus {
    pub fn ok() -> Self {
        Self::message("OK")
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error body: `{"error": ..., "kind": ...}`
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// A cluster error on its way to the client
#[derive(Debug)]
pub struct ApiError(pub ClusterError);

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError(ClusterError::InvalidArgument(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            ClusterError::InvalidArgument(_) | ClusterError::NoCapacity(_) => {
                StatusCode::BAD_REQUEST
            }
            ClusterError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (self.status(), Json(body)).into_response()
    }
}
