//! Heartbeat client for node agents
//!
//! This is the process a node's backing container runs: it periodically tells
//! the control plane that the node is alive.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::SIMULATED_HEARTBEAT_INTERVAL_SECS;

/// Configuration for the heartbeat client
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Control plane URL (e.g., "http://localhost:5000")
    pub server_url: String,

    /// Id of the node this agent speaks for
    pub node_id: String,

    /// Heartbeat interval in seconds (default: 7)
    pub interval_secs: u64,

    /// Consecutive failures before logging at error level
    pub max_retries: u32,
}

impl HeartbeatConfig {
    pub fn new(server_url: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            node_id: node_id.into(),
            interval_secs: SIMULATED_HEARTBEAT_INTERVAL_SECS,
            max_retries: 3,
        }
    }

    /// Set the heartbeat interval
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    fn heartbeat_url(&self) -> String {
        format!("{}/api/heartbeat", self.server_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct HeartbeatBody<'a> {
    node_id: &'a str,
}

/// Heartbeat client that runs as a background task
pub struct HeartbeatClient {
    config: HeartbeatConfig,
    http_client: Client,
}

impl HeartbeatClient {
    pub fn new(config: HeartbeatConfig) -> Result<Self, HeartbeatError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Run the heartbeat loop until the shutdown signal is received.
    ///
    /// The first heartbeat is sent immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        let mut consecutive_failures = 0u32;

        info!(
            "Starting heartbeat client: node={}, server={}, interval={}s",
            self.config.node_id, self.config.server_url, self.config.interval_secs
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.send_heartbeat().await {
                        Ok(()) => {
                            if consecutive_failures > 0 {
                                info!("Heartbeat recovered after {} failures", consecutive_failures);
                            }
                            consecutive_failures = 0;
                            debug!("Heartbeat sent for {}", self.config.node_id);
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            if consecutive_failures >= self.config.max_retries {
                                error!(
                                    "Heartbeat failed {} consecutive times: {}",
                                    consecutive_failures, e
                                );
                            } else {
                                warn!("Heartbeat failed (attempt {}): {}", consecutive_failures, e);
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Heartbeat client shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Send a single heartbeat to the control plane
    pub async fn send_heartbeat(&self) -> Result<(), HeartbeatError> {
        let response = self
            .http_client
            .post(self.config.heartbeat_url())
            .json(&HeartbeatBody {
                node_id: &self.config.node_id,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status_code = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HeartbeatError::ServerError {
                status: status_code.as_u16(),
                message: body,
            });
        }

        Ok(())
    }
}

/// Errors that can occur during heartbeat
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },
}

/// Spawn the heartbeat client as a background task
///
/// Returns a shutdown sender that can be used to stop the heartbeat loop.
pub fn spawn_heartbeat(config: HeartbeatConfig) -> Result<watch::Sender<bool>, HeartbeatError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let client = HeartbeatClient::new(config)?;

    tokio::spawn(async move {
        client.run(shutdown_rx).await;
    });

    Ok(shutdown_tx)
}
