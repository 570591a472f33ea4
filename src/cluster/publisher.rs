//! State publisher - fans snapshots and alerts out to subscribers

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use super::registry::ClusterSnapshot;

/// Capacity of the broadcast buffer; slow subscribers skip ahead when lagging
const CHANNEL_CAPACITY: usize = 64;

/// Message pushed to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClusterMessage {
    /// Full cluster snapshot
    StateUpdate(ClusterSnapshot),
    /// Node failure alert
    Alert { msg: String },
}

impl ClusterMessage {
    pub fn node_failed(node_id: &str) -> Self {
        ClusterMessage::Alert {
            msg: format!("Node {} failed", node_id),
        }
    }

    /// JSON text frame for the websocket
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One-to-many broadcast of cluster messages
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<ClusterMessage>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Send to every current subscriber; returns how many received it
    pub fn publish(&self, message: ClusterMessage) -> usize {
        // Sending with no subscribers is not an error for us
        match self.sender.send(message) {
            Ok(count) => count,
            Err(_) => {
                trace!("No subscribers for cluster message");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.publish(ClusterMessage::node_failed("n1")), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_alerts() {
        let hub = BroadcastHub::new();
        let mut rx = hub.subscribe();

        assert_eq!(hub.publish(ClusterMessage::node_failed("n1")), 1);

        match rx.recv().await.unwrap() {
            ClusterMessage::Alert { msg } => assert_eq!(msg, "Node n1 failed"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_message_wire_shape() {
        let alert = serde_json::to_value(ClusterMessage::node_failed("n1")).unwrap();
        assert_eq!(alert["type"], "alert");
        assert_eq!(alert["data"]["msg"], "Node n1 failed");

        let update =
            serde_json::to_value(ClusterMessage::StateUpdate(ClusterSnapshot::default())).unwrap();
        assert_eq!(update["type"], "state_update");
        assert!(update["data"]["nodes"].as_array().unwrap().is_empty());
    }
}
