//! clustersim - a simulated compute cluster control plane
//!
//! Nodes register with the control plane, pods are placed on them by a
//! pluggable scheduling algorithm, missed heartbeats fail nodes over, a
//! utilization-driven auto-scaler adds capacity and a chaos injector kills
//! random nodes. State changes are pushed to WebSocket subscribers and
//! mirrored to a persistent store.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod metrics;
pub mod runtime;
pub mod server;
pub mod store;
