//! CLI module for clustersim
//!
//! Provides subcommands:
//! - `clustersim serve` - Run the control plane
//! - `clustersim agent` - Run a node-side heartbeat loop
//! - `clustersim add-node`, `launch-pod`, `list-nodes`, ... - Talk to a running server

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

/// Default control plane URL for client subcommands
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

#[derive(Parser, Debug)]
#[command(name = "clustersim")]
#[command(about = "Simulated compute cluster: placement, heartbeats, failover, auto-scaling")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.clustersim/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Control plane URL used by client subcommands
    #[arg(long, global = true, env = "CLUSTERSIM_SERVER", default_value = DEFAULT_SERVER_URL)]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane server
    Serve(ServeArgs),

    /// Run a node agent that posts heartbeats to the control plane
    Agent(AgentArgs),

    /// Register a node
    AddNode(AddNodeArgs),

    /// Launch a pod
    LaunchPod(LaunchPodArgs),

    /// List nodes and their pods
    #[command(visible_alias = "nodes")]
    ListNodes,

    /// Remove a node, rescheduling its pods
    RemoveNode(NodeIdArgs),

    /// Send one heartbeat on behalf of a node
    Heartbeat(NodeIdArgs),

    /// Turn simulated heartbeats on or off for a node
    Simulate(SimulateArgs),

    /// Kill a random active node
    Chaos,

    /// Show cluster statistics
    Stats,

    /// Show the recent event log
    Logs,

    /// Show the CPU utilization history
    History,

    /// Download the CSV cluster report
    Report(ReportArgs),
}

/// Arguments for the serve command
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Bind address for the server
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Port to listen on (default: 5000)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do not start backing containers
    #[arg(long)]
    pub no_docker: bool,

    /// JSON file that holds cluster state across restarts
    #[arg(long, value_name = "FILE")]
    pub state_file: Option<PathBuf>,

    /// Path to a .env file to load before starting
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

/// Arguments for the agent command
#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Node id to heartbeat for
    #[arg(long, env = "NODE_ID")]
    pub node_id: String,

    /// Heartbeat interval in seconds
    #[arg(long, default_value = "7")]
    pub interval: u64,
}

/// Arguments for the add-node command
#[derive(Args, Debug)]
pub struct AddNodeArgs {
    /// CPU units
    #[arg(long)]
    pub cpu: u32,

    /// Memory in GB (server default when omitted)
    #[arg(long)]
    pub memory: Option<u32>,

    /// Node type: balanced, high_cpu or high_mem
    #[arg(long = "type")]
    pub node_type: Option<String>,

    /// Network group
    #[arg(long)]
    pub group: Option<String>,
}

/// Arguments for the launch-pod command
#[derive(Args, Debug)]
pub struct LaunchPodArgs {
    /// Required CPU units
    #[arg(long)]
    pub cpu: u32,

    /// Required memory in GB (server default when omitted)
    #[arg(long)]
    pub memory: Option<u32>,

    /// Scheduling algorithm: first_fit, best_fit or worst_fit
    #[arg(long)]
    pub algorithm: Option<String>,

    /// Network group
    #[arg(long)]
    pub group: Option<String>,

    /// Required node type
    #[arg(long)]
    pub affinity: Option<String>,
}

/// A single node id argument
#[derive(Args, Debug)]
pub struct NodeIdArgs {
    pub node_id: String,
}

/// Arguments for the simulate command
#[derive(Args, Debug)]
pub struct SimulateArgs {
    pub node_id: String,

    /// Disable simulation instead of enabling it
    #[arg(long)]
    pub off: bool,
}

/// Arguments for the report command
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}
