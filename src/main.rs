use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clustersim::cli::{
    format_history, format_logs, format_node_list, format_stats, AddNodeBody, AgentArgs,
    ApiClient, Cli, Commands, LaunchPodBody, ServeArgs,
};
use clustersim::cluster::{spawn_heartbeat, ClusterController, ClusterState, HeartbeatConfig};
use clustersim::config::{default_config_path, expand_home, load_config_file, SimulatorConfig};
use clustersim::runtime::{ContainerRuntime, DisabledRuntime, DockerRuntime};
use clustersim::server::{create_router, ApiState};
use clustersim::store::{ClusterStore, JsonFileStore, MemoryStore};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = ApiClient::new(&cli.server);

    match cli.command {
        Commands::Serve(args) => serve(cli.config, args).await,
        Commands::Agent(args) => agent(&cli.server, args).await,
        Commands::AddNode(args) => {
            let resp = client
                .add_node(&AddNodeBody {
                    cpu: args.cpu,
                    memory: args.memory,
                    node_type: args.node_type,
                    network_group: args.group,
                })
                .await?;
            println!("Node added: {}", resp.node_id);
            Ok(())
        }
        Commands::LaunchPod(args) => {
            let resp = client
                .launch_pod(&LaunchPodBody {
                    cpu_required: args.cpu,
                    memory_required: args.memory,
                    scheduling_algorithm: args.algorithm,
                    network_group: args.group,
                    node_affinity: args.affinity,
                })
                .await?;
            println!(
                "Pod {} launched on {} ({})",
                resp.pod_id, resp.assigned_node, resp.scheduling_algorithm
            );
            Ok(())
        }
        Commands::ListNodes => {
            print!("{}", format_node_list(&client.list_nodes().await?));
            Ok(())
        }
        Commands::RemoveNode(args) => {
            let resp = client.remove_node(&args.node_id).await?;
            println!("{}", resp.message);
            for (pod, node) in &resp.rescheduled {
                println!("  {} -> {}", pod, node);
            }
            for pod in &resp.dropped {
                println!("  {} dropped", pod);
            }
            Ok(())
        }
        Commands::Heartbeat(args) => {
            println!("{}", client.heartbeat(&args.node_id).await?.message);
            Ok(())
        }
        Commands::Simulate(args) => {
            let resp = client.toggle_simulation(&args.node_id, !args.off).await?;
            println!("{}", resp.message);
            Ok(())
        }
        Commands::Chaos => {
            println!("{}", client.chaos().await?.message);
            Ok(())
        }
        Commands::Stats => {
            print!("{}", format_stats(&client.stats().await?));
            Ok(())
        }
        Commands::Logs => {
            print!("{}", format_logs(&client.logs().await?));
            Ok(())
        }
        Commands::History => {
            print!("{}", format_history(&client.history().await?));
            Ok(())
        }
        Commands::Report(args) => {
            let csv = client.report().await?;
            match args.output {
                Some(path) => {
                    tokio::fs::write(&path, csv)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Report written to {}", path.display());
                }
                None => print!("{}", csv),
            }
            Ok(())
        }
    }
}

/// Merge the config file with command-line overrides
fn resolve_config(config_path: Option<PathBuf>, args: &ServeArgs) -> anyhow::Result<SimulatorConfig> {
    let mut config = match config_path.or_else(default_config_path) {
        Some(path) => load_config_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SimulatorConfig::default(),
    };

    if let Some(ref addr) = args.bind_addr {
        config.server.bind_addr = addr.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.no_docker {
        config.docker.enabled = false;
    }
    if let Some(ref path) = args.state_file {
        config.state_file = Some(path.clone());
    }
    Ok(config)
}

async fn serve(config_path: Option<PathBuf>, args: ServeArgs) -> anyhow::Result<()> {
    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        dotenvy::from_path(env_file)
            .with_context(|| format!("loading env file {}", env_file.display()))?;
    }

    let config = resolve_config(config_path, &args)?;

    let store: Arc<dyn ClusterStore> = match config.state_file {
        Some(ref path) => {
            let path = expand_home(path);
            info!("Persisting cluster state to {}", path.display());
            Arc::new(
                JsonFileStore::open(&path)
                    .await
                    .with_context(|| format!("opening state file {}", path.display()))?,
            )
        }
        None => Arc::new(MemoryStore::new()),
    };

    let state = Arc::new(ClusterState::new(store));

    let runtime: Arc<dyn ContainerRuntime> = if config.docker.enabled {
        match DockerRuntime::detect(config.docker.clone()).await {
            Ok(docker) => Arc::new(docker),
            Err(e) => {
                warn!("Docker unavailable, nodes will run without containers: {}", e);
                Arc::new(DisabledRuntime)
            }
        }
    } else {
        Arc::new(DisabledRuntime)
    };

    let controller = Arc::new(ClusterController::new(state, runtime, config.cluster.clone()));
    let restored = controller
        .restore_from_store(Utc::now())
        .await
        .context("restoring cluster state")?;
    if !restored.failed.is_empty() {
        warn!(
            "{} of {} restored nodes were failed and have been failed over",
            restored.failed.len(),
            restored.nodes
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = controller.spawn_background_tasks(shutdown_rx);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!("Server listening on {}", addr);
    info!("Endpoints:");
    info!("  POST /api/add_node         - Register a node");
    info!("  POST /api/launch_pod       - Place a pod");
    info!("  GET  /api/list_nodes       - List nodes");
    info!("  GET  /ws                   - Live cluster updates");
    info!("  GET  /health               - Health check");

    let app = create_router(ApiState::new(controller));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await;

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    served.context("server error")
}

async fn agent(server_url: &str, args: AgentArgs) -> anyhow::Result<()> {
    let config = HeartbeatConfig::new(server_url, &args.node_id).with_interval(args.interval);
    let shutdown = spawn_heartbeat(config).context("starting heartbeat client")?;
    info!("Agent for node {} reporting to {}", args.node_id, server_url);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    let _ = shutdown.send(true);
    Ok(())
}
