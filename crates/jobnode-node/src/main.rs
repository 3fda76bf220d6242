//! jobnode node daemon.
//!
//! Runs the orchestration core against a Kubernetes API server and exposes
//! it over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use jobnode_kube::KubeClient;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use jobnode_node::http::{create_router, HttpState};
use jobnode_node::{NodeConfig, NodeContext, Orchestrator, ResultSpool};

/// jobnode node daemon.
#[derive(Parser, Debug)]
#[command(name = "jobnode", about = "Runs algorithm containers as cluster jobs")]
struct Args {
    /// Path to the node configuration file
    #[arg(long, env = "JOBNODE_CONFIG")]
    config: PathBuf,

    /// HTTP server address, overrides `bind_addr` from the config file
    #[arg(long)]
    bind: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log_level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load config
    let config = NodeConfig::load(&args.config)?;
    let bind = args.bind.unwrap_or_else(|| config.bind_addr.clone());
    let http_addr: SocketAddr = bind.parse()?;

    let spool = ResultSpool::in_task_dir(config.local_task_dir());

    let executor = KubeClient::new(config.kube_config()?)?;
    let ctx = NodeContext::new(config, Arc::new(executor))?;
    let orchestrator = Arc::new(Orchestrator::new(ctx));

    // Results left over from the last shutdown go out first
    for result in spool.take_all().await? {
        orchestrator.requeue(result);
    }

    // Start the completion feed
    let cancel = CancellationToken::new();
    let (results, feed) = Arc::clone(&orchestrator).spawn_completion_feed(cancel.clone());

    let state = Arc::new(HttpState::new(orchestrator, results));
    let router = create_router(Arc::clone(&state));

    let listener = TcpListener::bind(http_addr).await?;
    info!(http_addr = %http_addr, "HTTP server listening");

    let shutdown = cancel.clone();
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
            shutdown.cancel();
        })
        .await;

    cancel.cancel();
    if let Err(e) = feed.await {
        error!(error = %e, "Completion feed task failed");
    }

    let undelivered = state.drain_undelivered().await;
    if let Err(e) = spool.store(&undelivered).await {
        for result in &undelivered {
            warn!(run_id = %result.run_id, status = %result.status, "Undelivered result lost");
        }
        error!(error = %e, "Failed to spool undelivered results");
    }

    served?;
    info!("jobnode stopped");
    Ok(())
}
