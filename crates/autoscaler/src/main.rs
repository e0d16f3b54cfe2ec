//! Marathon autoscaler
//!
//! Polls Marathon for applications that opt into autoscaling, measures their
//! executors through the Mesos agents, and raises the instance count of any
//! application running over its CPU or memory threshold.

use anyhow::{Context, Result};
use autoscale_lib::{
    fetch::{MarathonClient, MesosClient},
    health::HealthRegistry,
    observability::{AutoscaleMetrics, StructuredLogger},
    PollerBuilder,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AUTOSCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "marathon-autoscaler", version, about)]
struct Cli {
    /// Path to a TOML/YAML/JSON config file
    #[arg(short, long, env = "AUTOSCALER_CONFIG")]
    config: Option<PathBuf>,

    /// Log scale decisions without sending them to Marathon
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();

    let config = config::AutoscalerConfig::load(cli.config.as_deref())?;
    info!(
        instance = %config.instance_name,
        marathon = %config.marathon.endpoint,
        mesos = %config.mesos.endpoint,
        "Autoscaler configured"
    );

    let health_registry = HealthRegistry::new();

    let metrics = AutoscaleMetrics::new();

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(AUTOSCALER_VERSION);

    let fleet = MarathonClient::new(config.marathon_config())
        .context("Failed to create Marathon client")?;
    let cluster =
        MesosClient::new(config.mesos_config()).context("Failed to create Mesos client")?;

    let poller = PollerBuilder::new()
        .fleet(Arc::new(fleet))
        .cluster(Arc::new(cluster))
        .config(config.poller_config())
        .health(health_registry.clone())
        .metrics(metrics)
        .logger(logger.clone())
        .dry_run(cli.dry_run || config.dry_run)
        .build()?;

    let app_state = Arc::new(api::AppState::new(health_registry));
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(config.api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let poller_handle = tokio::spawn(poller.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    if let Err(e) = poller_handle.await {
        error!(error = %e, "Poll loop task failed");
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
