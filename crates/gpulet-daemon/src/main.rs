//! gpulet daemon
//!
//! Main daemon process: hosts the scheduling engine, serves the REST API,
//! and drives the periodic rebalance / expiry-sweep / admission-retry tick.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gpulet_api::create_router;
use gpulet_cluster::InMemoryCluster;
use gpulet_core::DaemonConfig;
use gpulet_scheduler::Engine;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// gpulet daemon - resource-aware scheduler for GPU batch jobs
#[derive(Parser, Debug)]
#[command(name = "gpuletd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the API server (overrides config)
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match DaemonConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => DaemonConfig::default(),
    };
    if let Some(address) = args.address {
        config.api.address = address;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    info!("Starting gpulet daemon v{}", env!("CARGO_PKG_VERSION"));

    // Cluster view and engine
    let cluster = Arc::new(InMemoryCluster::new());
    let engine = Arc::new(Engine::new(cluster.clone()));

    // Background tick: rebalance, expiry sweep, admission retry
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let tick_handle = tokio::spawn(run_ticks(
        engine.clone(),
        Duration::from_secs(config.engine.rebalance_interval_secs),
        Duration::from_secs(config.engine.sweep_interval_secs),
        shutdown_rx,
    ));

    // Create API router
    let router = create_router(engine, cluster);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .expect("Invalid address");

    info!("API server listening on {}", addr);
    info!(
        rebalance_interval_secs = config.engine.rebalance_interval_secs,
        sweep_interval_secs = config.engine.sweep_interval_secs,
        "Background ticks configured"
    );

    let listener = tokio::net::TcpListener::bind(addr).await.expect("Failed to bind");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    let _ = shutdown_tx.send(true);
    let _ = tick_handle.await;
    info!("gpulet daemon stopped");
}

/// Periodic engine duties, until shutdown flips.
async fn run_ticks(
    engine: Arc<Engine>,
    rebalance_interval: Duration,
    sweep_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut rebalance = tokio::time::interval(rebalance_interval);
    let mut sweep = tokio::time::interval(sweep_interval);

    loop {
        tokio::select! {
            _ = rebalance.tick() => {
                match engine.rebalance().await {
                    Ok(report) => {
                        if !report.moves.is_empty() {
                            info!(moves = report.moves.len(), "Rebalance evicted pods");
                        }
                    }
                    Err(e) => error!(error = %e, "Rebalance cycle failed"),
                }
                // Retry whatever is still pending; evictions may have
                // freed capacity.
                if let Err(e) = engine.run_admission_pass().await {
                    error!(error = %e, "Admission retry pass failed");
                }
            }
            _ = sweep.tick() => {
                let swept = engine.sweep_expired_allocations().await;
                if swept > 0 {
                    info!(swept, "Expired allocations reclaimed");
                }
            }
            _ = shutdown.changed() => {
                info!("Background ticks shutting down");
                break;
            }
        }
    }
}
