//! `FleetLink` server binary.
//!
//! Runs the control plane with an in-memory node directory. Node identities
//! do not survive a restart; deployments needing durable identity plug a
//! SQL-backed [`NodeDirectory`](fleetlink_server::NodeDirectory) in here.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleetlink_server::network::{NetworkConfig, NetworkModule};
use fleetlink_server::storage::MemoryDirectory;

#[derive(Debug, Parser)]
#[command(name = "fleetlink-server", about = "FleetLink node control plane")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0", env = "FLEETLINK_HOST")]
    host: String,

    /// Listen port (0 for OS-assigned).
    #[arg(long, default_value_t = 8000, env = "FLEETLINK_PORT")]
    port: u16,

    /// Expose Prometheus metrics on this address (disabled if unset).
    #[arg(long, env = "FLEETLINK_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Prometheus exporter listening on {addr}");
    }

    let config = NetworkConfig {
        host: args.host,
        port: args.port,
        ..NetworkConfig::default()
    };

    let mut module = NetworkModule::new(config, Arc::new(MemoryDirectory::new()));
    module.start().await?;
    module.serve(shutdown_signal()).await
}

/// Resolves when the process receives ctrl-c.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
