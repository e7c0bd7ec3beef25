use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use steproom_relay::{build, RelayConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "steproom-relay", version, about = "Room relay for steproom")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:1999")]
    bind: SocketAddr,

    /// Directory for room snapshots and the registry index.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Origin to allow in CORS headers; omit to send none.
    #[arg(long)]
    cors_origin: Option<String>,

    /// Seconds between snapshot writes for dirty rooms.
    #[arg(long, default_value_t = 30)]
    snapshot_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = RelayConfig {
        bind: args.bind,
        data_dir: args.data_dir,
        cors_origin: args.cors_origin,
        snapshot_interval: Duration::from_secs(args.snapshot_interval_secs),
    };

    let (router, manager) = build(&config).await?;
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(addr = %listener.local_addr()?, data_dir = %config.data_dir.display(), "relay listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("listener closed, draining rooms");
    manager.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
