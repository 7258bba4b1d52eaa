use clap::Parser;
use lively_server::{Config, FsPersistence, NoopHost, RoomManager};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
struct Opts {
    #[clap(long)]
    /// TCP port to listen on. Defaults to `LIVELY_PORT` or 8080.
    port: Option<u16>,
    #[clap(long)]
    /// Directory snapshots are persisted under. Defaults to `LIVELY_STORAGE_DIR` or `./rooms`.
    storage_dir: Option<std::path::PathBuf>,
    #[clap(long, default_value = "10")]
    /// Seconds to wait for in-flight rooms to flush their snapshot on shutdown.
    shutdown_grace_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opts = Opts::parse();

    let mut config = Config::from_env();
    if let Some(port) = opts.port {
        config.port = port;
    }
    if let Some(dir) = opts.storage_dir {
        config.storage_dir = dir;
    }
    let config = Arc::new(config);

    let persistence = Arc::new(FsPersistence::new(config.storage_dir.clone()));
    let host = Arc::new(NoopHost);
    let manager = RoomManager::new(persistence, host.clone(), config.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, base_path = %config.base_path, "lively-server listening");

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining rooms");
    };

    lively_server::serve(manager.clone(), host, config, addr, shutdown_signal).await;

    manager.shutdown_all(Duration::from_secs(opts.shutdown_grace_secs)).await;
    Ok(())
}
