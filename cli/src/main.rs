use clap::{Parser, Subcommand};
use lively_server::{Config, FsPersistence, NoopHost, Persistence, RoomManager};
use std::sync::Arc;

#[derive(Parser)]
#[clap(about = "Admin and serving CLI for lively rooms")]
struct Cli {
    #[clap(long, global = true)]
    storage_dir: Option<std::path::PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lists every room id with a persisted snapshot.
    List,
    /// Deletes a room's persisted snapshot entirely.
    Delete { room_id: String },
    /// Resets a room to an empty snapshot without removing its entry.
    Reset { room_id: String },
    /// Reports whether a room has a persisted snapshot.
    Exists { room_id: String },
    /// Runs the WebSocket server.
    Serve {
        #[clap(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }
    let persistence = FsPersistence::new(config.storage_dir.clone());

    match cli.command {
        Command::List => {
            for room_id in persistence.list().await? {
                println!("{room_id}");
            }
        }
        Command::Delete { room_id } => {
            persistence.delete(&room_id).await?;
            println!("deleted {room_id}");
        }
        Command::Reset { room_id } => {
            persistence.reset(&room_id).await?;
            println!("reset {room_id}");
        }
        Command::Exists { room_id } => {
            println!("{}", persistence.exists(&room_id).await?);
        }
        Command::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            let config = Arc::new(config);
            let persistence = Arc::new(persistence);
            let host = Arc::new(NoopHost);
            let manager = RoomManager::new(persistence, host.clone(), config.clone());
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
            tracing::info!(%addr, "lively serving");

            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            lively_server::serve(manager.clone(), host, config, addr, shutdown).await;
            manager.shutdown_all(std::time::Duration::from_secs(10)).await;
        }
    }
    Ok(())
}
