//! Room manager and WebSocket front door for the lively collaboration runtime.
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod manager;
pub mod persistence;
pub mod room_actor;
mod util;

pub use config::Config;
pub use error::{Error, Result};
pub use host::{AuthenticatedUser, NoopHost, RoomHost};
pub use manager::RoomManager;
pub use persistence::{FsPersistence, InMemoryPersistence, Persistence};
pub use room_actor::{RoomCommand, RoomHandle};

use std::net::SocketAddr;
use std::sync::Arc;

/// Serves `routes` on `addr`, returning once `shutdown` resolves and in-flight requests drain.
/// Mirrors `warp::Server::bind_with_graceful_shutdown`'s split of "stop accepting" from "finish
/// what's in flight".
pub async fn serve(
    manager: Arc<RoomManager>,
    host: Arc<dyn RoomHost>,
    config: Arc<Config>,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) {
    let routes = http::routes(manager, host, config);
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, shutdown);
    server.await;
}
