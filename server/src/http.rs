//! HTTP/WebSocket front door: path-prefix routing to a room actor, a health endpoint, and a
//! 426 for every other non-upgrade path.
use crate::config::Config;
use crate::host::RoomHost;
use crate::manager::RoomManager;
use crate::room_actor::RoomCommand;
use futures::{SinkExt, StreamExt};
use lively_protocol::ClientMessage;
use std::collections::HashMap;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::path::FullPath;
use warp::ws::{Message, Ws};
use warp::{Filter, Rejection, Reply};

/// Builds the combined filter served by [`crate::serve`].
pub fn routes(
    manager: Arc<RoomManager>,
    host: Arc<dyn RoomHost>,
    config: Arc<Config>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = Rejection> + Clone {
    health_route(config.clone())
        .or(room_route(manager, host, config))
        .unify()
        .or(fallback_route())
        .unify()
}

fn health_route(
    config: Arc<Config>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = Rejection> + Clone {
    warp::get().and(warp::path::full()).and_then(move |full: FullPath| {
        let config = config.clone();
        async move {
            if full.as_str() == config.health_path {
                Ok(warp::reply::json(&serde_json::json!({"status": "ok"})).into_response())
            } else {
                Err(warp::reject::not_found())
            }
        }
    })
}

fn room_route(
    manager: Arc<RoomManager>,
    host: Arc<dyn RoomHost>,
    config: Arc<Config>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = Rejection> + Clone {
    warp::path::full()
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::ws())
        .and_then(move |full: FullPath, query: HashMap<String, String>, ws: Ws| {
            let manager = manager.clone();
            let host = host.clone();
            let base_path = config.base_path.clone();
            async move {
                let room_id = match extract_room_id(full.as_str(), &base_path) {
                    Some(id) => id,
                    None => return Err(warp::reject::not_found()),
                };
                let user = query.get("user").cloned();
                let avatar = query.get("avatar").cloned();
                let response = match host.authenticate(user.as_deref(), avatar.as_deref()) {
                    Ok(authed) => {
                        let room = manager.room(&room_id);
                        ws.on_upgrade(move |socket| handle_socket(socket, room, authed.display_name, authed.avatar_url))
                            .into_response()
                    }
                    Err(reason) => warp::reply::with_status(
                        warp::reply::json(&serde_json::json!({ "error": reason })),
                        StatusCode::UNAUTHORIZED,
                    )
                    .into_response(),
                };
                Ok::<_, Rejection>(response)
            }
        })
}

fn fallback_route() -> impl Filter<Extract = (warp::reply::Response,), Error = std::convert::Infallible> + Clone {
    warp::any().map(|| {
        warp::reply::with_status(warp::reply::reply(), StatusCode::UPGRADE_REQUIRED).into_response()
    })
}

fn extract_room_id(path: &str, base_path: &str) -> Option<String> {
    let prefix = format!("{}/", base_path.trim_end_matches('/'));
    let rest = path.strip_prefix(&prefix)?;
    let room_id = rest.split('/').next().unwrap_or("");
    if room_id.is_empty() {
        None
    } else {
        Some(room_id.to_string())
    }
}

async fn handle_socket(
    socket: warp::ws::WebSocket,
    room: crate::room_actor::RoomHandle,
    display_name: String,
    avatar_url: Option<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox_tx, mut outbox_rx) = tokio::sync::mpsc::unbounded_channel();

    let user_id = match room.join(display_name, avatar_url, outbox_tx).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "room actor was gone before it could process the join");
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if ws_tx.send(Message::text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(_) => break,
        };
        if frame.is_close() {
            break;
        }
        if !frame.is_text() {
            continue;
        }
        let text = match frame.to_str() {
            Ok(t) => t,
            Err(_) => continue,
        };
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => dispatch(&room, &user_id, msg),
            Err(e) => tracing::warn!(error = %e, "dropping malformed client frame"),
        }
    }

    room.send(RoomCommand::Leave { user_id });
    writer.abort();
}

fn dispatch(room: &crate::room_actor::RoomHandle, user_id: &str, msg: ClientMessage) {
    let user_id = user_id.to_string();
    match msg {
        ClientMessage::PresenceUpdate { patch } => {
            room.send(RoomCommand::PresenceUpdate { user_id, patch })
        }
        ClientMessage::CursorUpdate { mv } => room.send(RoomCommand::CursorUpdate { user_id, mv }),
        ClientMessage::Heartbeat => {}
        ClientMessage::StorageOps(batch) => room.send(RoomCommand::StorageOps { user_id, batch }),
        ClientMessage::StateInit { .. } => {}
        ClientMessage::StateUpdate { key, entry } => {
            room.send(RoomCommand::StateUpdate { user_id, key, entry })
        }
        ClientMessage::Event { event } => room.send(RoomCommand::Event { user_id, event }),
        ClientMessage::YjsSync { .. } => {}
        ClientMessage::YjsUpdate { payload } => room.send(RoomCommand::YjsUpdate { user_id, payload }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_room_id_from_base_path_prefix() {
        assert_eq!(extract_room_id("/rooms/abc-123", "/rooms"), Some("abc-123".into()));
        assert_eq!(extract_room_id("/rooms/abc-123/extra", "/rooms"), Some("abc-123".into()));
        assert_eq!(extract_room_id("/rooms/", "/rooms"), None);
        assert_eq!(extract_room_id("/health", "/rooms"), None);
    }
}
