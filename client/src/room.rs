//! The client-facing `Room`: a handle to a background task that owns the mirrored
//! `StorageDocument`, undo/redo history, presence roster, ephemeral live-state and cursors, and
//! dispatches every inbound message from the connection.
use crate::activity::{ActivityLevel, ActivityTracker, DEFAULT_POLL_INTERVAL};
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::cursor_throttle::CursorThrottle;
use lively_crdt::{Callback, MutationScope, Path, SerializedNode, StorageDocument, SubscriptionId};
use lively_protocol::{
    ClientMessage, CursorData, CursorMove, LiveState, LiveStateEntry, OpsBatch, PresencePatch,
    PresenceUser, ServerMessage,
};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, watch};

type MutateFn = Box<dyn FnOnce(&mut MutationScope) -> lively_crdt::Result<()> + Send>;

enum Command {
    Mutate { f: MutateFn, reply: oneshot::Sender<lively_crdt::Result<()>> },
    Subscribe { path: Path, deep: bool, callback: Callback, reply: oneshot::Sender<SubscriptionId> },
    Unsubscribe { id: SubscriptionId },
    UpdatePresence { patch: PresencePatch },
    UpdateCursor { mv: CursorMove },
    SendEvent { event: serde_json::Value },
    Undo { reply: oneshot::Sender<bool> },
    Redo { reply: oneshot::Sender<bool> },
    Snapshot { reply: oneshot::Sender<SerializedNode> },
    Roster { reply: oneshot::Sender<Vec<PresenceUser>> },
}

/// A cheaply-cloneable handle. The background task it addresses outlives any single clone;
/// dropping every handle leaves the task idling on a closed channel, which ends it.
#[derive(Clone)]
pub struct Room {
    commands: mpsc::UnboundedSender<Command>,
    connection_state: watch::Receiver<ConnectionState>,
}

impl Room {
    /// Opens a room at `url` (already carrying `?user=...&avatar=...` if desired) and spawns its
    /// background task.
    pub fn connect(url: String) -> Self {
        let (connection, server_inbound, connection_events) = ConnectionManager::connect(url);
        let connection_state = connection.state_watch();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let state = RoomState {
            doc: StorageDocument::new("client"),
            history: lively_crdt::History::new(),
            presence: Vec::new(),
            cursors: HashMap::new(),
            live_state: LiveState::default(),
            activity: ActivityTracker::new(),
            cursor_throttle: CursorThrottle::new(),
            connection,
        };
        tokio::spawn(run(state, commands_rx, server_inbound, connection_events));

        Self { commands: commands_tx, connection_state }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.borrow()
    }

    pub fn connection_state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.clone()
    }

    /// Runs `f` against the mirrored document's root. Forward ops are sent to the server;
    /// inverse ops land on the local undo stack.
    pub async fn mutate<F>(&self, f: F) -> lively_crdt::Result<()>
    where
        F: FnOnce(&mut MutationScope) -> lively_crdt::Result<()> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Mutate { f: Box::new(f), reply });
        rx.await.expect("room task dropped the mutate reply")
    }

    pub async fn subscribe(&self, path: Path, deep: bool, callback: Callback) -> SubscriptionId {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Subscribe { path, deep, callback, reply });
        rx.await.expect("room task dropped the subscribe reply")
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let _ = self.commands.send(Command::Unsubscribe { id });
    }

    pub fn update_presence(&self, patch: PresencePatch) {
        let _ = self.commands.send(Command::UpdatePresence { patch });
    }

    pub fn update_cursor(&self, x: f64, y: f64, viewport_pos: Option<(f64, f64)>, viewport_scale: Option<f64>) {
        let _ = self.commands.send(Command::UpdateCursor {
            mv: CursorMove { x, y, viewport_pos, viewport_scale },
        });
    }

    pub fn send(&self, event: serde_json::Value) {
        let _ = self.commands.send(Command::SendEvent { event });
    }

    pub async fn undo(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Undo { reply });
        rx.await.unwrap_or(false)
    }

    pub async fn redo(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Redo { reply });
        rx.await.unwrap_or(false)
    }

    pub async fn snapshot(&self) -> SerializedNode {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Snapshot { reply });
        rx.await.expect("room task dropped the snapshot reply")
    }

    pub async fn roster(&self) -> Vec<PresenceUser> {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Roster { reply });
        rx.await.unwrap_or_default()
    }
}

struct RoomState {
    doc: StorageDocument,
    history: lively_crdt::History,
    presence: Vec<PresenceUser>,
    cursors: HashMap<String, CursorData>,
    live_state: LiveState,
    activity: ActivityTracker,
    cursor_throttle: CursorThrottle,
    connection: ConnectionManager,
}

impl RoomState {
    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Mutate { f, reply } => {
                let result = self.doc.mutate(|scope| f(scope));
                let _ = reply.send(result.map(|outcome| {
                    self.broadcast_applied(outcome.applied);
                    self.history.push(outcome.inverse);
                }));
            }
            Command::Subscribe { path, deep, callback, reply } => {
                let id = self.doc.subscribe(&path, deep, callback);
                let _ = reply.send(id);
            }
            Command::Unsubscribe { id } => self.doc.unsubscribe(id),
            Command::UpdatePresence { patch } => {
                self.activity.refresh();
                let _ = self.connection.send(ClientMessage::PresenceUpdate { patch });
            }
            Command::UpdateCursor { mv } => {
                self.activity.refresh();
                if let Some(mv) = self.cursor_throttle.push(mv) {
                    let _ = self.connection.send(ClientMessage::CursorUpdate { mv });
                }
            }
            Command::SendEvent { event } => {
                let _ = self.connection.send(ClientMessage::Event { event });
            }
            Command::Undo { reply } => {
                let _ = reply.send(self.undo());
            }
            Command::Redo { reply } => {
                let _ = reply.send(self.redo());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.doc.serialize());
            }
            Command::Roster { reply } => {
                let _ = reply.send(self.presence.clone());
            }
        }
    }

    fn broadcast_applied(&mut self, applied: Vec<lively_crdt::Op>) {
        if applied.is_empty() {
            return;
        }
        let batch = OpsBatch { ops: applied, actor: self.doc.actor().to_string(), base_clock: 0 };
        let _ = self.connection.send(ClientMessage::StorageOps(batch));
    }

    fn undo(&mut self) -> bool {
        let Some(batch) = self.history.pop_undo() else { return false };
        match self.doc.mutate(|scope| {
            for op in &batch {
                scope.apply_captured(op)?;
            }
            Ok(())
        }) {
            Ok(outcome) => {
                self.broadcast_applied(outcome.applied);
                self.history.push_redo(outcome.inverse);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "undo failed to replay inverse batch");
                false
            }
        }
    }

    fn redo(&mut self) -> bool {
        let Some(batch) = self.history.pop_redo() else { return false };
        match self.doc.mutate(|scope| {
            for op in &batch {
                scope.apply_captured(op)?;
            }
            Ok(())
        }) {
            Ok(outcome) => {
                self.broadcast_applied(outcome.applied);
                self.history.push_undo_from_redo(outcome.inverse);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "redo failed to replay forward batch");
                false
            }
        }
    }

    /// The full inbound dispatch table: `storage:init`, `storage:ops`, `presence`,
    /// `cursor:update` (dropped if stale by `lastUpdate`), `state:init`/`state:update`, `event`,
    /// and `yjs:*` forwarded opaquely (the client never inspects the bytes).
    fn handle_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::StorageInit { root } => {
                self.doc = StorageDocument::from_serialized(self.doc.actor().to_string(), root);
                self.history = lively_crdt::History::new();
            }
            ServerMessage::StorageOps(batch) => self.doc.apply_remote_ops(&batch.ops),
            ServerMessage::Presence { users } => {
                self.presence = users;
                let present: std::collections::HashSet<&str> =
                    self.presence.iter().map(|u| u.user_id.as_str()).collect();
                self.cursors.retain(|user_id, _| present.contains(user_id.as_str()));
            }
            ServerMessage::CursorUpdate { cursor } => self.apply_cursor(cursor),
            ServerMessage::StateInit { entries } => self.live_state.entries = entries,
            ServerMessage::StateUpdate { key, entry } => {
                self.live_state.set(key, entry);
            }
            ServerMessage::Event { event } => {
                tracing::debug!(?event, "received event");
            }
            ServerMessage::YjsSync { .. } | ServerMessage::YjsUpdate { .. } => {
                // opaque secondary-CRDT bytes: forwarded to whatever owns the text-editing
                // integration, never parsed here.
            }
            ServerMessage::ServerShutdown => {
                tracing::info!("server announced shutdown");
            }
        }
    }

    fn apply_cursor(&mut self, cursor: CursorData) {
        if let Some(existing) = self.cursors.get(&cursor.user_id) {
            if existing.last_update > cursor.last_update {
                return; // stale: a newer move already landed for this user.
            }
        }
        self.cursors.insert(cursor.user_id.clone(), cursor);
    }
}

async fn run(
    mut state: RoomState,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut inbound: mpsc::UnboundedReceiver<ServerMessage>,
    mut connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    let mut activity_poll = tokio::time::interval(DEFAULT_POLL_INTERVAL);
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(cmd) => state.handle_command(cmd),
                    None => break,
                }
            }
            msg = inbound.recv() => {
                match msg {
                    Some(msg) => state.handle_server_message(msg),
                    None => break,
                }
            }
            event = connection_events.recv() => {
                match event {
                    Some(ConnectionEvent::ConnectionLost) => {
                        tracing::warn!("connection lost after repeated reconnect failures");
                    }
                    Some(ConnectionEvent::StateChanged(_)) => {}
                    None => break,
                }
            }
            _ = activity_poll.tick() => {
                if let Some(level) = state.activity.poll() {
                    let status = match level {
                        ActivityLevel::Online => lively_protocol::OnlineStatus::Online,
                        ActivityLevel::Away => lively_protocol::OnlineStatus::Away,
                        ActivityLevel::Offline => lively_protocol::OnlineStatus::Offline,
                    };
                    let _ = state.connection.send(ClientMessage::PresenceUpdate {
                        patch: PresencePatch { online_status: Some(status), ..Default::default() },
                    });
                }
                if let Some(mv) = state.cursor_throttle.flush() {
                    let _ = state.connection.send(ClientMessage::CursorUpdate { mv });
                }
            }
        }
    }
    state.connection.stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_cursor_updates_are_dropped_by_last_update() {
        let mut state = RoomState {
            doc: StorageDocument::new("client"),
            history: lively_crdt::History::new(),
            presence: Vec::new(),
            cursors: HashMap::new(),
            live_state: LiveState::default(),
            activity: ActivityTracker::new(),
            cursor_throttle: CursorThrottle::new(),
            connection: ConnectionManager::connect("ws://127.0.0.1:1/rooms/test".into()).0,
        };
        let fresh = CursorData {
            user_id: "u1".into(),
            display_name: "a".into(),
            color: "#fff".into(),
            x: 1.0,
            y: 1.0,
            last_update: 100,
            viewport_pos: None,
            viewport_scale: None,
        };
        state.apply_cursor(fresh.clone());
        let mut stale = fresh.clone();
        stale.last_update = 50;
        stale.x = 99.0;
        state.apply_cursor(stale);
        assert_eq!(state.cursors.get("u1").unwrap().x, 1.0);
    }

    #[tokio::test]
    async fn presence_replace_prunes_cursors_for_departed_users() {
        let mut state = RoomState {
            doc: StorageDocument::new("client"),
            history: lively_crdt::History::new(),
            presence: Vec::new(),
            cursors: HashMap::new(),
            live_state: LiveState::default(),
            activity: ActivityTracker::new(),
            cursor_throttle: CursorThrottle::new(),
            connection: ConnectionManager::connect("ws://127.0.0.1:1/rooms/test".into()).0,
        };
        let cursor = |user_id: &str| CursorData {
            user_id: user_id.into(),
            display_name: user_id.into(),
            color: "#fff".into(),
            x: 0.0,
            y: 0.0,
            last_update: 1,
            viewport_pos: None,
            viewport_scale: None,
        };
        state.apply_cursor(cursor("u1"));
        state.apply_cursor(cursor("u2"));

        let remaining = PresenceUser {
            user_id: "u2".into(),
            display_name: "b".into(),
            color: "#000".into(),
            connected_at: 0,
            online_status: lively_protocol::OnlineStatus::Online,
            last_active_at: 0,
            is_idle: false,
            avatar_url: None,
            location: None,
            metadata: None,
        };
        state.handle_server_message(ServerMessage::Presence { users: vec![remaining] });

        assert!(state.cursors.contains_key("u2"));
        assert!(!state.cursors.contains_key("u1"));
    }
}
