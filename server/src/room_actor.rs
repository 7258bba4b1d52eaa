//! A per-room actor: a single `tokio` task owning an `mpsc::UnboundedReceiver<RoomCommand>`,
//! guaranteeing that no two operations on a room's authoritative document ever interleave.
use crate::config::Config;
use crate::error::Error;
use crate::host::RoomHost;
use crate::manager::RoomManager;
use crate::persistence::Persistence;
use crate::util::{color_for, now_ms};
use lively_crdt::StorageDocument;
use lively_protocol::{
    CursorData, CursorMove, LiveStateEntry, OnlineStatus, OpsBatch, PresencePatch, PresenceUser,
    ServerMessage, Snapshot, YjsPayload,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};

pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

struct Roster {
    presence: PresenceUser,
    outbox: Outbox,
}

pub enum RoomCommand {
    Join {
        display_name: String,
        avatar_url: Option<String>,
        outbox: Outbox,
        ack: oneshot::Sender<String>,
    },
    Leave {
        user_id: String,
    },
    StorageOps {
        user_id: String,
        batch: OpsBatch,
    },
    CursorUpdate {
        user_id: String,
        mv: CursorMove,
    },
    PresenceUpdate {
        user_id: String,
        patch: PresencePatch,
    },
    StateUpdate {
        user_id: String,
        key: String,
        entry: LiveStateEntry,
    },
    Event {
        user_id: String,
        event: serde_json::Value,
    },
    YjsUpdate {
        user_id: String,
        payload: YjsPayload,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
    FlushSnapshot,
    EvictIfIdle {
        generation: u64,
    },
}

/// A cheaply-cloneable handle to a running room actor.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn send(&self, cmd: RoomCommand) {
        // The actor only stops after a graceful Shutdown; a send failing here means the
        // process is already tearing the room down, which the caller can't do anything about.
        let _ = self.tx.send(cmd);
    }

    pub async fn join(
        &self,
        display_name: String,
        avatar_url: Option<String>,
        outbox: Outbox,
    ) -> crate::error::Result<String> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(RoomCommand::Join {
            display_name,
            avatar_url,
            outbox,
            ack: ack_tx,
        });
        ack_rx.await.map_err(|_| Error::RoomGone)
    }

    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(RoomCommand::Shutdown { ack: ack_tx });
        let _ = ack_rx.await;
    }
}

pub struct RoomActor {
    room_id: String,
    doc: StorageDocument,
    roster: HashMap<String, Roster>,
    yjs: Option<Vec<u8>>,
    dirty: bool,
    snapshot_timer_pending: bool,
    idle_generation: u64,
    next_user_id: u64,
    persistence: Arc<dyn Persistence>,
    host: Arc<dyn RoomHost>,
    config: Arc<Config>,
    self_tx: mpsc::UnboundedSender<RoomCommand>,
    manager: Weak<RoomManager>,
}

impl RoomActor {
    pub fn spawn(
        room_id: String,
        persistence: Arc<dyn Persistence>,
        host: Arc<dyn RoomHost>,
        config: Arc<Config>,
        manager: Weak<RoomManager>,
    ) -> RoomHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = RoomActor {
            room_id,
            doc: StorageDocument::new("server"),
            roster: HashMap::new(),
            yjs: None,
            dirty: false,
            snapshot_timer_pending: false,
            idle_generation: 0,
            next_user_id: 0,
            persistence,
            host,
            config,
            self_tx: tx.clone(),
            manager,
        };
        tokio::spawn(actor.run(rx));
        RoomHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
        self.bootstrap().await;
        while let Some(cmd) = rx.recv().await {
            if let ControlFlow::Stop = self.handle(cmd).await {
                break;
            }
        }
        tracing::debug!(room_id = %self.room_id, "room actor stopped");
    }

    async fn bootstrap(&mut self) {
        match self.persistence.load(&self.room_id).await {
            Ok(Some(snapshot)) => {
                self.doc = StorageDocument::from_serialized("server", snapshot.root);
                self.yjs = snapshot.yjs.map(|y| y.0);
            }
            Ok(None) => {
                if let Some(snapshot) = self.host.initial_storage(&self.room_id).await {
                    self.doc = StorageDocument::from_serialized("server", snapshot.root);
                    self.yjs = snapshot.yjs.map(|y| y.0);
                }
                if self.yjs.is_none() {
                    if let Some(payload) = self.host.initial_yjs(&self.room_id).await {
                        self.yjs = Some(payload.0);
                    }
                }
            }
            Err(e) => {
                tracing::error!(room_id = %self.room_id, error = %e, "failed to load room snapshot, starting empty");
            }
        }
    }

    async fn handle(&mut self, cmd: RoomCommand) -> ControlFlow {
        match cmd {
            RoomCommand::Join { display_name, avatar_url, outbox, ack } => {
                self.on_join(display_name, avatar_url, outbox, ack).await;
            }
            RoomCommand::Leave { user_id } => self.on_leave(&user_id).await,
            RoomCommand::StorageOps { user_id, batch } => self.on_storage_ops(&user_id, batch).await,
            RoomCommand::CursorUpdate { user_id, mv } => self.on_cursor_update(&user_id, mv),
            RoomCommand::PresenceUpdate { user_id, patch } => self.on_presence_update(&user_id, patch),
            RoomCommand::StateUpdate { user_id, key, entry } => self.on_state_update(&user_id, key, entry),
            RoomCommand::Event { user_id, event } => self.on_event(&user_id, event),
            RoomCommand::YjsUpdate { user_id, payload } => self.on_yjs_update(&user_id, payload).await,
            RoomCommand::FlushSnapshot => self.on_flush_snapshot().await,
            RoomCommand::EvictIfIdle { generation } => {
                if generation == self.idle_generation && self.roster.is_empty() {
                    // Remove the manager's map entry before stopping so a later `room()` call
                    // spawns a fresh actor instead of handing back this dead handle.
                    if let Some(manager) = self.manager.upgrade() {
                        manager.evict(&self.room_id);
                    }
                    return ControlFlow::Stop;
                }
            }
            RoomCommand::Shutdown { ack } => {
                self.force_flush_snapshot().await;
                self.broadcast(ServerMessage::ServerShutdown, None);
                let _ = ack.send(());
                return ControlFlow::Stop;
            }
        }
        ControlFlow::Continue
    }

    async fn on_join(&mut self, display_name: String, avatar_url: Option<String>, outbox: Outbox, ack: oneshot::Sender<String>) {
        let was_empty = self.roster.is_empty();
        self.next_user_id += 1;
        let user_id = format!("u{}", self.next_user_id);
        let now = now_ms();
        let presence = PresenceUser {
            user_id: user_id.clone(),
            display_name,
            color: color_for(&user_id),
            connected_at: now,
            online_status: OnlineStatus::Online,
            last_active_at: now,
            is_idle: false,
            avatar_url,
            location: None,
            metadata: None,
        };

        let _ = ack.send(user_id.clone());
        let _ = outbox.send(ServerMessage::StorageInit { root: self.doc.serialize() });
        if let Some(bytes) = &self.yjs {
            let _ = outbox.send(ServerMessage::YjsSync { payload: YjsPayload(bytes.clone()) });
        }

        self.roster.insert(user_id, Roster { presence: presence.clone(), outbox });
        if was_empty {
            // cancels any eviction timer scheduled while the room was briefly empty.
            self.idle_generation += 1;
        }
        self.broadcast(self.presence_message(), None);
        self.host.on_join(&self.room_id, &presence).await;
    }

    async fn on_leave(&mut self, user_id: &str) {
        let Some(entry) = self.roster.remove(user_id) else { return };
        self.broadcast(self.presence_message(), None);
        self.host.on_leave(&self.room_id, &entry.presence).await;
        if self.roster.is_empty() {
            self.schedule_snapshot_now();
            self.schedule_eviction();
        }
    }

    async fn on_storage_ops(&mut self, user_id: &str, batch: OpsBatch) {
        if !self.roster.contains_key(user_id) {
            return;
        }
        self.doc.apply_remote_ops(&batch.ops);
        self.mark_dirty();
        self.broadcast(ServerMessage::StorageOps(batch), Some(user_id));
        self.host.on_storage_change(&self.room_id, &self.doc.serialize()).await;
    }

    fn on_cursor_update(&mut self, user_id: &str, mv: CursorMove) {
        let Some(entry) = self.roster.get(user_id) else { return };
        let cursor = CursorData {
            user_id: entry.presence.user_id.clone(),
            display_name: entry.presence.display_name.clone(),
            color: entry.presence.color.clone(),
            x: mv.x,
            y: mv.y,
            last_update: now_ms(),
            viewport_pos: mv.viewport_pos,
            viewport_scale: mv.viewport_scale,
        };
        self.broadcast(ServerMessage::CursorUpdate { cursor }, Some(user_id));
    }

    fn on_presence_update(&mut self, user_id: &str, patch: PresencePatch) {
        let Some(entry) = self.roster.get_mut(user_id) else { return };
        entry.presence.apply_patch(&patch);
        entry.presence.last_active_at = now_ms();
        self.broadcast(self.presence_message(), None);
    }

    fn on_state_update(&mut self, _user_id: &str, key: String, entry: LiveStateEntry) {
        self.broadcast(ServerMessage::StateUpdate { key, entry }, None);
    }

    fn on_event(&mut self, user_id: &str, event: serde_json::Value) {
        self.broadcast(ServerMessage::Event { event }, Some(user_id));
    }

    async fn on_yjs_update(&mut self, user_id: &str, payload: YjsPayload) {
        if !self.roster.contains_key(user_id) {
            return;
        }
        let merged = self.host.merge_yjs(self.yjs.as_deref(), payload.bytes());
        self.yjs = Some(merged.clone());
        self.mark_dirty();
        self.broadcast(ServerMessage::YjsUpdate { payload: YjsPayload(merged.clone()) }, Some(user_id));
        self.host.on_yjs_change(&self.room_id, &merged).await;
    }

    async fn on_flush_snapshot(&mut self) {
        self.snapshot_timer_pending = false;
        if self.dirty {
            self.force_flush_snapshot().await;
        }
    }

    async fn force_flush_snapshot(&mut self) {
        let snapshot = Snapshot {
            root: self.doc.serialize(),
            yjs: self.yjs.clone().map(YjsPayload),
            updated_at: now_ms(),
        };
        match self.persistence.save(&self.room_id, &snapshot).await {
            Ok(()) => self.dirty = false,
            Err(e) => {
                tracing::error!(room_id = %self.room_id, error = %e, "snapshot flush failed, retrying");
                self.mark_dirty();
            }
        }
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        if self.snapshot_timer_pending {
            return;
        }
        self.snapshot_timer_pending = true;
        let tx = self.self_tx.clone();
        let debounce = self.config.snapshot_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = tx.send(RoomCommand::FlushSnapshot);
        });
    }

    fn schedule_snapshot_now(&mut self) {
        if self.snapshot_timer_pending {
            return;
        }
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(RoomCommand::FlushSnapshot);
        });
    }

    fn schedule_eviction(&mut self) {
        self.idle_generation += 1;
        let generation = self.idle_generation;
        let tx = self.self_tx.clone();
        let grace = self.config.idle_evict;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(RoomCommand::EvictIfIdle { generation });
        });
    }

    fn presence_message(&self) -> ServerMessage {
        ServerMessage::Presence {
            users: self.roster.values().map(|r| r.presence.clone()).collect(),
        }
    }

    fn broadcast(&self, msg: ServerMessage, exclude: Option<&str>) {
        for (user_id, entry) in &self.roster {
            if Some(user_id.as_str()) == exclude {
                continue;
            }
            let _ = entry.outbox.send(msg.clone());
        }
    }
}

enum ControlFlow {
    Continue,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;
    use crate::host::NoopHost;
    use lively_crdt::{LamportTs, Op, OpKind, PathSegment};

    fn config() -> Arc<Config> {
        Arc::new(Config {
            snapshot_debounce: std::time::Duration::from_millis(20),
            idle_evict: std::time::Duration::from_millis(20),
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn join_receives_storage_init_and_broadcasts_presence() {
        let handle = RoomActor::spawn(
            "room-1".into(),
            Arc::new(InMemoryPersistence::new()),
            Arc::new(NoopHost),
            config(),
            Weak::new(),
        );
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let user1 = handle.join("alice".into(), None, tx1).await.unwrap();
        assert!(matches!(rx1.recv().await, Some(ServerMessage::StorageInit { .. })));
        assert!(matches!(rx1.recv().await, Some(ServerMessage::Presence { .. })));

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let _user2 = handle.join("bob".into(), None, tx2).await.unwrap();
        // alice observes bob's join as a second presence broadcast.
        assert!(matches!(rx1.recv().await, Some(ServerMessage::Presence { users }) if users.len() == 2));
        let _ = rx2.recv().await; // storage:init
        let _ = rx2.recv().await; // presence

        handle.send(RoomCommand::Leave { user_id: user1 });
        assert!(matches!(rx2.recv().await, Some(ServerMessage::Presence { users }) if users.len() == 1));
    }

    #[tokio::test]
    async fn storage_ops_apply_and_rebroadcast_to_others_only() {
        let handle = RoomActor::spawn(
            "room-2".into(),
            Arc::new(InMemoryPersistence::new()),
            Arc::new(NoopHost),
            config(),
            Weak::new(),
        );
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let user1 = handle.join("alice".into(), None, tx1).await.unwrap();
        let _ = rx1.recv().await; // storage:init
        let _ = rx1.recv().await; // presence

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let _user2 = handle.join("bob".into(), None, tx2).await.unwrap();
        let _ = rx1.recv().await; // presence (bob joined)
        let _ = rx2.recv().await; // storage:init
        let _ = rx2.recv().await; // presence

        handle.send(RoomCommand::StorageOps {
            user_id: user1,
            batch: OpsBatch {
                ops: vec![Op::new(
                    LamportTs::new(1, "alice"),
                    vec![PathSegment::Key("x".into())],
                    OpKind::SetField { value: lively_crdt::Value::null() },
                )],
                actor: "alice".into(),
                base_clock: 0,
            },
        });

        assert!(matches!(rx2.recv().await, Some(ServerMessage::StorageOps(_))));
        assert!(rx1.try_recv().is_err());
    }
}
