//! The wire envelope: every frame is JSON text and carries a `type` tag. Client and server see
//! different shapes of a few same-named messages (`cursor:update`, `storage:ops`), so the
//! envelope is split into a `ClientMessage` and a `ServerMessage` rather than one enum trying
//! to cover both directions with ambiguous tags.
use crate::presence::{CursorData, CursorMove, LiveStateEntry, PresencePatch, PresenceUser};
use crate::snapshot::YjsPayload;
use lively_crdt::{Op, SerializedNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A batch of ops plus the actor and clock watermark it was produced against, shared by both
/// directions of `storage:ops`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsBatch {
    pub ops: Vec<Op>,
    pub actor: String,
    pub base_clock: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "presence:update")]
    PresenceUpdate {
        #[serde(flatten)]
        patch: PresencePatch,
    },
    #[serde(rename = "cursor:update")]
    CursorUpdate {
        #[serde(flatten)]
        mv: CursorMove,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "storage:ops")]
    StorageOps(OpsBatch),
    #[serde(rename = "state:init")]
    StateInit { entries: BTreeMap<String, LiveStateEntry> },
    #[serde(rename = "state:update")]
    StateUpdate { key: String, entry: LiveStateEntry },
    #[serde(rename = "event")]
    Event { event: serde_json::Value },
    #[serde(rename = "yjs:sync")]
    YjsSync { payload: YjsPayload },
    #[serde(rename = "yjs:update")]
    YjsUpdate { payload: YjsPayload },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "presence")]
    Presence { users: Vec<PresenceUser> },
    #[serde(rename = "cursor:update")]
    CursorUpdate {
        #[serde(flatten)]
        cursor: CursorData,
    },
    #[serde(rename = "storage:init")]
    StorageInit { root: SerializedNode },
    #[serde(rename = "storage:ops")]
    StorageOps(OpsBatch),
    #[serde(rename = "state:init")]
    StateInit { entries: BTreeMap<String, LiveStateEntry> },
    #[serde(rename = "state:update")]
    StateUpdate { key: String, entry: LiveStateEntry },
    #[serde(rename = "event")]
    Event { event: serde_json::Value },
    #[serde(rename = "yjs:sync")]
    YjsSync { payload: YjsPayload },
    #[serde(rename = "yjs:update")]
    YjsUpdate { payload: YjsPayload },
    #[serde(rename = "server:shutdown")]
    ServerShutdown,
}

impl ClientMessage {
    /// Whether dropping this message under outbound backpressure is acceptable — only cursor
    /// moves are "non-critical" per the connection manager's overflow policy.
    pub fn is_droppable(&self) -> bool {
        matches!(self, ClientMessage::CursorUpdate { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::PresenceUpdate { .. } => "presence:update",
            ClientMessage::CursorUpdate { .. } => "cursor:update",
            ClientMessage::Heartbeat => "heartbeat",
            ClientMessage::StorageOps(_) => "storage:ops",
            ClientMessage::StateInit { .. } => "state:init",
            ClientMessage::StateUpdate { .. } => "state:update",
            ClientMessage::Event { .. } => "event",
            ClientMessage::YjsSync { .. } => "yjs:sync",
            ClientMessage::YjsUpdate { .. } => "yjs:update",
        }
    }
}

impl ServerMessage {
    pub fn is_droppable(&self) -> bool {
        matches!(self, ServerMessage::CursorUpdate { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Presence { .. } => "presence",
            ServerMessage::CursorUpdate { .. } => "cursor:update",
            ServerMessage::StorageInit { .. } => "storage:init",
            ServerMessage::StorageOps(_) => "storage:ops",
            ServerMessage::StateInit { .. } => "state:init",
            ServerMessage::StateUpdate { .. } => "state:update",
            ServerMessage::Event { .. } => "event",
            ServerMessage::YjsSync { .. } => "yjs:sync",
            ServerMessage::YjsUpdate { .. } => "yjs:update",
            ServerMessage::ServerShutdown => "server:shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lively_crdt::{LamportTs, OpKind, PathSegment};

    #[test]
    fn heartbeat_round_trips_with_bare_type_tag() {
        let json = serde_json::to_string(&ClientMessage::Heartbeat).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ClientMessage::Heartbeat));
    }

    #[test]
    fn storage_ops_round_trips_with_embedded_ops() {
        let msg = ServerMessage::StorageOps(OpsBatch {
            ops: vec![Op::new(
                LamportTs::new(1, "a"),
                vec![PathSegment::Key("x".into())],
                OpKind::DeleteField,
            )],
            actor: "a".into(),
            base_clock: 0,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"baseClock\":0"), "got {json}");
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        match back {
            ServerMessage::StorageOps(batch) => {
                assert_eq!(batch.actor, "a");
                assert_eq!(batch.ops.len(), 1);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn client_cursor_update_has_no_identity_fields() {
        let json = serde_json::to_string(&ClientMessage::CursorUpdate {
            mv: CursorMove {
                x: 1.0,
                y: 2.0,
                viewport_pos: None,
                viewport_scale: None,
            },
        })
        .unwrap();
        assert!(!json.contains("userId"));
        assert!(json.contains("\"x\":1.0"));
    }
}
