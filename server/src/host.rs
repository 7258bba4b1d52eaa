//! Host-supplied callbacks: the embedding application's hooks into a room's lifecycle. All
//! methods are optional; [`NoopHost`] is the default used when no embedder customizes them.
use async_trait::async_trait;
use lively_crdt::SerializedNode;
use lively_protocol::{PresenceUser, Snapshot, YjsPayload};

#[async_trait]
pub trait RoomHost: Send + Sync {
    /// Seeds a room's storage tree the first time it's ever joined with no persisted snapshot.
    async fn initial_storage(&self, _room_id: &str) -> Option<Snapshot> {
        None
    }

    async fn initial_yjs(&self, _room_id: &str) -> Option<YjsPayload> {
        None
    }

    async fn on_join(&self, _room_id: &str, _user: &PresenceUser) {}

    async fn on_leave(&self, _room_id: &str, _user: &PresenceUser) {}

    async fn on_storage_change(&self, _room_id: &str, _root: &SerializedNode) {}

    async fn on_yjs_change(&self, _room_id: &str, _bytes: &[u8]) {}

    /// Combines the room's current opaque secondary-CRDT bytes (if any) with an incoming
    /// update. Treated as an associative, commutative, idempotent combine; the server never
    /// inspects the bytes itself.
    fn merge_yjs(&self, existing: Option<&[u8]>, incoming: &[u8]) -> Vec<u8> {
        match existing {
            Some(bytes) if bytes == incoming => bytes.to_vec(),
            _ => incoming.to_vec(),
        }
    }

    /// Authenticates an incoming upgrade request, given the query-string `user` and `avatar`
    /// parameters. Rejecting returns an HTTP 401 and no socket is opened. The default accepts
    /// every connection, deriving a display name from the query string.
    fn authenticate(&self, user: Option<&str>, avatar: Option<&str>) -> Result<AuthenticatedUser, String> {
        Ok(AuthenticatedUser {
            display_name: user.unwrap_or("anonymous").to_string(),
            avatar_url: avatar.map(|s| s.to_string()),
        })
    }
}

pub struct AuthenticatedUser {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Default)]
pub struct NoopHost;

impl RoomHost for NoopHost {}
