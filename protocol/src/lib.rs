//! The wire envelope shared by the lively client and server: message types, presence/cursor
//! records, ephemeral live-state, and the persisted-snapshot shape.
pub mod error;
pub mod message;
pub mod presence;
pub mod snapshot;

pub use error::{Error, Result};
pub use message::{ClientMessage, OpsBatch, ServerMessage};
pub use presence::{CursorData, CursorMove, LiveState, LiveStateEntry, OnlineStatus, PresencePatch, PresenceUser};
pub use snapshot::{Snapshot, YjsPayload};

/// Default `basePath` a room's WebSocket URL is served under.
pub const DEFAULT_BASE_PATH: &str = "/rooms";
/// Default `healthPath`.
pub const DEFAULT_HEALTH_PATH: &str = "/health";
/// Default debounce before a dirty room's snapshot is flushed to persistence.
pub const DEFAULT_SNAPSHOT_DEBOUNCE_MS: u64 = 2_000;
/// Default idle grace period before an empty room's actor is evicted.
pub const DEFAULT_IDLE_EVICT_MS: u64 = 60_000;
/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_MS: u64 = 20_000;

/// Sanitizes a room id to `[A-Za-z0-9_-]+`, replacing any other byte with `_`, before it's
/// used as a persistence key or URL path segment.
pub fn sanitize_room_id(room_id: &str) -> String {
    room_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_non_token_bytes() {
        assert_eq!(sanitize_room_id("room/../etc"), "room___etc");
        assert_eq!(sanitize_room_id("room-1_A"), "room-1_A");
    }
}
