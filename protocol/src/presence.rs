//! Presence roster and ephemeral cursor types, unchanged across every message that carries them.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Away,
    Offline,
}

/// One member of a room's roster. Identity is `user_id`, assigned by the server on join.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub connected_at: u64,
    pub online_status: OnlineStatus,
    pub last_active_at: u64,
    pub is_idle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A patch sent by a client to update its own presence fields in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online_status: Option<OnlineStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_idle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl PresenceUser {
    pub fn apply_patch(&mut self, patch: &PresencePatch) {
        if let Some(status) = patch.online_status {
            self.online_status = status;
        }
        if let Some(idle) = patch.is_idle {
            self.is_idle = idle;
        }
        if patch.location.is_some() {
            self.location = patch.location.clone();
        }
        if patch.metadata.is_some() {
            self.metadata = patch.metadata.clone();
        }
    }
}

/// An (x, y) viewport-relative cursor, ephemeral and never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorData {
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub last_update: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport_pos: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport_scale: Option<f64>,
}

/// The client-sent half of a cursor update: position and viewport only, no identity (the
/// server fills in `user_id`/`display_name`/`color` from the roster and stamps `last_update`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMove {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport_pos: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport_scale: Option<f64>,
}

/// Ephemeral key/value live-state, last-writer-wins by `(timestamp, user_id)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub entries: BTreeMap<String, LiveStateEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveStateEntry {
    pub value: serde_json::Value,
    pub timestamp: u64,
    pub user_id: String,
}

impl LiveState {
    /// Installs `entry` at `key` iff it's newer than any entry already there, breaking ties on
    /// `user_id` the same way the CRDT tree breaks Lamport ties.
    pub fn set(&mut self, key: String, entry: LiveStateEntry) -> bool {
        match self.entries.get(&key) {
            Some(existing)
                if (existing.timestamp, &existing.user_id) >= (entry.timestamp, &entry.user_id) =>
            {
                false
            }
            _ => {
                self.entries.insert(key, entry);
                true
            }
        }
    }
}
