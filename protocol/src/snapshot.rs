//! The persisted and reconnect-replay form of a room: the CRDT root plus the opaque secondary
//! CRDT blob, exactly what a `storage:init` frame carries.
use lively_crdt::SerializedNode;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub root: SerializedNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yjs: Option<YjsPayload>,
    pub updated_at: u64,
}

impl Snapshot {
    pub fn empty(updated_at: u64) -> Self {
        Self {
            root: SerializedNode::empty_object(),
            yjs: None,
            updated_at,
        }
    }
}

/// An opaque secondary-CRDT byte blob, base64-encoded on the wire and in persisted JSON. The
/// server never inspects these bytes; it only combines them with a host-supplied merge
/// function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct YjsPayload(#[serde(with = "base64_bytes")] pub Vec<u8>);

impl YjsPayload {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        base64::encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        base64::decode(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yjs_payload_round_trips_as_base64_json_string() {
        let payload = YjsPayload(vec![1, 2, 3, 255]);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, format!("\"{}\"", base64::encode([1, 2, 3, 255])));
        let back: YjsPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snap = Snapshot {
            root: SerializedNode::empty_object(),
            yjs: Some(YjsPayload(vec![9, 9])),
            updated_at: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"updatedAt\":1700000000000"), "got {json}");
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
