use super::{LiveValue, Slot, SlotState};
use crate::clock::LamportTs;
use crate::path::PathSegment;
use crate::value::{SerializedNode, Value};
use std::collections::BTreeMap;

/// A string-keyed map of nested nodes or primitives.
#[derive(Clone, Debug, Default)]
pub struct ObjectNode {
    slots: BTreeMap<String, Slot>,
}

fn bootstrap_ts() -> LamportTs {
    LamportTs::new(0, "")
}

impl ObjectNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a field at load time (deserializing a snapshot or `storage:init`), with a
    /// timestamp older than any real op so the first real write always wins.
    pub fn seed(&mut self, key: String, value: LiveValue) {
        self.slots
            .insert(key, Slot::new_winning(bootstrap_ts(), SlotState::Value(value)));
    }

    /// `SetField(key, value, ts)`: installs iff the recorded ts at `key` is older.
    /// Returns the replaced state if this write won (`None` prior state means the key did not
    /// exist), or `None` if the write lost and nothing changed.
    pub fn set_field(&mut self, key: &str, ts: LamportTs, value: LiveValue) -> Option<Option<SlotState>> {
        match self.slots.get_mut(key) {
            Some(slot) => slot.apply(ts, SlotState::Value(value)).map(Some),
            None => {
                self.slots
                    .insert(key.to_string(), Slot::new_winning(ts, SlotState::Value(value)));
                Some(None)
            }
        }
    }

    /// `DeleteField(key, ts)`: tombstones iff younger than the recorded ts.
    pub fn delete_field(&mut self, key: &str, ts: LamportTs) -> Option<Option<SlotState>> {
        match self.slots.get_mut(key) {
            Some(slot) => slot.apply(ts, SlotState::Deleted).map(Some),
            None => {
                self.slots
                    .insert(key.to_string(), Slot::new_winning(ts, SlotState::Deleted));
                Some(None)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&LiveValue> {
        match &self.slots.get(key)?.state {
            SlotState::Value(v) => Some(v),
            SlotState::Deleted => None,
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut LiveValue> {
        match &mut self.slots.get_mut(key)?.state {
            SlotState::Value(v) => Some(v),
            SlotState::Deleted => None,
        }
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (PathSegment, &LiveValue)> {
        self.slots.iter().filter_map(|(k, slot)| match &slot.state {
            SlotState::Value(v) => Some((PathSegment::Key(k.clone()), v)),
            SlotState::Deleted => None,
        })
    }

    pub fn serialize(&self) -> SerializedNode {
        let data = self
            .slots
            .iter()
            .filter_map(|(k, slot)| match &slot.state {
                SlotState::Value(v) => Some((k.clone(), v.serialize())),
                SlotState::Deleted => None,
            })
            .collect::<BTreeMap<String, Value>>();
        SerializedNode::Object { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Primitive;

    #[test]
    fn concurrent_set_field_lww_actor_tiebreak() {
        let mut a = ObjectNode::new();
        a.seed("count".into(), LiveValue::Primitive(Primitive::Number(0.0)));
        let mut b = a.clone();

        let ts_a = LamportTs::new(5, "A");
        let ts_b = LamportTs::new(5, "B");

        // replica a sees A's write then B's write
        a.set_field("count", ts_a.clone(), LiveValue::Primitive(Primitive::Number(1.0)));
        a.set_field("count", ts_b.clone(), LiveValue::Primitive(Primitive::Number(2.0)));

        // replica b sees B's write then A's write (reverse delivery order)
        b.set_field("count", ts_b, LiveValue::Primitive(Primitive::Number(2.0)));
        b.set_field("count", ts_a, LiveValue::Primitive(Primitive::Number(1.0)));

        assert_eq!(a.serialize(), b.serialize());
        if let SerializedNode::Object { data } = a.serialize() {
            assert_eq!(data["count"], Value::Primitive(Primitive::Number(2.0)));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn delete_tombstones_only_if_younger() {
        let mut o = ObjectNode::new();
        o.set_field("x", LamportTs::new(5, "a"), LiveValue::Primitive(Primitive::Bool(true)));
        assert!(o.delete_field("x", LamportTs::new(3, "a")).is_none());
        assert!(o.get("x").is_some());
        assert!(o.delete_field("x", LamportTs::new(6, "a")).is_some());
        assert!(o.get("x").is_none());
    }
}
