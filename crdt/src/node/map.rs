use super::{LiveValue, Slot, SlotState};
use crate::clock::LamportTs;
use crate::path::PathSegment;
use crate::value::{SerializedNode, Value};
use std::collections::BTreeMap;

/// An insertion-order-aware string-keyed map.
///
/// Unlike [`super::ObjectNode`], iteration order is significant: keys come out in the order
/// implied by the smallest Lamport ts ever associated with each key, not key-sorted order.
#[derive(Clone, Debug, Default)]
pub struct MapNode {
    slots: BTreeMap<String, Slot>,
}

fn bootstrap_ts(seq: u64) -> LamportTs {
    // Seeded keys need distinct, strictly increasing bootstrap timestamps so their relative
    // insertion order (the order they appeared in the source snapshot) is preserved.
    LamportTs::new(seq, "")
}

impl MapNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, key: String, value: LiveValue) {
        let seq = self.slots.len() as u64;
        self.slots
            .insert(key, Slot::new_winning(bootstrap_ts(seq), SlotState::Value(value)));
    }

    /// Returns `Some(prior)` if this write won (`prior` is the replaced state, or `None` if the
    /// key did not exist before), or `None` if the write lost.
    pub fn set(&mut self, key: &str, ts: LamportTs, value: LiveValue) -> Option<Option<SlotState>> {
        match self.slots.get_mut(key) {
            Some(slot) => slot.apply(ts, SlotState::Value(value)).map(Some),
            None => {
                self.slots
                    .insert(key.to_string(), Slot::new_winning(ts, SlotState::Value(value)));
                Some(None)
            }
        }
    }

    pub fn delete(&mut self, key: &str, ts: LamportTs) -> Option<Option<SlotState>> {
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

    fn ordered_keys(&self) -> Vec<&String> {
        let mut present: Vec<&String> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_present())
            .map(|(k, _)| k)
            .collect();
        present.sort_by_key(|k| &self.slots[*k].first_ts);
        present
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (PathSegment, &LiveValue)> {
        self.ordered_keys().into_iter().map(move |k| {
            let value = match &self.slots[k].state {
                SlotState::Value(v) => v,
                SlotState::Deleted => unreachable!("ordered_keys only yields present slots"),
            };
            (PathSegment::Key(k.clone()), value)
        })
    }

    pub fn serialize(&self) -> SerializedNode {
        let data = self
            .iter_live()
            .map(|(seg, v)| {
                let key = match seg {
                    PathSegment::Key(k) => k,
                    PathSegment::Position(_) => unreachable!(),
                };
                (key, v.serialize())
            })
            .collect::<Vec<(String, Value)>>();
        SerializedNode::OrderedMap { data }
    }
}
