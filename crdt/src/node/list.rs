use super::{LiveValue, SlotState};
use crate::clock::LamportTs;
use crate::fraction::Fraction;
use crate::path::{ListKey, PathSegment};
use crate::value::{SerializedNode, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
struct ListSlot {
    ts: LamportTs,
    state: SlotState,
}

/// A positional sequence of nodes or primitives, keyed by dense fractional positions.
#[derive(Clone, Debug, Default)]
pub struct ListNode {
    items: BTreeMap<ListKey, ListSlot>,
}

/// Chooses a position strictly between `after` and `before`, or relative to the list's
/// virtual head/tail when either is absent.
fn pick_position(after: Option<&Fraction>, before: Option<&Fraction>) -> Fraction {
    match (after, before) {
        (None, None) => Fraction::half(),
        (None, Some(b)) => Fraction::zero().mid(b),
        (Some(a), None) => a.succ(),
        (Some(a), Some(b)) => a.mid(b),
    }
}

impl ListNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds initial items at load time with a monotonically increasing, bootstrap-tiebroken
    /// position sequence.
    pub fn seed(&mut self, value: LiveValue) {
        let pos = match self.items.keys().next_back() {
            Some(last) => last.pos.succ(),
            None => Fraction::half(),
        };
        let seq = self.items.len() as u64;
        let key = ListKey::new(pos, LamportTs::new(seq, ""));
        self.items.insert(key, ListSlot {
            ts: LamportTs::new(seq, ""),
            state: SlotState::Value(value),
        });
    }

    /// `Insert(afterPos, beforePos, value, ts)`. Returns the assigned key.
    pub fn insert(
        &mut self,
        after: Option<&ListKey>,
        before: Option<&ListKey>,
        ts: LamportTs,
        value: LiveValue,
    ) -> ListKey {
        let pos = pick_position(after.map(|k| &k.pos), before.map(|k| &k.pos));
        let key = ListKey::new(pos, ts.clone());
        self.items
            .entry(key.clone())
            .or_insert(ListSlot {
                ts,
                state: SlotState::Value(value),
            });
        key
    }

    /// `Delete(pos, ts)`. Returns `true` if the item existed and is now tombstoned (was not
    /// already tombstoned).
    pub fn delete(&mut self, key: &ListKey, ts: LamportTs) -> bool {
        match self.items.get_mut(key) {
            Some(slot) if slot.is_present() => {
                slot.ts = ts;
                slot.state = SlotState::Deleted;
                true
            }
            _ => false,
        }
    }

    /// `Move(pos -> afterPos,beforePos, ts)`: atomically delete the item at `key` and
    /// re-insert its value at the new position. Returns the new key, or `None` if `key` did
    /// not resolve to a present item.
    pub fn move_item(
        &mut self,
        key: &ListKey,
        after: Option<&ListKey>,
        before: Option<&ListKey>,
        ts: LamportTs,
    ) -> Option<ListKey> {
        let value = match self.items.get(key) {
            Some(slot) if slot.is_present() => match &slot.state {
                SlotState::Value(v) => v.clone(),
                SlotState::Deleted => unreachable!(),
            },
            _ => return None,
        };
        if let Some(slot) = self.items.get_mut(key) {
            slot.state = SlotState::Deleted;
        }
        Some(self.insert(after, before, ts, value))
    }

    pub fn get(&self, key: &ListKey) -> Option<&LiveValue> {
        match &self.items.get(key)?.state {
            SlotState::Value(v) => Some(v),
            SlotState::Deleted => None,
        }
    }

    pub fn get_mut(&mut self, key: &ListKey) -> Option<&mut LiveValue> {
        match &mut self.items.get_mut(key)?.state {
            SlotState::Value(v) => Some(v),
            SlotState::Deleted => None,
        }
    }

    /// The smallest present key greater than `key` (used to find the original "before"
    /// neighbour of an item about to be moved or deleted).
    pub fn next_present_after(&self, key: Option<&ListKey>) -> Option<&ListKey> {
        let range = match key {
            Some(k) => self.items.range((
                std::ops::Bound::Excluded(k.clone()),
                std::ops::Bound::Unbounded,
            )),
            None => self.items.range(..),
        };
        range
            .filter(|(_, slot)| slot.is_present())
            .map(|(k, _)| k)
            .next()
    }

    pub fn prev_present_before(&self, key: Option<&ListKey>) -> Option<&ListKey> {
        let range = match key {
            Some(k) => self
                .items
                .range((std::ops::Bound::Unbounded, std::ops::Bound::Excluded(k.clone()))),
            None => self.items.range(..),
        };
        range
            .filter(|(_, slot)| slot.is_present())
            .map(|(k, _)| k)
            .next_back()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (PathSegment, &LiveValue)> {
        self.items.iter().filter_map(|(k, slot)| match &slot.state {
            SlotState::Value(v) => Some((PathSegment::Position(k.clone()), v)),
            SlotState::Deleted => None,
        })
    }

    pub fn serialize(&self) -> SerializedNode {
        let items = self
            .iter_live()
            .map(|(_, v)| v.serialize())
            .collect::<Vec<Value>>();
        SerializedNode::OrderedList { items }
    }
}

impl ListSlot {
    fn is_present(&self) -> bool {
        matches!(self.state, SlotState::Value(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Primitive;

    fn prim(s: &str) -> LiveValue {
        LiveValue::Primitive(Primitive::String(s.to_string()))
    }

    #[test]
    fn concurrent_insert_converges_by_actor_tiebreak() {
        let mut base = ListNode::new();
        let ka = base.insert(None, None, LamportTs::new(1, "x"), prim("a"));
        let kc = base.insert(Some(&ka), None, LamportTs::new(2, "x"), prim("c"));

        let mut r1 = base.clone();
        let mut r2 = base.clone();

        let kb1 = r1.insert(Some(&ka), Some(&kc), LamportTs::new(3, "A"), prim("b"));
        let kb2 = r2.insert(Some(&ka), Some(&kc), LamportTs::new(3, "B"), prim("b'"));

        // deliver both inserts to both replicas, in opposite orders
        r1.insert(Some(&ka), Some(&kc), LamportTs::new(3, "B"), prim("b'"));
        r2.insert(Some(&ka), Some(&kc), LamportTs::new(3, "A"), prim("b"));
        assert_ne!(kb1, kb2);

        let vals = |l: &ListNode| -> Vec<String> {
            l.iter_live()
                .map(|(_, v)| match v {
                    LiveValue::Primitive(Primitive::String(s)) => s.clone(),
                    _ => unreachable!(),
                })
                .collect()
        };
        assert_eq!(vals(&r1), vec!["a", "b", "b'", "c"]);
        assert_eq!(vals(&r1), vals(&r2));
    }

    #[test]
    fn move_preserves_value_at_new_position() {
        let mut l = ListNode::new();
        let ka = l.insert(None, None, LamportTs::new(1, "x"), prim("a"));
        let kb = l.insert(Some(&ka), None, LamportTs::new(2, "x"), prim("b"));
        let kc = l.insert(Some(&kb), None, LamportTs::new(3, "x"), prim("c"));

        let new_b = l.move_item(&kb, None, Some(&ka), LamportTs::new(4, "x")).unwrap();
        let vals: Vec<String> = l
            .iter_live()
            .map(|(_, v)| match v {
                LiveValue::Primitive(Primitive::String(s)) => s.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(vals, vec!["b", "a", "c"]);
        assert!(l.get(&new_b).is_some());
        assert!(l.get(&kc).is_some());
    }
}
