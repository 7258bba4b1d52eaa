//! The three CRDT node kinds, collapsed into a tagged variant.
mod list;
mod map;
mod object;

pub use list::ListNode;
pub use map::MapNode;
pub use object::ObjectNode;

use crate::clock::LamportTs;
use crate::value::{Primitive, SerializedNode, Value};

/// A live value: either a primitive, or a nested, independently-addressable node.
#[derive(Clone, Debug)]
pub enum LiveValue {
    Primitive(Primitive),
    Node(NodeKind),
}

impl LiveValue {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Primitive(p) => LiveValue::Primitive(p),
            Value::Node(n) => LiveValue::Node(NodeKind::from_serialized(n)),
        }
    }

    pub fn serialize(&self) -> Value {
        match self {
            LiveValue::Primitive(p) => Value::Primitive(p.clone()),
            LiveValue::Node(n) => Value::Node(n.serialize()),
        }
    }

    pub fn as_node(&self) -> Option<&NodeKind> {
        match self {
            LiveValue::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut NodeKind> {
        match self {
            LiveValue::Node(n) => Some(n),
            _ => None,
        }
    }
}

/// A slot's value or tombstone state, paired with the timestamp that last won it.
#[derive(Clone, Debug)]
pub enum SlotState {
    Deleted,
    Value(LiveValue),
}

/// One entry in an object or ordered-map's field table.
///
/// `first_ts` is the smallest Lamport ts ever associated with the key, kept up to date on every
/// write (winning or losing) so it stays order-independent; [`MapNode`] uses it to compute
/// canonical insertion order. `ts` is the timestamp of whichever write currently wins the
/// slot's last-writer-wins comparison.
#[derive(Clone, Debug)]
pub struct Slot {
    pub ts: LamportTs,
    pub first_ts: LamportTs,
    pub state: SlotState,
}

impl Slot {
    /// Applies an incoming (ts, state) pair, installing it only if `ts` is newer than the
    /// slot's currently recorded ts. Returns the replaced state (for inverse capture) if the
    /// incoming write won, or `None` if it lost and the slot is unchanged. `first_ts` is
    /// minimized against the incoming ts regardless of which way the write goes.
    pub fn apply(&mut self, ts: LamportTs, state: SlotState) -> Option<SlotState> {
        if ts < self.first_ts {
            self.first_ts = ts.clone();
        }
        if ts > self.ts {
            self.ts = ts;
            Some(std::mem::replace(&mut self.state, state))
        } else {
            None
        }
    }

    pub fn new_winning(ts: LamportTs, state: SlotState) -> Self {
        Self {
            ts: ts.clone(),
            first_ts: ts,
            state,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self.state, SlotState::Value(_))
    }
}

/// The three node kinds, as a tagged union rather than a trait-object hierarchy.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Object(ObjectNode),
    Map(MapNode),
    List(ListNode),
}

impl NodeKind {
    pub fn empty_object() -> Self {
        NodeKind::Object(ObjectNode::new())
    }

    pub fn empty_map() -> Self {
        NodeKind::Map(MapNode::new())
    }

    pub fn empty_list() -> Self {
        NodeKind::List(ListNode::new())
    }

    pub fn from_serialized(node: SerializedNode) -> Self {
        match node {
            SerializedNode::Object { data } => {
                let mut o = ObjectNode::new();
                for (k, v) in data {
                    o.seed(k, LiveValue::from_value(v));
                }
                NodeKind::Object(o)
            }
            SerializedNode::OrderedMap { data } => {
                let mut m = MapNode::new();
                for (k, v) in data {
                    m.seed(k, LiveValue::from_value(v));
                }
                NodeKind::Map(m)
            }
            SerializedNode::OrderedList { items } => {
                let mut l = ListNode::new();
                for v in items {
                    l.seed(LiveValue::from_value(v));
                }
                NodeKind::List(l)
            }
        }
    }

    pub fn serialize(&self) -> SerializedNode {
        match self {
            NodeKind::Object(o) => o.serialize(),
            NodeKind::Map(m) => m.serialize(),
            NodeKind::List(l) => l.serialize(),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectNode> {
        match self {
            NodeKind::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut ObjectNode> {
        match self {
            NodeKind::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut MapNode> {
        match self {
            NodeKind::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut ListNode> {
        match self {
            NodeKind::List(l) => Some(l),
            _ => None,
        }
    }

    /// Visits every descendant node (including `self`) paired with its path relative to
    /// `self`, used by the document to (re)build the path→node-id registry when a subtree is
    /// attached wholesale.
    pub fn walk(&self, mut visit: impl FnMut(&[crate::path::PathSegment], &NodeKind)) {
        fn go(
            prefix: &mut Vec<crate::path::PathSegment>,
            node: &NodeKind,
            visit: &mut impl FnMut(&[crate::path::PathSegment], &NodeKind),
        ) {
            visit(prefix, node);
            let children: Vec<(crate::path::PathSegment, &LiveValue)> = match node {
                NodeKind::Object(o) => o.iter_live().collect(),
                NodeKind::Map(m) => m.iter_live().collect(),
                NodeKind::List(l) => l.iter_live().collect(),
            };
            for (seg, value) in children {
                if let LiveValue::Node(child) = value {
                    prefix.push(seg);
                    go(prefix, child, visit);
                    prefix.pop();
                }
            }
        }
        let mut prefix = Vec::new();
        go(&mut prefix, self, &mut visit);
    }
}
