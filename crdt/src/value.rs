//! The portable (wire + persisted) form of the CRDT tree.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A JSON-ish primitive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// Either a primitive or a nested node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Primitive(Primitive),
    Node(SerializedNode),
}

impl Value {
    pub fn null() -> Self {
        Value::Primitive(Primitive::Null)
    }

    pub fn as_node(&self) -> Option<&SerializedNode> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }
}

impl From<Primitive> for Value {
    fn from(p: Primitive) -> Self {
        Value::Primitive(p)
    }
}

impl From<SerializedNode> for Value {
    fn from(n: SerializedNode) -> Self {
        Value::Node(n)
    }
}

/// A serialized CRDT node — the pure function of the applied-op log for a node's subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SerializedNode {
    #[serde(rename = "object")]
    Object { data: BTreeMap<String, Value> },
    /// Declared key order (`Vec` preserves it) is meaningful on replay.
    #[serde(rename = "orderedMap")]
    OrderedMap { data: Vec<(String, Value)> },
    #[serde(rename = "orderedList")]
    OrderedList { items: Vec<Value> },
}

impl SerializedNode {
    pub fn empty_object() -> Self {
        SerializedNode::Object {
            data: BTreeMap::new(),
        }
    }

    pub fn empty_map() -> Self {
        SerializedNode::OrderedMap { data: Vec::new() }
    }

    pub fn empty_list() -> Self {
        SerializedNode::OrderedList { items: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut data = BTreeMap::new();
        data.insert("count".to_string(), Value::Primitive(Primitive::Number(1.0)));
        data.insert(
            "nested".to_string(),
            Value::Node(SerializedNode::OrderedList {
                items: vec![Value::Primitive(Primitive::String("a".into()))],
            }),
        );
        let node = SerializedNode::Object { data };
        let json = serde_json::to_string(&node).unwrap();
        let back: SerializedNode = serde_json::from_str(&json).unwrap();
        assert_eq!(node, back);
    }
}
