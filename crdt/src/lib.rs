//! The CRDT storage tree: Lamport clock, the three node kinds (object/ordered map/ordered
//! list), the document that roots them, mutation scopes with inverse-op capture, and per-client
//! undo/redo history.

pub mod clock;
pub mod cursor;
pub mod doc;
pub mod error;
pub mod fraction;
pub mod history;
pub mod inverse;
pub mod node;
pub mod op;
pub mod path;
pub mod subscriber;
pub mod value;

pub use clock::{Clock, LamportTs};
pub use cursor::NodeRef;
pub use doc::{MutationOutcome, MutationScope, StorageDocument};
pub use error::{Error, Result};
pub use history::{Batch, History};
pub use node::{LiveValue, NodeKind};
pub use op::{Op, OpKind};
pub use path::{ListKey, Path, PathSegment};
pub use subscriber::{Callback, SubscriptionId};
pub use value::{Primitive, SerializedNode, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc_from(actor: &str) -> StorageDocument {
        StorageDocument::new(actor)
    }

    #[test]
    fn scenario_1_concurrent_set_field_lww_converges_on_tiebreak() {
        // Initial root {count: 0}.
        let mut a = doc_from("replica");
        a.mutate(|s| s.set_field(&Vec::new(), "count", Value::Primitive(Primitive::Number(0.0))))
            .unwrap();
        let mut b = StorageDocument::from_serialized("replica", a.serialize());

        // Actor A sends SetField("count", 1) with ts (5, "A"); actor B sends ts (5, "B").
        // Both replicas see both ops, in opposite delivery orders.
        let op_a = Op::new(
            LamportTs::new(5, "A"),
            vec![PathSegment::Key("count".into())],
            OpKind::SetField {
                value: Value::Primitive(Primitive::Number(1.0)),
            },
        );
        let op_b = Op::new(
            LamportTs::new(5, "B"),
            vec![PathSegment::Key("count".into())],
            OpKind::SetField {
                value: Value::Primitive(Primitive::Number(2.0)),
            },
        );
        a.apply_remote_ops(&[op_a.clone(), op_b.clone()]);
        b.apply_remote_ops(&[op_b, op_a]);

        assert_eq!(a.serialize(), b.serialize());
        if let SerializedNode::Object { data } = a.serialize() {
            assert_eq!(data["count"], Value::Primitive(Primitive::Number(2.0)));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn scenario_2_cursor_detaches_after_subtree_replacement() {
        let mut doc = doc_from("a");
        doc.mutate(|s| {
            s.set_field(&Vec::new(), "box", Value::Node(SerializedNode::empty_object()))?;
            s.set_field(
                &vec![PathSegment::Key("box".into())],
                "inner",
                Value::Node(SerializedNode::empty_object()),
            )?;
            s.set_field(
                &vec![PathSegment::Key("box".into()), PathSegment::Key("inner".into())],
                "v",
                Value::Primitive(Primitive::Number(1.0)),
            )
        })
        .unwrap();

        let inner_path = vec![PathSegment::Key("box".into()), PathSegment::Key("inner".into())];
        let handle = doc.cursor(&inner_path).expect("inner node registered");
        assert!(doc.is_attached(&handle));

        doc.mutate(|s| {
            s.replace_subtree(
                &vec![PathSegment::Key("box".into())],
                Value::Node(SerializedNode::empty_object()),
            )
        })
        .unwrap();

        assert!(!doc.is_attached(&handle));
    }

    #[test]
    fn scenario_4_undo_after_remote_interleave() {
        let mut doc = doc_from("A");
        let outcome = doc
            .mutate(|s| s.set_field(&Vec::new(), "x", Value::Primitive(Primitive::Number(1.0))))
            .unwrap();
        let mut history = History::new();
        history.push(outcome.inverse);

        // B does SetField("y", 2) remotely.
        doc.apply_remote_ops(&[Op::new(
            LamportTs::new(10, "B"),
            vec![PathSegment::Key("y".into())],
            OpKind::SetField {
                value: Value::Primitive(Primitive::Number(2.0)),
            },
        )]);

        // A undoes: applies the inverse of SetField("x", 1), i.e. DeleteField("x"), under a
        // fresh ts, and the resulting inverse-of-the-inverse becomes the redo batch.
        let inverse_batch = history.pop_undo().unwrap();
        let undo_outcome = doc
            .mutate(|s| {
                for op in &inverse_batch {
                    s.apply_captured(op)?;
                }
                Ok(())
            })
            .unwrap();
        history.push_redo(undo_outcome.inverse);

        if let SerializedNode::Object { data } = doc.serialize() {
            assert!(!data.contains_key("x"));
            assert_eq!(data["y"], Value::Primitive(Primitive::Number(2.0)));
        } else {
            unreachable!();
        }

        // redo restores x.
        let redo_batch = history.pop_redo().unwrap();
        doc.mutate(|s| {
            for op in &redo_batch {
                s.apply_captured(op)?;
            }
            Ok(())
        })
        .unwrap();
        if let SerializedNode::Object { data } = doc.serialize() {
            assert_eq!(data["x"], Value::Primitive(Primitive::Number(1.0)));
            assert_eq!(data["y"], Value::Primitive(Primitive::Number(2.0)));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn mutation_scope_rolls_back_on_error() {
        let mut doc = doc_from("a");
        doc.mutate(|s| s.set_field(&Vec::new(), "x", Value::Primitive(Primitive::Number(1.0))))
            .unwrap();

        let result: Result<()> = doc.mutate(|s| {
            s.set_field(&Vec::new(), "x", Value::Primitive(Primitive::Number(99.0)))?;
            // fails deliberately: no such object at this path.
            s.set_field(&vec![PathSegment::Key("missing".into())], "y", Value::null())?;
            Ok(())
        }).map(|o| o.value);

        assert!(result.is_err());
        if let SerializedNode::Object { data } = doc.serialize() {
            assert_eq!(data["x"], Value::Primitive(Primitive::Number(1.0)));
        } else {
            unreachable!();
        }
    }

    proptest! {
        #[test]
        fn lamport_monotonicity_after_remote_apply(seen in 0u64..10_000) {
            let mut doc = doc_from("a");
            doc.apply_remote_ops(&[Op::new(
                LamportTs::new(seen, "b"),
                vec![PathSegment::Key("x".into())],
                OpKind::SetField { value: Value::Primitive(Primitive::Number(1.0)) },
            )]);
            // Re-applying a SetField with a local tick must carry a counter strictly greater
            // than `seen`.
            let outcome = doc.mutate(|s| s.set_field(&Vec::new(), "x", Value::Primitive(Primitive::Number(2.0)))).unwrap();
            prop_assert!(outcome.applied[0].id.counter > seen);
        }
    }
}
