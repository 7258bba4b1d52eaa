//! Minimal inverse-op computation. Each function takes the state the write replaced and
//! produces the op that would undo it, stamped with a fresh ts supplied by the caller — undo is
//! itself a well-formed edit other replicas observe, never a replay of the original timestamp.
use crate::clock::LamportTs;
use crate::node::SlotState;
use crate::op::{Op, OpKind};
use crate::path::{ListKey, Path};
use crate::value::Value;

/// Which field-table flavour a slot write targeted, since object and ordered-map writes share
/// the same last-writer-wins mechanics but use distinct op kinds on the wire.
pub enum SlotFamily {
    Object,
    Map,
}

/// Inverse of installing `prior` being replaced by a `SetField`/`MapSet`/`DeleteField`/
/// `MapDelete`. `prior` is `None` when the key did not exist before the write that's being
/// undone.
pub fn inverse_for_slot_write(
    family: SlotFamily,
    path: &Path,
    ts: LamportTs,
    prior: Option<SlotState>,
) -> Op {
    let kind = match (family, prior) {
        (SlotFamily::Object, Some(SlotState::Value(old))) => OpKind::SetField { value: old.serialize() },
        (SlotFamily::Object, _) => OpKind::DeleteField,
        (SlotFamily::Map, Some(SlotState::Value(old))) => OpKind::MapSet { value: old.serialize() },
        (SlotFamily::Map, _) => OpKind::MapDelete,
    };
    Op::new(ts, path.to_vec(), kind)
}

/// Inverse of a list `Insert`: delete the item at the position it was assigned.
pub fn inverse_for_list_insert(list_path: &Path, assigned: &ListKey, ts: LamportTs) -> Op {
    let mut path = list_path.to_vec();
    path.push(crate::path::PathSegment::Position(assigned.clone()));
    Op::new(ts, path, OpKind::ListDelete)
}

/// Inverse of a list `Delete`: re-insert the removed value between its former neighbours.
pub fn inverse_for_list_delete(
    list_path: &Path,
    ts: LamportTs,
    after: Option<ListKey>,
    before: Option<ListKey>,
    value: Value,
) -> Op {
    Op::new(ts, list_path.to_vec(), OpKind::ListInsert { after, before, value })
}

/// Inverse of a list `Move`: move the item (now at `new_key`) back to its original neighbours.
pub fn inverse_for_list_move(
    list_path: &Path,
    new_key: &ListKey,
    ts: LamportTs,
    original_after: Option<ListKey>,
    original_before: Option<ListKey>,
) -> Op {
    let mut path = list_path.to_vec();
    path.push(crate::path::PathSegment::Position(new_key.clone()));
    Op::new(
        ts,
        path,
        OpKind::ListMove {
            after: original_after,
            before: original_before,
        },
    )
}

/// Inverse of a `ReplaceSubtree`: reinstall the value it overwrote.
pub fn inverse_for_replace(path: &Path, ts: LamportTs, old: Value) -> Op {
    Op::new(ts, path.to_vec(), OpKind::ReplaceSubtree { value: old })
}
