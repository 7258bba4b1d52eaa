//! Operation records: the unit of both the wire protocol and the undo log.
use crate::clock::LamportTs;
use crate::path::{ListKey, Path};
use crate::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OpKind {
    SetField { value: Value },
    DeleteField,
    MapSet { value: Value },
    MapDelete,
    ListInsert {
        after: Option<ListKey>,
        before: Option<ListKey>,
        value: Value,
    },
    ListDelete,
    ListMove {
        after: Option<ListKey>,
        before: Option<ListKey>,
    },
    ReplaceSubtree { value: Value },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::SetField { .. } => "SetField",
            OpKind::DeleteField => "DeleteField",
            OpKind::MapSet { .. } => "MapSet",
            OpKind::MapDelete => "MapDelete",
            OpKind::ListInsert { .. } => "ListInsert",
            OpKind::ListDelete => "ListDelete",
            OpKind::ListMove { .. } => "ListMove",
            OpKind::ReplaceSubtree { .. } => "ReplaceSubtree",
        }
    }
}

/// One CRDT operation, addressed by path and stamped with a Lamport timestamp.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Op {
    pub id: LamportTs,
    pub path: Path,
    pub kind: OpKind,
}

impl Op {
    pub fn new(id: LamportTs, path: Path, kind: OpKind) -> Self {
        Self { id, path, kind }
    }

    /// Minimal well-formedness check applied by the server before an op is broadcast: a
    /// well-formed path, a known op kind, and a Lamport counter of at least 1.
    pub fn is_well_formed(&self) -> bool {
        self.id.counter >= 1
    }
}
