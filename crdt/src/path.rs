//! Addressing into the storage tree: object/map keys and list positions.
use crate::clock::LamportTs;
use crate::fraction::Fraction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dense fractional position for an ordered-list element, tie-broken by the inserter's
/// Lamport timestamp (spec: "Ties in chosen key are broken by the inserter's Lamport ts").
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ListKey {
    pub pos: Fraction,
    pub tiebreak: LamportTs,
}

impl ListKey {
    pub fn new(pos: Fraction, tiebreak: LamportTs) -> Self {
        Self { pos, tiebreak }
    }
}

impl fmt::Debug for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{:?}", self.pos, self.tiebreak)
    }
}

/// One segment of a path from the document root.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum PathSegment {
    Key(String),
    Position(ListKey),
}

impl fmt::Debug for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, ".{}", k),
            Self::Position(p) => write!(f, "[{:?}]", p),
        }
    }
}

/// A path from the document root to some node or primitive.
pub type Path = Vec<PathSegment>;

pub fn path_string(path: &Path) -> String {
    let mut out = String::from("$");
    for seg in path {
        match seg {
            PathSegment::Key(k) => {
                out.push('.');
                out.push_str(k);
            }
            PathSegment::Position(p) => {
                out.push('[');
                out.push_str(&format!("{:?}", p));
                out.push(']');
            }
        }
    }
    out
}
