//! Per-client undo/redo. Never persisted, never crosses room rejoins.
use crate::op::Op;

/// One undoable unit: a batch of inverse ops captured during a single mutation scope.
pub type Batch = Vec<Op>;

#[derive(Default)]
pub struct History {
    undo: Vec<Batch>,
    redo: Vec<Batch>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a freshly-captured inverse batch onto the undo stack and clears redo.
    pub fn push(&mut self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        self.undo.push(batch);
        self.redo.clear();
    }

    /// Pops the top undo batch. The caller is responsible for applying it and pushing the
    /// resulting forward batch via [`History::push_redo`].
    pub fn pop_undo(&mut self) -> Option<Batch> {
        self.undo.pop()
    }

    pub fn push_redo(&mut self, batch: Batch) {
        if !batch.is_empty() {
            self.redo.push(batch);
        }
    }

    /// Pushes a freshly-captured inverse batch onto the undo stack without touching redo, for
    /// the caller applying a `pop_redo` batch: redoing one step shouldn't discard any remaining
    /// redo entries the way a fresh edit does.
    pub fn push_undo_from_redo(&mut self, batch: Batch) {
        if !batch.is_empty() {
            self.undo.push(batch);
        }
    }

    pub fn pop_redo(&mut self) -> Option<Batch> {
        self.redo.pop()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LamportTs;
    use crate::op::OpKind;

    fn op(n: u64) -> Op {
        Op::new(LamportTs::new(n, "a"), Vec::new(), OpKind::DeleteField)
    }

    #[test]
    fn push_clears_redo() {
        let mut h = History::new();
        h.push(vec![op(1)]);
        h.push_redo(vec![op(2)]);
        assert!(h.can_redo());
        h.push(vec![op(3)]);
        assert!(!h.can_redo());
    }

    #[test]
    fn empty_batches_are_not_pushed() {
        let mut h = History::new();
        h.push(Vec::new());
        assert!(!h.can_undo());
    }

    #[test]
    fn redoing_one_step_preserves_the_remaining_redo_stack() {
        let mut h = History::new();
        h.push(vec![op(1)]);
        h.push(vec![op(2)]);
        h.pop_undo(); // undo op 2
        h.push_redo(vec![op(2)]);
        h.pop_undo(); // undo op 1
        h.push_redo(vec![op(1)]);
        assert_eq!(h.redo.len(), 2);

        let batch = h.pop_redo().unwrap(); // redo op 1
        h.push_undo_from_redo(batch);
        assert!(h.can_redo());
        assert_eq!(h.redo.len(), 1);
    }
}
