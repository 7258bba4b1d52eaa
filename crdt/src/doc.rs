//! The storage document: clock ownership, the attached tree, mutation scopes and remote-op
//! application.
use crate::clock::{Clock, LamportTs};
use crate::cursor::{NodeRef, NodeRegistry};
use crate::error::{Error, Result};
use crate::node::{LiveValue, NodeKind, SlotState};
use crate::op::{Op, OpKind};
use crate::path::{Path, PathSegment};
use crate::subscriber::{Callback, SubscriberRegistry, SubscriptionId};
use crate::value::Value;

/// What a completed outermost [`StorageDocument::mutate`] call produced: the forward ops that
/// actually changed the tree (to broadcast to peers) and their inverses (to push onto the
/// caller's undo history). Empty on every call except the outermost of a nested chain.
#[derive(Default)]
pub struct MutationOutcome<T> {
    pub value: T,
    pub applied: Vec<Op>,
    pub inverse: Vec<Op>,
}

/// Roots the CRDT tree. One per room, owned by the client's `Room` or the server's room actor.
pub struct StorageDocument {
    clock: Clock,
    root: NodeKind,
    registry: NodeRegistry,
    subscribers: SubscriberRegistry,
    scope_depth: u32,
    notifying: bool,
    batch_applied: Vec<Op>,
    batch_inverse: Vec<Op>,
    touched: Vec<Path>,
}

impl StorageDocument {
    pub fn new(actor: impl Into<String>) -> Self {
        let root = NodeKind::empty_object();
        let mut registry = NodeRegistry::new();
        registry.register(&Vec::new(), &root);
        Self {
            clock: Clock::new(actor),
            root,
            registry,
            subscribers: SubscriberRegistry::new(),
            scope_depth: 0,
            notifying: false,
            batch_applied: Vec::new(),
            batch_inverse: Vec::new(),
            touched: Vec::new(),
        }
    }

    /// Loads from a previously serialized tree, e.g. a `storage:init` payload or a snapshot.
    pub fn from_serialized(actor: impl Into<String>, serialized: crate::value::SerializedNode) -> Self {
        let root = NodeKind::from_serialized(serialized);
        let mut registry = NodeRegistry::new();
        registry.register(&Vec::new(), &root);
        Self {
            clock: Clock::new(actor),
            root,
            registry,
            subscribers: SubscriberRegistry::new(),
            scope_depth: 0,
            notifying: false,
            batch_applied: Vec::new(),
            batch_inverse: Vec::new(),
            touched: Vec::new(),
        }
    }

    pub fn serialize(&self) -> crate::value::SerializedNode {
        self.root.serialize()
    }

    pub fn actor(&self) -> &str {
        self.clock.actor()
    }

    /// Takes a handle to the node at `path` that reports `attached == false` once that path is
    /// replaced out from under it.
    pub fn cursor(&self, path: &Path) -> Option<NodeRef> {
        let id = self.registry.get(path)?;
        Some(NodeRef::new(path.clone(), id))
    }

    pub fn is_attached(&self, node_ref: &NodeRef) -> bool {
        node_ref.is_attached(&self.registry)
    }

    pub fn subscribe(&mut self, path: &Path, deep: bool, callback: Callback) -> SubscriptionId {
        self.subscribers.subscribe(path, deep, callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    /// Runs `f` inside a mutation scope. On success at the outermost scope, the accumulated
    /// inverse batch is returned for the caller to push onto undo history and the forward ops
    /// are returned for broadcast. On failure, already-applied local ops are rolled back by
    /// applying their inverses in reverse order, and nothing is left in the batches. Nested
    /// calls flatten into the outermost: an inner call's forward/inverse ops simply accumulate
    /// into the same batches and its `MutationOutcome` carries empty batches of its own.
    pub fn mutate<F, T>(&mut self, f: F) -> Result<MutationOutcome<T>>
    where
        F: FnOnce(&mut MutationScope) -> Result<T>,
    {
        if self.notifying {
            return Err(Error::ReentrantMutation);
        }
        let is_outermost = self.scope_depth == 0;
        let applied_mark = self.batch_applied.len();
        let inverse_mark = self.batch_inverse.len();
        let touched_mark = self.touched.len();

        self.scope_depth += 1;
        let mut scope = MutationScope { doc: self };
        let result = f(&mut scope);
        self.scope_depth -= 1;

        match result {
            Ok(value) => {
                if is_outermost {
                    let applied = self.batch_applied.split_off(applied_mark);
                    let inverse = self.batch_inverse.split_off(inverse_mark);
                    self.flush_notifications();
                    Ok(MutationOutcome { value, applied, inverse })
                } else {
                    Ok(MutationOutcome {
                        value,
                        applied: Vec::new(),
                        inverse: Vec::new(),
                    })
                }
            }
            Err(e) => {
                if is_outermost {
                    let to_undo = self.batch_inverse.split_off(inverse_mark);
                    self.batch_applied.truncate(applied_mark);
                    self.touched.truncate(touched_mark);
                    for mut inverse_op in to_undo.into_iter().rev() {
                        // Re-stamp with a fresh ts so the rollback write always wins the LWW
                        // comparison against the just-applied op it's undoing, regardless of
                        // the ts the inverse was originally captured with.
                        inverse_op.id = self.clock.tick();
                        // Applying our own just-captured inverses can't fail: they address
                        // paths and node kinds we just successfully wrote to.
                        let _ = self.apply_one(&inverse_op, false);
                    }
                    self.touched.truncate(touched_mark);
                }
                Err(e)
            }
        }
    }

    /// Applies a batch of ops received from the server, advancing the clock for each and
    /// flushing subscriber notifications once at the end.
    pub fn apply_remote_ops(&mut self, ops: &[Op]) {
        let mut touched = Vec::with_capacity(ops.len());
        for op in ops {
            self.clock.observe(&op.id);
            if !op.is_well_formed() {
                tracing::warn!(kind = op.kind.name(), "dropping malformed remote op");
                continue;
            }
            match self.apply_one(op, true) {
                Ok(Some(path)) => touched.push(path),
                Ok(None) => {}
                Err(e) => tracing::warn!(kind = op.kind.name(), error = %e, "remote op failed to apply"),
            }
        }
        self.subscribers.notify_paths_changed(&touched);
    }

    /// Applies one op to the tree. `registry_updates` is false when replaying a just-captured
    /// inverse during rollback, where the registry was already restored by the original apply.
    fn apply_one(&mut self, op: &Op, registry_updates: bool) -> Result<Option<Path>> {
        match &op.kind {
            OpKind::SetField { value } => self.apply_field_write(&op.path, op.id.clone(), value.clone(), registry_updates, true),
            OpKind::DeleteField => self.apply_field_delete(&op.path, op.id.clone(), true),
            OpKind::MapSet { value } => self.apply_field_write(&op.path, op.id.clone(), value.clone(), registry_updates, false),
            OpKind::MapDelete => self.apply_field_delete(&op.path, op.id.clone(), false),
            OpKind::ListInsert { after, before, value } => {
                self.apply_list_insert(&op.path, op.id.clone(), after.clone(), before.clone(), value.clone(), registry_updates)
                    .map(Some)
            }
            OpKind::ListDelete => self.apply_list_delete(&op.path, op.id.clone()),
            OpKind::ListMove { after, before } => {
                self.apply_list_move(&op.path, op.id.clone(), after.clone(), before.clone())
            }
            OpKind::ReplaceSubtree { value } => {
                self.apply_replace(&op.path, op.id.clone(), value.clone(), registry_updates).map(Some)
            }
        }
    }

    fn resolve_node_mut(&mut self, path: &Path) -> Result<&mut NodeKind> {
        let mut current = &mut self.root;
        for seg in path {
            let live = match (current, seg) {
                (NodeKind::Object(o), PathSegment::Key(k)) => o.get_mut(k),
                (NodeKind::Map(m), PathSegment::Key(k)) => m.get_mut(k),
                (NodeKind::List(l), PathSegment::Position(p)) => l.get_mut(p),
                _ => return Err(Error::wrong_node_kind(path, "path segment")),
            };
            current = live
                .ok_or_else(|| Error::path_not_found(path))?
                .as_node_mut()
                .ok_or_else(|| Error::path_not_found(path))?;
        }
        Ok(current)
    }

    fn split_last(path: &Path) -> Result<(Path, &PathSegment)> {
        match path.split_last() {
            Some((last, parent)) => Ok((parent.to_vec(), last)),
            None => Err(Error::path_not_found(path)),
        }
    }

    fn apply_field_write(
        &mut self,
        path: &Path,
        ts: LamportTs,
        value: Value,
        track_registry: bool,
        object_family: bool,
    ) -> Result<Option<Path>> {
        let (parent_path, last) = Self::split_last(path)?;
        let key = match last {
            PathSegment::Key(k) => k.clone(),
            PathSegment::Position(_) => return Err(Error::wrong_node_kind(path, "expected key segment")),
        };
        let live = LiveValue::from_value(value);
        let new_node_copy = live.as_node().cloned();
        let parent = self.resolve_node_mut(&parent_path)?;
        let outcome = match parent {
            NodeKind::Object(o) if object_family => o.set_field(&key, ts, live),
            NodeKind::Map(m) if !object_family => m.set(&key, ts, live),
            _ => return Err(Error::wrong_node_kind(path, "object/map field write")),
        };
        match outcome {
            Some(prior) => {
                if track_registry {
                    self.registry.unregister_subtree(path);
                    if let Some(node) = new_node_copy {
                        self.registry.register(path, &node);
                    }
                }
                let _ = prior;
                self.touched.push(path.clone());
                Ok(Some(path.clone()))
            }
            None => Ok(None),
        }
    }

    fn apply_field_delete(&mut self, path: &Path, ts: LamportTs, object_family: bool) -> Result<Option<Path>> {
        let (parent_path, last) = Self::split_last(path)?;
        let key = match last {
            PathSegment::Key(k) => k.clone(),
            PathSegment::Position(_) => return Err(Error::wrong_node_kind(path, "expected key segment")),
        };
        let parent = self.resolve_node_mut(&parent_path)?;
        let outcome = match parent {
            NodeKind::Object(o) if object_family => o.delete_field(&key, ts),
            NodeKind::Map(m) if !object_family => m.delete(&key, ts),
            _ => return Err(Error::wrong_node_kind(path, "object/map field delete")),
        };
        match outcome {
            Some(_) => {
                self.registry.unregister_subtree(path);
                self.touched.push(path.clone());
                Ok(Some(path.clone()))
            }
            None => Ok(None),
        }
    }

    fn apply_list_insert(
        &mut self,
        list_path: &Path,
        ts: LamportTs,
        after: Option<crate::path::ListKey>,
        before: Option<crate::path::ListKey>,
        value: Value,
        track_registry: bool,
    ) -> Result<Path> {
        let live = LiveValue::from_value(value);
        let new_node_copy = live.as_node().cloned();
        let list = self
            .resolve_node_mut(list_path)?
            .as_list_mut()
            .ok_or_else(|| Error::wrong_node_kind(list_path, "list insert"))?;
        let key = list.insert(after.as_ref(), before.as_ref(), ts, live);
        let mut item_path = list_path.clone();
        item_path.push(PathSegment::Position(key));
        if track_registry {
            if let Some(node) = new_node_copy {
                self.registry.register(&item_path, &node);
            }
        }
        self.touched.push(list_path.clone());
        Ok(item_path)
    }

    fn apply_list_delete(&mut self, item_path: &Path, ts: LamportTs) -> Result<Option<Path>> {
        let (list_path, last) = Self::split_last(item_path)?;
        let key = match last {
            PathSegment::Position(k) => k.clone(),
            PathSegment::Key(_) => return Err(Error::wrong_node_kind(item_path, "expected list position")),
        };
        let list = self
            .resolve_node_mut(&list_path)?
            .as_list_mut()
            .ok_or_else(|| Error::wrong_node_kind(&list_path, "list delete"))?;
        if list.delete(&key, ts) {
            self.registry.unregister_subtree(item_path);
            self.touched.push(list_path.clone());
            Ok(Some(list_path))
        } else {
            Ok(None)
        }
    }

    fn apply_list_move(
        &mut self,
        item_path: &Path,
        ts: LamportTs,
        after: Option<crate::path::ListKey>,
        before: Option<crate::path::ListKey>,
    ) -> Result<Option<Path>> {
        let (list_path, last) = Self::split_last(item_path)?;
        let key = match last {
            PathSegment::Position(k) => k.clone(),
            PathSegment::Key(_) => return Err(Error::wrong_node_kind(item_path, "expected list position")),
        };
        let list = self
            .resolve_node_mut(&list_path)?
            .as_list_mut()
            .ok_or_else(|| Error::wrong_node_kind(&list_path, "list move"))?;
        match list.move_item(&key, after.as_ref(), before.as_ref(), ts) {
            Some(new_key) => {
                let mut old_path = list_path.clone();
                old_path.push(PathSegment::Position(key));
                let mut new_path = list_path.clone();
                new_path.push(PathSegment::Position(new_key));
                self.registry.unregister_subtree(&old_path);
                self.touched.push(list_path.clone());
                Ok(Some(new_path))
            }
            None => Ok(None),
        }
    }

    fn apply_replace(&mut self, path: &Path, ts: LamportTs, value: Value, track_registry: bool) -> Result<Path> {
        let (parent_path, last) = Self::split_last(path)?;
        let live = LiveValue::from_value(value);
        let new_node_copy = live.as_node().cloned();
        let parent = self.resolve_node_mut(&parent_path)?;
        match (parent, last) {
            (NodeKind::Object(o), PathSegment::Key(k)) => {
                o.set_field(k, ts, live);
            }
            (NodeKind::Map(m), PathSegment::Key(k)) => {
                m.set(k, ts, live);
            }
            _ => return Err(Error::wrong_node_kind(path, "replace subtree")),
        }
        if track_registry {
            self.registry.unregister_subtree(path);
            if let Some(node) = new_node_copy {
                self.registry.register(path, &node);
            }
        }
        self.touched.push(path.clone());
        Ok(path.clone())
    }

    /// Removes the node at `path` from the tree (tombstoning its slot) and hands back a
    /// single-use token holding its last value, for re-attachment elsewhere via
    /// [`MutationScope::attach_detached`].
    pub fn detach_subtree(&mut self, path: &Path) -> Result<DetachedSubtree> {
        let (parent_path, last) = Self::split_last(path)?;
        let key = match last {
            PathSegment::Key(k) => k.clone(),
            PathSegment::Position(_) => return Err(Error::wrong_node_kind(path, "expected key segment")),
        };
        let ts = self.clock.tick();
        let parent = self.resolve_node_mut(&parent_path)?;
        let prior = match parent {
            NodeKind::Object(o) => o.delete_field(&key, ts),
            NodeKind::Map(m) => m.delete(&key, ts),
            _ => return Err(Error::wrong_node_kind(path, "detach_subtree")),
        }
        .ok_or_else(|| Error::path_not_found(path))?;
        self.registry.unregister_subtree(path);
        self.touched.push(path.clone());
        let node = match prior {
            Some(SlotState::Value(LiveValue::Node(n))) => n,
            _ => return Err(Error::wrong_node_kind(path, "detach_subtree target is not a node")),
        };
        Ok(DetachedSubtree {
            node,
            used: std::cell::Cell::new(false),
        })
    }

    fn flush_notifications(&mut self) {
        let touched = std::mem::take(&mut self.touched);
        if touched.is_empty() {
            return;
        }
        self.notifying = true;
        self.subscribers.notify_paths_changed(&touched);
        self.notifying = false;
    }
}

/// A guard-scoped handle to the document's mutation API. Obtained only via [`StorageDocument::mutate`].
pub struct MutationScope<'a> {
    doc: &'a mut StorageDocument,
}

impl<'a> MutationScope<'a> {
    pub fn set_field(&mut self, object_path: &Path, key: &str, value: Value) -> Result<()> {
        let ts = self.doc.clock.tick();
        let mut path = object_path.clone();
        path.push(PathSegment::Key(key.to_string()));
        let live = LiveValue::from_value(value.clone());
        let new_node_copy = live.as_node().cloned();
        let parent = self.doc.resolve_node_mut(object_path)?.as_object_mut().ok_or_else(|| {
            Error::wrong_node_kind(object_path, "set_field target is not an object")
        })?;
        let prior = parent
            .set_field(key, ts.clone(), live)
            .ok_or_else(|| Error::path_not_found(&path))?;
        self.doc.registry.unregister_subtree(&path);
        if let Some(node) = new_node_copy {
            self.doc.registry.register(&path, &node);
        }
        self.doc.touched.push(path.clone());
        self.doc.batch_applied.push(Op::new(ts.clone(), path.clone(), OpKind::SetField { value }));
        self.doc.batch_inverse.push(crate::inverse::inverse_for_slot_write(
            crate::inverse::SlotFamily::Object,
            &path,
            ts,
            prior,
        ));
        Ok(())
    }

    pub fn delete_field(&mut self, object_path: &Path, key: &str) -> Result<()> {
        let ts = self.doc.clock.tick();
        let mut path = object_path.clone();
        path.push(PathSegment::Key(key.to_string()));
        let parent = self.doc.resolve_node_mut(object_path)?.as_object_mut().ok_or_else(|| {
            Error::wrong_node_kind(object_path, "delete_field target is not an object")
        })?;
        let prior = parent
            .delete_field(key, ts.clone())
            .ok_or_else(|| Error::path_not_found(&path))?;
        self.doc.registry.unregister_subtree(&path);
        self.doc.touched.push(path.clone());
        self.doc.batch_applied.push(Op::new(ts.clone(), path.clone(), OpKind::DeleteField));
        self.doc.batch_inverse.push(crate::inverse::inverse_for_slot_write(
            crate::inverse::SlotFamily::Object,
            &path,
            ts,
            prior,
        ));
        Ok(())
    }

    pub fn map_set(&mut self, map_path: &Path, key: &str, value: Value) -> Result<()> {
        let ts = self.doc.clock.tick();
        let mut path = map_path.clone();
        path.push(PathSegment::Key(key.to_string()));
        let live = LiveValue::from_value(value.clone());
        let new_node_copy = live.as_node().cloned();
        let parent = self
            .doc
            .resolve_node_mut(map_path)?
            .as_map_mut()
            .ok_or_else(|| Error::wrong_node_kind(map_path, "map_set target is not an ordered map"))?;
        let prior = parent.set(key, ts.clone(), live).ok_or_else(|| Error::path_not_found(&path))?;
        self.doc.registry.unregister_subtree(&path);
        if let Some(node) = new_node_copy {
            self.doc.registry.register(&path, &node);
        }
        self.doc.touched.push(path.clone());
        self.doc.batch_applied.push(Op::new(ts.clone(), path.clone(), OpKind::MapSet { value }));
        self.doc.batch_inverse.push(crate::inverse::inverse_for_slot_write(
            crate::inverse::SlotFamily::Map,
            &path,
            ts,
            prior,
        ));
        Ok(())
    }

    pub fn map_delete(&mut self, map_path: &Path, key: &str) -> Result<()> {
        let ts = self.doc.clock.tick();
        let mut path = map_path.clone();
        path.push(PathSegment::Key(key.to_string()));
        let parent = self
            .doc
            .resolve_node_mut(map_path)?
            .as_map_mut()
            .ok_or_else(|| Error::wrong_node_kind(map_path, "map_delete target is not an ordered map"))?;
        let prior = parent.delete(key, ts.clone()).ok_or_else(|| Error::path_not_found(&path))?;
        self.doc.registry.unregister_subtree(&path);
        self.doc.touched.push(path.clone());
        self.doc.batch_applied.push(Op::new(ts.clone(), path.clone(), OpKind::MapDelete));
        self.doc.batch_inverse.push(crate::inverse::inverse_for_slot_write(
            crate::inverse::SlotFamily::Map,
            &path,
            ts,
            prior,
        ));
        Ok(())
    }

    pub fn list_insert(
        &mut self,
        list_path: &Path,
        after: Option<crate::path::ListKey>,
        before: Option<crate::path::ListKey>,
        value: Value,
    ) -> Result<crate::path::ListKey> {
        let ts = self.doc.clock.tick();
        let live = LiveValue::from_value(value.clone());
        let new_node_copy = live.as_node().cloned();
        let list = self
            .doc
            .resolve_node_mut(list_path)?
            .as_list_mut()
            .ok_or_else(|| Error::wrong_node_kind(list_path, "list_insert target is not a list"))?;
        let key = list.insert(after.as_ref(), before.as_ref(), ts.clone(), live);

        let mut item_path = list_path.clone();
        item_path.push(PathSegment::Position(key.clone()));
        if let Some(node) = new_node_copy {
            self.doc.registry.register(&item_path, &node);
        }
        self.doc.touched.push(list_path.clone());
        self.doc.batch_applied.push(Op::new(
            ts.clone(),
            list_path.clone(),
            OpKind::ListInsert { after, before, value },
        ));
        self.doc
            .batch_inverse
            .push(crate::inverse::inverse_for_list_insert(list_path, &key, ts));
        Ok(key)
    }

    pub fn list_delete(&mut self, list_path: &Path, key: &crate::path::ListKey) -> Result<()> {
        let ts = self.doc.clock.tick();
        let list = self
            .doc
            .resolve_node_mut(list_path)?
            .as_list_mut()
            .ok_or_else(|| Error::wrong_node_kind(list_path, "list_delete target is not a list"))?;
        let after = list.prev_present_before(Some(key)).cloned();
        let before = list.next_present_after(Some(key)).cloned();
        let value = list
            .get(key)
            .ok_or_else(|| Error::path_not_found(list_path))?
            .serialize();
        if !list.delete(key, ts.clone()) {
            return Err(Error::path_not_found(list_path));
        }
        let mut item_path = list_path.clone();
        item_path.push(PathSegment::Position(key.clone()));
        self.doc.registry.unregister_subtree(&item_path);
        self.doc.touched.push(list_path.clone());
        self.doc
            .batch_applied
            .push(Op::new(ts.clone(), item_path, OpKind::ListDelete));
        self.doc
            .batch_inverse
            .push(crate::inverse::inverse_for_list_delete(list_path, ts, after, before, value));
        Ok(())
    }

    pub fn list_move(
        &mut self,
        list_path: &Path,
        key: &crate::path::ListKey,
        after: Option<crate::path::ListKey>,
        before: Option<crate::path::ListKey>,
    ) -> Result<crate::path::ListKey> {
        let ts = self.doc.clock.tick();
        let list = self
            .doc
            .resolve_node_mut(list_path)?
            .as_list_mut()
            .ok_or_else(|| Error::wrong_node_kind(list_path, "list_move target is not a list"))?;
        let original_after = list.prev_present_before(Some(key)).cloned();
        let original_before = list.next_present_after(Some(key)).cloned();
        let new_key = list
            .move_item(key, after.as_ref(), before.as_ref(), ts.clone())
            .ok_or_else(|| Error::path_not_found(list_path))?;

        let mut old_path = list_path.clone();
        old_path.push(PathSegment::Position(key.clone()));
        let mut new_path = list_path.clone();
        new_path.push(PathSegment::Position(new_key.clone()));
        self.doc.registry.unregister_subtree(&old_path);
        self.doc.touched.push(list_path.clone());
        self.doc.batch_applied.push(Op::new(
            ts.clone(),
            old_path,
            OpKind::ListMove { after, before },
        ));
        self.doc.batch_inverse.push(crate::inverse::inverse_for_list_move(
            list_path,
            &new_key,
            ts,
            original_after,
            original_before,
        ));
        Ok(new_key)
    }

    /// Replaces the value at `path` wholesale. If the prior value was a node, its descendants
    /// are detached; any [`NodeRef`] still pointing into it will report
    /// `is_attached == false` afterward.
    pub fn replace_subtree(&mut self, path: &Path, value: Value) -> Result<()> {
        let ts = self.doc.clock.tick();
        let (parent_path, last) = StorageDocument::split_last(path)?;
        let live = LiveValue::from_value(value.clone());
        let new_node_copy = live.as_node().cloned();
        let parent = self.doc.resolve_node_mut(&parent_path)?;
        let prior = match (parent, last) {
            (NodeKind::Object(o), PathSegment::Key(k)) => o.set_field(k, ts.clone(), live),
            (NodeKind::Map(m), PathSegment::Key(k)) => m.set(k, ts.clone(), live),
            _ => return Err(Error::wrong_node_kind(path, "replace_subtree")),
        }
        .ok_or_else(|| Error::path_not_found(path))?;

        self.doc.registry.unregister_subtree(path);
        if let Some(node) = new_node_copy {
            self.doc.registry.register(path, &node);
        }
        self.doc.touched.push(path.clone());
        self.doc
            .batch_applied
            .push(Op::new(ts.clone(), path.clone(), OpKind::ReplaceSubtree { value }));
        let old_value = match prior {
            Some(SlotState::Value(old)) => old.serialize(),
            _ => Value::null(),
        };
        self.doc
            .batch_inverse
            .push(crate::inverse::inverse_for_replace(path, ts, old_value));
        Ok(())
    }

    /// Re-applies a previously captured op (an inverse popped off undo/redo history, or a
    /// caller-supplied replay) under a *fresh* Lamport ts, going through the same named method
    /// as a freshly authored edit so it captures its own inverse in turn.
    pub fn apply_captured(&mut self, op: &Op) -> Result<()> {
        match &op.kind {
            OpKind::SetField { value } => {
                let (parent, key) = Self::split_field_path(&op.path)?;
                self.set_field(&parent, &key, value.clone())
            }
            OpKind::DeleteField => {
                let (parent, key) = Self::split_field_path(&op.path)?;
                self.delete_field(&parent, &key)
            }
            OpKind::MapSet { value } => {
                let (parent, key) = Self::split_field_path(&op.path)?;
                self.map_set(&parent, &key, value.clone())
            }
            OpKind::MapDelete => {
                let (parent, key) = Self::split_field_path(&op.path)?;
                self.map_delete(&parent, &key)
            }
            OpKind::ListInsert { after, before, value } => {
                self.list_insert(&op.path, after.clone(), before.clone(), value.clone())
                    .map(|_| ())
            }
            OpKind::ListDelete => {
                let (list_path, key) = Self::split_item_path(&op.path)?;
                self.list_delete(&list_path, &key)
            }
            OpKind::ListMove { after, before } => {
                let (list_path, key) = Self::split_item_path(&op.path)?;
                self.list_move(&list_path, &key, after.clone(), before.clone()).map(|_| ())
            }
            OpKind::ReplaceSubtree { value } => self.replace_subtree(&op.path, value.clone()),
        }
    }

    fn split_field_path(path: &Path) -> Result<(Path, String)> {
        let (parent, last) = StorageDocument::split_last(path)?;
        match last {
            PathSegment::Key(k) => Ok((parent, k.clone())),
            PathSegment::Position(_) => Err(Error::wrong_node_kind(path, "expected key segment")),
        }
    }

    fn split_item_path(path: &Path) -> Result<(Path, crate::path::ListKey)> {
        let (list_path, last) = StorageDocument::split_last(path)?;
        match last {
            PathSegment::Position(k) => Ok((list_path, k.clone())),
            PathSegment::Key(_) => Err(Error::wrong_node_kind(path, "expected list position")),
        }
    }

    /// Attaches a previously [`StorageDocument::detach_subtree`]d node at `object_path.key`.
    /// Fails with `AttachmentError` if `detached` was already consumed by an earlier attach.
    pub fn attach_detached(
        &mut self,
        object_path: &Path,
        key: &str,
        detached: &DetachedSubtree,
    ) -> Result<()> {
        if detached.used.replace(true) {
            return Err(Error::attachment(object_path));
        }
        self.set_field(object_path, key, Value::Node(detached.node.serialize()))
    }
}

/// A single-use token for a node removed from the tree via [`StorageDocument::detach_subtree`].
/// Attaching it elsewhere consumes it; attaching it twice is an `AttachmentError`.
pub struct DetachedSubtree {
    node: NodeKind,
    used: std::cell::Cell<bool>,
}

impl DetachedSubtree {
    pub fn node(&self) -> &NodeKind {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::History;
    use crate::value::Primitive;

    #[test]
    fn reentrant_mutation_while_notifying_is_rejected() {
        let mut doc = StorageDocument::new("a");
        doc.mutate(|s| s.set_field(&Vec::new(), "x", Value::Primitive(Primitive::Number(1.0))))
            .unwrap();

        // Simulates being invoked from inside a subscriber notification.
        doc.notifying = true;
        let result = doc.mutate(|s| s.set_field(&Vec::new(), "x", Value::Primitive(Primitive::Number(2.0))));
        assert!(matches!(result, Err(Error::ReentrantMutation)));
        doc.notifying = false;
    }

    #[test]
    fn detach_then_attach_elsewhere_moves_the_subtree() {
        let mut doc = StorageDocument::new("a");
        doc.mutate(|s| {
            s.set_field(&Vec::new(), "a", Value::Node(crate::value::SerializedNode::empty_object()))?;
            s.set_field(
                &vec![PathSegment::Key("a".into())],
                "v",
                Value::Primitive(Primitive::Number(7.0)),
            )
        })
        .unwrap();

        let detached = doc.detach_subtree(&vec![PathSegment::Key("a".into())]).unwrap();
        doc.mutate(|s| s.attach_detached(&Vec::new(), "b", &detached)).unwrap();

        if let crate::value::SerializedNode::Object { data } = doc.serialize() {
            assert!(!data.contains_key("a"));
            assert!(data.contains_key("b"));
        } else {
            unreachable!();
        }

        // re-attaching the same token a second time is rejected.
        let err = doc.mutate(|s| s.attach_detached(&Vec::new(), "c", &detached));
        assert!(err.is_err());
    }

    #[test]
    fn undoing_a_list_move_replays_against_the_items_new_key() {
        let mut doc = StorageDocument::new("a");
        doc.mutate(|s| {
            s.set_field(&Vec::new(), "list", Value::Node(crate::value::SerializedNode::empty_list()))
        })
        .unwrap();
        let list_path = vec![PathSegment::Key("list".into())];

        let (key_a, key_b) = doc
            .mutate(|s| {
                let a = s.list_insert(&list_path, None, None, Value::Primitive(Primitive::Number(1.0)))?;
                let b = s.list_insert(
                    &list_path,
                    Some(a.clone()),
                    None,
                    Value::Primitive(Primitive::Number(2.0)),
                )?;
                Ok((a, b))
            })
            .unwrap()
            .value;

        let mut history = History::new();
        let move_outcome = doc
            .mutate(|s| {
                s.list_move(&list_path, &key_a, Some(key_b.clone()), None)?;
                Ok(())
            })
            .unwrap();
        history.push(move_outcome.inverse);

        let values_after_move: Vec<Value> = match doc.serialize() {
            SerializedNode::Object { data } => match &data["list"] {
                Value::Node(crate::value::SerializedNode::OrderedList { items }) => items.clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        assert_eq!(
            values_after_move,
            vec![
                Value::Primitive(Primitive::Number(2.0)),
                Value::Primitive(Primitive::Number(1.0)),
            ]
        );

        // Undo must target the item by its post-move key, not its original one.
        let inverse_batch = history.pop_undo().unwrap();
        doc.mutate(|s| {
            for op in &inverse_batch {
                s.apply_captured(op)?;
            }
            Ok(())
        })
        .unwrap();

        let values_after_undo: Vec<Value> = match doc.serialize() {
            SerializedNode::Object { data } => match &data["list"] {
                Value::Node(crate::value::SerializedNode::OrderedList { items }) => items.clone(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        assert_eq!(
            values_after_undo,
            vec![
                Value::Primitive(Primitive::Number(1.0)),
                Value::Primitive(Primitive::Number(2.0)),
            ]
        );
    }
}
