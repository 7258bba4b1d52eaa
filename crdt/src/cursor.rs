//! Attach-state tracking for externally-held node references: a node still referenced after
//! its subtree is replaced must report `attached == false`.
use crate::node::NodeKind;
use crate::path::Path;

/// Assigns a fresh id to every node in a subtree and tracks which path currently owns which
/// id, so a [`NodeRef`] taken before a replacement can tell it no longer resolves to the same
/// node. Parent links are weak back-references: detaching a subtree severs them before the
/// node can be attached elsewhere.
#[derive(Default)]
pub struct NodeRegistry {
    entries: Vec<(Path, u64)>,
    next_id: u64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `node` and every descendant, rooted at `base_path`, each under a fresh id.
    /// Returns the id assigned to `base_path` itself.
    pub fn register(&mut self, base_path: &Path, node: &NodeKind) -> u64 {
        let mut root_id = 0;
        node.walk(|rel, n| {
            let mut full = base_path.clone();
            full.extend(rel.iter().cloned());
            let id = self.next_id;
            self.next_id += 1;
            if rel.is_empty() {
                root_id = id;
            }
            self.entries.retain(|(p, _)| p != &full);
            self.entries.push((full, id));
            let _ = n;
        });
        root_id
    }

    /// Removes every entry whose path is `base_path` or a descendant of it, e.g. after a
    /// subtree is replaced or deleted.
    pub fn unregister_subtree(&mut self, base_path: &Path) {
        self.entries.retain(|(p, _)| !is_prefix_of(base_path, p));
    }

    pub fn get(&self, path: &Path) -> Option<u64> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, id)| *id)
    }
}

fn is_prefix_of(prefix: &Path, path: &Path) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path.iter()).all(|(a, b)| a == b)
}

/// A handle to a node taken at a point in time. Remains valid (`is_attached`) only as long as
/// the path still resolves to the exact node it was taken from.
#[derive(Clone, Debug)]
pub struct NodeRef {
    path: Path,
    node_id: u64,
}

impl NodeRef {
    pub(crate) fn new(path: Path, node_id: u64) -> Self {
        Self { path, node_id }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_attached(&self, registry: &NodeRegistry) -> bool {
        registry.get(&self.path) == Some(self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{LiveValue, NodeKind};
    use crate::path::PathSegment;
    use crate::value::Primitive;

    #[test]
    fn replacing_a_subtree_detaches_the_old_nodes_descendants() {
        let mut registry = NodeRegistry::new();

        let mut inner = NodeKind::empty_object();
        inner
            .as_object_mut()
            .unwrap()
            .seed("v".into(), LiveValue::Primitive(Primitive::Number(1.0)));
        let mut outer = NodeKind::empty_object();
        outer
            .as_object_mut()
            .unwrap()
            .seed("inner".into(), LiveValue::Node(inner));

        let box_path: Path = vec![PathSegment::Key("box".into())];
        registry.register(&box_path, &outer);

        let inner_path: Path = vec![PathSegment::Key("box".into()), PathSegment::Key("inner".into())];
        let inner_id = registry.get(&inner_path).unwrap();
        let handle = NodeRef::new(inner_path.clone(), inner_id);
        assert!(handle.is_attached(&registry));

        // replace `box` wholesale
        registry.unregister_subtree(&box_path);
        let mut new_inner = NodeKind::empty_object();
        new_inner
            .as_object_mut()
            .unwrap()
            .seed("v".into(), LiveValue::Primitive(Primitive::Number(2.0)));
        let mut new_outer = NodeKind::empty_object();
        new_outer
            .as_object_mut()
            .unwrap()
            .seed("inner".into(), LiveValue::Node(new_inner));
        registry.register(&box_path, &new_outer);

        assert!(!handle.is_attached(&registry));
        let new_inner_id = registry.get(&inner_path).unwrap();
        let new_handle = NodeRef::new(inner_path, new_inner_id);
        assert!(new_handle.is_attached(&registry));
    }
}
