//! Subscriber bookkeeping: callbacks fired on path changes, with deep subscriptions recorded at
//! the root of the watched subtree and fired via the notify-up-parent chain.
use crate::path::{path_string, Path};
use std::collections::BTreeMap;

pub type Callback = Box<dyn FnMut() + Send>;

struct Registration {
    id: u64,
    deep: bool,
    callback: Callback,
}

/// Tracks subscriptions keyed by the path string of the subtree they watch.
#[derive(Default)]
pub struct SubscriberRegistry {
    by_path: BTreeMap<String, Vec<Registration>>,
    next_id: u64,
}

/// A token returned by [`SubscriberRegistry::subscribe`]; drop or pass to `unsubscribe` to
/// release the callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` against `path`. If `deep`, the callback also fires for any change
    /// to a descendant of `path`, not just `path` itself.
    pub fn subscribe(&mut self, path: &Path, deep: bool, callback: Callback) -> SubscriptionId {
        self.next_id += 1;
        let id = self.next_id;
        self.by_path
            .entry(path_string(path))
            .or_default()
            .push(Registration { id, deep, callback });
        SubscriptionId(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.by_path.retain(|_, regs| {
            regs.retain(|r| r.id != id.0);
            !regs.is_empty()
        });
    }

    /// Fires every subscriber whose watched path equals `changed_path`, plus every ancestor's
    /// deep subscriber. Each subscriber fires at most once per call.
    pub fn notify_path_changed(&mut self, changed_path: &Path) {
        let mut fired = std::collections::HashSet::new();
        self.notify_one(changed_path, &mut fired);
    }

    /// Batched variant used after applying a whole remote op batch or a whole mutation scope:
    /// one flush emitting each subscriber at most once across the *entire* batch, not once per
    /// changed path.
    pub fn notify_paths_changed(&mut self, changed_paths: &[Path]) {
        let mut fired = std::collections::HashSet::new();
        for path in changed_paths {
            self.notify_one(path, &mut fired);
        }
    }

    fn notify_one(&mut self, changed_path: &Path, fired: &mut std::collections::HashSet<u64>) {
        for depth in (0..=changed_path.len()).rev() {
            let prefix = path_string(&changed_path[..depth].to_vec());
            let is_exact = depth == changed_path.len();
            if let Some(regs) = self.by_path.get_mut(&prefix) {
                for reg in regs.iter_mut() {
                    if (is_exact || reg.deep) && fired.insert(reg.id) {
                        (reg.callback)();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathSegment;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn deep_subscriber_fires_on_descendant_change() {
        let mut reg = SubscriberRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        reg.subscribe(&vec![PathSegment::Key("box".into())], true, Box::new(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        reg.notify_path_changed(&vec![
            PathSegment::Key("box".into()),
            PathSegment::Key("inner".into()),
        ]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shallow_subscriber_does_not_fire_on_descendant_change() {
        let mut reg = SubscriberRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        reg.subscribe(&vec![PathSegment::Key("box".into())], false, Box::new(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        reg.notify_path_changed(&vec![
            PathSegment::Key("box".into()),
            PathSegment::Key("inner".into()),
        ]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn each_subscriber_fires_once_per_notify() {
        let mut reg = SubscriberRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        reg.subscribe(&Vec::new(), true, Box::new(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        reg.notify_path_changed(&vec![PathSegment::Key("a".into())]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batched_notify_fires_deep_subscriber_once_across_whole_batch() {
        let mut reg = SubscriberRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        reg.subscribe(&Vec::new(), true, Box::new(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        reg.notify_paths_changed(&[
            vec![PathSegment::Key("a".into())],
            vec![PathSegment::Key("b".into())],
            vec![PathSegment::Key("c".into())],
        ]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
