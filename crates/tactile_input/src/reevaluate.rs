//! Deferred reevaluation of device slots after tree changes
//!
//! When an element holding focus, capture, or pointer-over (or one of its
//! ancestors) changes enabled/visible/focusable state or leaves the tree, the
//! device is not fixed up inline. The change is recorded here and one
//! coalesced continuation per device flushes the set later.

use std::cell::{Cell, RefCell};

use crate::tree::{ElementId, ElementTree, Tracker};

/// One pending reevaluation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Reevaluation {
    pub element: ElementId,
    pub tracker: Tracker,
    /// Parent the element had when it was detached, if it was
    pub previous_ancestor: Option<ElementId>,
}

#[derive(Default)]
pub(crate) struct ReevaluationSet {
    entries: RefCell<Vec<Reevaluation>>,
    pending: Cell<bool>,
}

impl ReevaluationSet {
    /// Record an entry; true if the caller must schedule the flush
    pub fn queue(&self, entry: Reevaluation) -> bool {
        {
            let mut entries = self.entries.borrow_mut();
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        !self.pending.replace(true)
    }

    pub fn take(&self) -> Vec<Reevaluation> {
        self.pending.set(false);
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }
}

/// Where to start walking up from when reevaluating `element`
///
/// The element itself while it is alive, otherwise the recorded ancestor it
/// was detached from.
pub(crate) fn resume_point(
    entries: &[Reevaluation],
    tree: &ElementTree,
    element: ElementId,
) -> Option<ElementId> {
    if tree.contains(element) {
        return Some(element);
    }
    entries
        .iter()
        .filter(|e| e.element == element)
        .filter_map(|e| e.previous_ancestor)
        .find(|a| tree.contains(*a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ElementProps;

    #[test]
    fn test_queue_coalesces() {
        let mut tree = ElementTree::new();
        let a = tree.insert(None, ElementProps::default()).unwrap();
        let set = ReevaluationSet::default();
        let entry = Reevaluation {
            element: a,
            tracker: Tracker::KeyboardFocus,
            previous_ancestor: None,
        };
        assert!(set.queue(entry));
        assert!(!set.queue(entry));
        assert!(set.is_pending());
        assert_eq!(set.take(), vec![entry]);
        assert!(!set.is_pending());
    }

    #[test]
    fn test_resume_point_uses_previous_ancestor() {
        let mut tree = ElementTree::new();
        let root = tree.insert(None, ElementProps::default()).unwrap();
        let child = tree.insert(Some(root), ElementProps::default()).unwrap();
        let entries = vec![Reevaluation {
            element: child,
            tracker: Tracker::KeyboardFocus,
            previous_ancestor: Some(root),
        }];
        assert_eq!(resume_point(&entries, &tree, child), Some(child));
        tree.remove_subtree(child).unwrap();
        assert_eq!(resume_point(&entries, &tree, child), Some(root));
    }
}
