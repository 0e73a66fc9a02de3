//! Element tree as seen by the input engine
//!
//! The engine needs a small slice of the retained tree: parent links,
//! geometry for hit testing, the enabled/visible/focusable flags, and the
//! reverse flags the devices maintain (`is_focused`, `is_mouse_over`, ...).
//!
//! Elements are addressed by [`ElementId`], a generational slotmap key. The
//! devices only ever hold ids: a lookup miss means the element is gone, and
//! the slot holding it is treated as empty.

use slotmap::{new_key_type, Key, SlotMap};
use smallvec::SmallVec;
use tactile_platform::{Point, SourceId};

use crate::error::{InputError, Result};

new_key_type! {
    /// Weak handle to an element in the tree
    pub struct ElementId;
}

impl ElementId {
    /// Convert to a raw u64 representation
    pub fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    /// Create from a raw u64 produced by `to_raw()`
    pub fn from_raw(raw: u64) -> Self {
        Self::from(slotmap::KeyData::from_ffi(raw))
    }
}

/// Element bounds, relative to the parent's origin
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check if a point (in the same space as the rect) is inside
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }
}

/// Input-relevant properties of an element
#[derive(Clone, Debug, PartialEq)]
pub struct ElementProps {
    pub bounds: Rect,
    pub visible: bool,
    pub enabled: bool,
    pub focusable: bool,
    /// Root of a focus scope (remembers its last focused descendant)
    pub focus_scope: bool,
    /// Touch contacts captured here are promoted to the gesture engine
    pub manipulable: bool,
    pub hit_test_visible: bool,
}

impl Default for ElementProps {
    fn default() -> Self {
        Self {
            bounds: Rect::default(),
            visible: true,
            enabled: true,
            focusable: false,
            focus_scope: false,
            manipulable: false,
            hit_test_visible: true,
        }
    }
}

impl ElementProps {
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            ..Default::default()
        }
    }

    pub fn focusable(mut self, focusable: bool) -> Self {
        self.focusable = focusable;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn focus_scope(mut self, scope: bool) -> Self {
        self.focus_scope = scope;
        self
    }

    pub fn manipulable(mut self, manipulable: bool) -> Self {
        self.manipulable = manipulable;
        self
    }

    pub fn hit_test_visible(mut self, visible: bool) -> Self {
        self.hit_test_visible = visible;
        self
    }
}

/// Device slot watching an element for enabled/visible/focusable changes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tracker {
    KeyboardFocus,
    MouseCapture,
    MouseOver,
    TouchCapture(u64),
    TouchOver(u64),
}

/// Flags the devices maintain on elements
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ReverseFlags {
    pub focused: bool,
    pub mouse_over: bool,
    pub mouse_captured: bool,
    pub touches_over: u32,
    pub touches_captured: u32,
}

struct ElementNode {
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    props: ElementProps,
    /// Set on roots attached to a presentation source
    source: Option<SourceId>,
    flags: ReverseFlags,
    trackers: SmallVec<[Tracker; 2]>,
    /// For focus scopes: most recently focused descendant
    scope_focus: Option<ElementId>,
}

/// The retained element tree
#[derive(Default)]
pub struct ElementTree {
    nodes: SlotMap<ElementId, ElementNode>,
}

/// Iterator from an element up to its root (self first)
pub struct Ancestors<'a> {
    tree: &'a ElementTree,
    next: Option<ElementId>,
}

impl Iterator for Ancestors<'_> {
    type Item = ElementId;

    fn next(&mut self) -> Option<ElementId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

impl ElementTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Liveness check
    pub fn contains(&self, id: ElementId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: ElementId) -> &[ElementId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn props(&self, id: ElementId) -> Option<&ElementProps> {
        self.nodes.get(id).map(|n| &n.props)
    }

    /// Walk from `id` to its root, `id` first
    pub fn ancestors(&self, id: ElementId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.contains(id).then_some(id),
        }
    }

    /// Path from the root down to `id` (empty if `id` is gone)
    pub fn path(&self, id: ElementId) -> SmallVec<[ElementId; 8]> {
        let mut path: SmallVec<[ElementId; 8]> = self.ancestors(id).collect();
        path.reverse();
        path
    }

    /// True if `id` is `ancestor` or lies beneath it
    pub fn is_within(&self, id: ElementId, ancestor: ElementId) -> bool {
        self.ancestors(id).any(|a| a == ancestor)
    }

    /// Root of the subtree containing `id`
    pub fn root_of(&self, id: ElementId) -> Option<ElementId> {
        self.ancestors(id).last()
    }

    /// Presentation source the element is attached to, via its root
    pub fn source_of(&self, id: ElementId) -> Option<SourceId> {
        self.root_of(id)
            .and_then(|root| self.nodes.get(root))
            .and_then(|n| n.source)
    }

    /// An unparented root attached to a source
    pub fn is_source_root(&self, id: ElementId) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|n| n.parent.is_none() && n.source.is_some())
    }

    /// Origin of the element in its root's coordinate space
    pub fn absolute_origin(&self, id: ElementId) -> Point {
        self.ancestors(id)
            .filter_map(|a| self.nodes.get(a))
            .fold(Point::ZERO, |acc, n| {
                acc + Point::new(n.props.bounds.x, n.props.bounds.y)
            })
    }

    pub fn is_effectively_visible(&self, id: ElementId) -> bool {
        self.contains(id)
            && self
                .ancestors(id)
                .all(|a| self.nodes.get(a).is_some_and(|n| n.props.visible))
    }

    pub fn is_effectively_enabled(&self, id: ElementId) -> bool {
        self.contains(id)
            && self
                .ancestors(id)
                .all(|a| self.nodes.get(a).is_some_and(|n| n.props.enabled))
    }

    /// Nearest manipulable element at or above `id`
    pub fn manipulable_ancestor(&self, id: ElementId) -> Option<ElementId> {
        self.ancestors(id)
            .find(|a| self.nodes.get(*a).is_some_and(|n| n.props.manipulable))
    }

    // =========================================================================
    // Reverse flags
    // =========================================================================

    pub fn is_focused(&self, id: ElementId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.flags.focused)
    }

    pub fn is_mouse_over(&self, id: ElementId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.flags.mouse_over)
    }

    pub fn is_mouse_captured(&self, id: ElementId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.flags.mouse_captured)
    }

    /// Number of touch contacts over this element or a descendant
    pub fn touches_over(&self, id: ElementId) -> u32 {
        self.nodes.get(id).map_or(0, |n| n.flags.touches_over)
    }

    /// Number of touch contacts captured to this element
    pub fn touches_captured(&self, id: ElementId) -> u32 {
        self.nodes.get(id).map_or(0, |n| n.flags.touches_captured)
    }

    /// Device trackers currently attached to the element
    pub fn trackers(&self, id: ElementId) -> &[Tracker] {
        self.nodes
            .get(id)
            .map(|n| n.trackers.as_slice())
            .unwrap_or(&[])
    }

    /// Most recently focused descendant of a focus scope
    pub fn focused_in_scope(&self, scope: ElementId) -> Option<ElementId> {
        self.nodes
            .get(scope)
            .and_then(|n| n.scope_focus)
            .filter(|f| self.contains(*f))
    }

    // =========================================================================
    // Mutation (routed through InputContext so devices are notified)
    // =========================================================================

    pub(crate) fn insert(&mut self, parent: Option<ElementId>, props: ElementProps) -> Result<ElementId> {
        if let Some(p) = parent {
            if !self.contains(p) {
                return Err(InputError::InvalidElement(p));
            }
        }
        let id = self.nodes.insert(ElementNode {
            parent,
            children: Vec::new(),
            props,
            source: None,
            flags: ReverseFlags::default(),
            trackers: SmallVec::new(),
            scope_focus: None,
        });
        if let Some(node) = parent.and_then(|p| self.nodes.get_mut(p)) {
            node.children.push(id);
        }
        Ok(id)
    }

    pub(crate) fn set_source(&mut self, root: ElementId, source: Option<SourceId>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(root)
            .ok_or(InputError::InvalidElement(root))?;
        node.source = source;
        Ok(())
    }

    /// Apply `f` to the element's props, returning whether anything changed
    pub(crate) fn update_props(
        &mut self,
        id: ElementId,
        f: impl FnOnce(&mut ElementProps),
    ) -> Result<bool> {
        let node = self.nodes.get_mut(id).ok_or(InputError::InvalidElement(id))?;
        let before = node.props.clone();
        f(&mut node.props);
        Ok(node.props != before)
    }

    /// Every tracker attached within the subtree rooted at `id`
    pub(crate) fn trackers_in_subtree(&self, id: ElementId) -> Vec<(ElementId, Tracker)> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                out.extend(node.trackers.iter().map(|t| (current, *t)));
                stack.extend(node.children.iter().copied());
            }
        }
        out
    }

    /// Remove `id` and everything beneath it
    pub(crate) fn remove_subtree(&mut self, id: ElementId) -> Result<()> {
        let parent = self
            .nodes
            .get(id)
            .ok_or(InputError::InvalidElement(id))?
            .parent;
        if let Some(node) = parent.and_then(|p| self.nodes.get_mut(p)) {
            node.children.retain(|c| *c != id);
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(current) {
                stack.extend(node.children);
            }
        }
        Ok(())
    }

    pub(crate) fn attach_tracker(&mut self, id: ElementId, tracker: Tracker) {
        if let Some(node) = self.nodes.get_mut(id) {
            if !node.trackers.contains(&tracker) {
                node.trackers.push(tracker);
            }
        }
    }

    pub(crate) fn detach_tracker(&mut self, id: ElementId, tracker: Tracker) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.trackers.retain(|t| *t != tracker);
        }
    }

    /// Mutable reverse flags; a dead id yields None and the update is skipped
    pub(crate) fn flags_mut(&mut self, id: ElementId) -> Option<&mut ReverseFlags> {
        self.nodes.get_mut(id).map(|n| &mut n.flags)
    }

    /// Record `focused` on the nearest enclosing focus scope
    pub(crate) fn remember_scope_focus(&mut self, focused: ElementId) {
        let scope = self
            .ancestors(focused)
            .skip(1)
            .find(|a| self.nodes.get(*a).is_some_and(|n| n.props.focus_scope));
        if let Some(node) = scope.and_then(|s| self.nodes.get_mut(s)) {
            node.scope_focus = Some(focused);
        }
    }
}

/// Minimal leave/enter transition between two root-to-leaf paths
///
/// Leaves are reported inner to outer, enters outer to inner.
pub(crate) fn diff_paths(
    old: &[ElementId],
    new: &[ElementId],
) -> (Vec<ElementId>, Vec<ElementId>) {
    let common = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let leaves = old[common..].iter().rev().copied().collect();
    let enters = new[common..].to_vec();
    (leaves, enters)
}
