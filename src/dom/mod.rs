//! Abstract markup tree used by the live runtime.
//!
//! Nodes live in an arena owned by a [`Document`] and are addressed by [`NodeId`].
//! Ids are generational: a freed slot is reused, but under a new version, so a
//! stale id never resolves to the node that took its place. A node moved by
//! reconciliation keeps its id, a node that is recreated gets a fresh one.

pub mod parser;
pub mod serialize;

use indexmap::IndexMap;
use slotmap::{new_key_type, SlotMap};

pub use parser::{parse_document, parse_fragment};
pub use serialize::{escape_attr, escape_text, inner_html, outer_html};

new_key_type! {
    /// Handle to a node inside a [`Document`].
    pub struct NodeId;
}

/// Node kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Synthetic container at the top of a document.
    Root,
    /// Element with a lowercase tag name.
    Element(String),
    Text(String),
    Comment(String),
}

/// Live state of a form control, kept apart from its attributes.
///
/// Attributes describe what the server rendered; the control state is what the
/// user currently sees and edits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlState {
    pub value: String,
    pub checked: bool,
    pub selected: bool,
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: NodeKind,
    pub attrs: IndexMap<String, String>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub control: Option<ControlState>,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attrs: IndexMap::new(),
            children: Vec::new(),
            parent: None,
            control: None,
        }
    }
}

/// Cursor position inside the focused control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

/// Arena-backed tree with focus tracking.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: SlotMap<NodeId, NodeData>,
    root: NodeId,
    focused: Option<NodeId>,
    selection: Option<Selection>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Tags whose elements carry a [`ControlState`].
pub fn is_control_tag(tag: &str) -> bool {
    matches!(tag, "input" | "textarea" | "select" | "option")
}

impl Document {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(NodeData::new(NodeKind::Root));
        Self {
            nodes,
            root,
            focused: None,
            selection: None,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live (allocated and not freed) nodes.
    pub fn live_count(&self) -> usize {
        self.nodes.len()
    }

    /// Slots the arena can hold before it has to grow.
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id)
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        self.nodes.insert(data)
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let tag = tag.to_ascii_lowercase();
        let mut data = NodeData::new(NodeKind::Element(tag.clone()));
        if is_control_tag(&tag) {
            data.control = Some(ControlState::default());
        }
        self.alloc(data)
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::new(NodeKind::Text(text.to_string())))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::new(NodeKind::Comment(text.to_string())))
    }

    /// Shallow copy of `id`: kind, attributes and control state, no children.
    pub fn shallow_clone(&mut self, id: NodeId) -> Option<NodeId> {
        let data = self.node(id)?;
        let mut copy = NodeData::new(data.kind.clone());
        copy.attrs = data.attrs.clone();
        copy.control = data.control.clone();
        Some(self.alloc(copy))
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            Some(NodeKind::Element(tag)) => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.tag(id).is_some()
    }

    /// Content of a text or comment node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            Some(NodeKind::Text(t)) | Some(NodeKind::Comment(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, content: &str) {
        if let Some(node) = self.node_mut(id) {
            match &mut node.kind {
                NodeKind::Text(t) | NodeKind::Comment(t) => {
                    t.clear();
                    t.push_str(content);
                }
                _ => {}
            }
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let Some(NodeKind::Text(t)) = self.kind(node) {
                out.push_str(t);
            }
        }
        out
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .and_then(|n| n.attrs.get(name))
            .map(|v| v.as_str())
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    pub fn attrs(&self, id: NodeId) -> Vec<(String, String)> {
        self.node(id)
            .map(|n| {
                n.attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(node) = self.node_mut(id) {
            node.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        self.node_mut(id).and_then(|n| n.attrs.shift_remove(name))
    }

    pub fn control(&self, id: NodeId) -> Option<&ControlState> {
        self.node(id).and_then(|n| n.control.as_ref())
    }

    pub fn control_mut(&mut self, id: NodeId) -> Option<&mut ControlState> {
        self.node_mut(id).and_then(|n| n.control.as_mut())
    }

    /// Current value of a control (what the user sees), falling back to the
    /// `value` attribute for non-control elements.
    pub fn value(&self, id: NodeId) -> Option<String> {
        match self.control(id) {
            Some(state) => Some(state.value.clone()),
            None => self.attr(id, "value").map(str::to_string),
        }
    }

    pub fn set_value(&mut self, id: NodeId, value: &str) {
        if let Some(state) = self.control_mut(id) {
            state.value = value.to_string();
        }
    }

    pub fn set_checked(&mut self, id: NodeId, checked: bool) {
        if let Some(state) = self.control_mut(id) {
            state.checked = checked;
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).first().copied()
    }

    fn position_in_parent(&self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(id)?;
        let pos = self.children(parent).iter().position(|c| *c == id)?;
        Some((parent, pos))
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let (parent, pos) = self.position_in_parent(id)?;
        self.children(parent).get(pos + 1).copied()
    }

    /// Detach `id` from its parent. The node and its subtree stay allocated.
    pub fn detach(&mut self, id: NodeId) {
        if let Some((parent, pos)) = self.position_in_parent(id) {
            if let Some(p) = self.node_mut(parent) {
                p.children.remove(pos);
            }
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = None;
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Insert `child` into `parent` before `reference`, or at the end when
    /// `reference` is `None` or not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if !self.contains(parent)
            || !self.contains(child)
            || reference == Some(child)
            || self.is_inclusive_ancestor(child, parent)
        {
            return;
        }
        self.detach(child);
        let index = reference
            .and_then(|r| self.children(parent).iter().position(|c| *c == r))
            .unwrap_or_else(|| self.children(parent).len());
        if let Some(p) = self.node_mut(parent) {
            p.children.insert(index, child);
        }
        if let Some(c) = self.node_mut(child) {
            c.parent = Some(parent);
        }
    }

    /// Put `replacement` where `old` is and detach `old`.
    pub fn replace(&mut self, old: NodeId, replacement: NodeId) {
        if let Some(parent) = self.parent(old) {
            self.insert_before(parent, replacement, Some(old));
        }
        self.detach(old);
    }

    /// Detach and release `id` and its whole subtree.
    pub fn free_subtree(&mut self, id: NodeId) {
        self.detach(id);
        let doomed = self.descendants(id);
        for node in doomed {
            if self.focused == Some(node) {
                self.focused = None;
                self.selection = None;
            }
            self.nodes.remove(node);
        }
    }

    /// `id` followed by all its descendants in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.contains(id) {
            return out;
        }
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in self.children(node).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Ancestors of `id`, nearest first, not including `id`.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    /// `true` if `ancestor` is `node` or one of its ancestors.
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        ancestor == node || self.ancestors(node).contains(&ancestor)
    }

    /// `true` if the node is attached under the document root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(id) && self.is_inclusive_ancestor(self.root, id)
    }

    /// Nearest inclusive ancestor satisfying `pred`.
    pub fn closest(&self, id: NodeId, pred: impl Fn(&Self, NodeId) -> bool) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|n| pred(self, *n))
    }

    /// All elements under `scope` (inclusive) whose `name` attribute equals `value`.
    pub fn find_by_attr(&self, scope: NodeId, name: &str, value: &str) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|n| self.attr(*n, name) == Some(value))
            .collect()
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn focus(&mut self, id: NodeId) {
        if self.contains(id) {
            self.focused = Some(id);
            let len = self.value(id).map(|v| v.chars().count()).unwrap_or(0);
            self.selection = Some(Selection { start: len, end: len });
        }
    }

    pub fn blur(&mut self) {
        self.focused = None;
        self.selection = None;
    }

    /// Set the cursor range of the focused control, clamped to its value.
    pub fn set_selection(&mut self, start: usize, end: usize) {
        if let Some(focused) = self.focused {
            let len = self.value(focused).map(|v| v.chars().count()).unwrap_or(0);
            let start = start.min(len);
            let end = end.min(len).max(start);
            self.selection = Some(Selection { start, end });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_detach() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = doc.create_element("DIV");
        let b = doc.create_element("span");
        doc.append_child(root, a);
        doc.insert_before(root, b, Some(a));
        assert_eq!(doc.children(root), &[b, a]);
        assert_eq!(doc.tag(a), Some("div"));
        assert_eq!(doc.next_sibling(b), Some(a));

        doc.detach(b);
        assert_eq!(doc.children(root), &[a]);
        assert!(!doc.is_connected(b));
        assert!(doc.contains(b));
    }

    #[test]
    fn test_freed_ids_never_alias_new_nodes() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = doc.create_element("div");
        let t = doc.create_text("x");
        doc.append_child(root, a);
        doc.append_child(a, t);
        doc.free_subtree(a);
        assert!(!doc.contains(a));
        assert!(!doc.contains(t));

        let fresh = doc.create_element("p");
        assert_ne!(fresh, a);
        assert_ne!(fresh, t);
        assert_eq!(doc.tag(a), None);
        assert_eq!(doc.tag(fresh), Some("p"));
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut doc = Document::new();
        let root = doc.root();
        for _ in 0..1000 {
            let div = doc.create_element("div");
            let text = doc.create_text("x");
            doc.append_child(div, text);
            doc.append_child(root, div);
            doc.free_subtree(div);
        }
        assert_eq!(doc.live_count(), 1);
        assert!(doc.capacity() < 16, "arena grew to {}", doc.capacity());
    }

    #[test]
    fn test_insert_ancestor_into_itself_is_ignored() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = doc.create_element("div");
        doc.append_child(root, a);
        doc.append_child(a, a);
        assert_eq!(doc.children(a), &[] as &[NodeId]);
    }

    #[test]
    fn test_control_state_and_focus() {
        let mut doc = Document::new();
        let root = doc.root();
        let input = doc.create_element("input");
        doc.append_child(root, input);
        doc.set_value(input, "hello");
        doc.focus(input);
        assert_eq!(doc.selection(), Some(Selection { start: 5, end: 5 }));
        doc.set_selection(1, 99);
        assert_eq!(doc.selection(), Some(Selection { start: 1, end: 5 }));
        doc.free_subtree(input);
        assert_eq!(doc.focused(), None);
    }

    #[test]
    fn test_closest_and_find_by_attr() {
        let mut doc = Document::new();
        let root = doc.root();
        let form = doc.create_element("form");
        let input = doc.create_element("input");
        doc.set_attr(input, "name", "email");
        doc.append_child(root, form);
        doc.append_child(form, input);

        assert_eq!(doc.closest(input, |d, n| d.tag(n) == Some("form")), Some(form));
        assert_eq!(doc.find_by_attr(root, "name", "email"), vec![input]);
    }
}
