//! Tree reconciler.
//!
//! `morph` mutates an existing subtree in place until it matches a freshly
//! parsed one, reusing nodes wherever possible. Elements whose `id` occurs
//! exactly once in both trees are "persistent": they are matched by identity,
//! parked in a pantry when removed, and moved (never recreated) when they show
//! up elsewhere. Everything else is matched structurally by tag.

use ahash::{AHashMap, AHashSet};
use tracing::trace;

use crate::dom::{Document, NodeId, NodeKind};

/// Counters describing what a reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MorphStats {
    /// Nodes inserted that did not exist in the old tree.
    pub inserted: usize,
    /// Old nodes taken out of their sibling run (discarded or parked).
    pub removed: usize,
    /// Persistent nodes moved to a new position.
    pub moved: usize,
    pub attrs_changed: usize,
    pub texts_changed: usize,
}

impl MorphStats {
    /// No node was created, destroyed or moved.
    pub fn is_structurally_unchanged(&self) -> bool {
        self.inserted == 0 && self.removed == 0 && self.moved == 0
    }
}

struct MorphContext {
    /// For every node, the persistent ids found in its subtree.
    id_map: AHashMap<NodeId, AHashSet<String>>,
    persistent: AHashSet<String>,
    /// Old persistent elements by id.
    old_by_id: AHashMap<String, NodeId>,
    /// Detached old nodes that contain persistent ids.
    pantry: Vec<NodeId>,
    focused: Option<NodeId>,
    stats: MorphStats,
}

impl MorphContext {
    fn new(doc: &Document, old_root: NodeId, new_root: NodeId) -> Self {
        let old_ids = unique_ids(doc, old_root);
        let new_ids = unique_ids(doc, new_root);
        let persistent: AHashSet<String> = old_ids
            .keys()
            .filter(|id| new_ids.contains_key(*id))
            .cloned()
            .collect();

        let mut id_map: AHashMap<NodeId, AHashSet<String>> = AHashMap::new();
        let mut old_by_id = AHashMap::new();
        for (ids, root, is_old) in [(&old_ids, old_root, true), (&new_ids, new_root, false)] {
            for (id, node) in ids.iter() {
                if !persistent.contains(id) {
                    continue;
                }
                if is_old {
                    old_by_id.insert(id.clone(), *node);
                }
                let mut current = Some(*node);
                while let Some(n) = current {
                    id_map.entry(n).or_default().insert(id.clone());
                    if n == root {
                        break;
                    }
                    current = doc.parent(n);
                }
            }
        }

        Self {
            id_map,
            persistent,
            old_by_id,
            pantry: Vec::new(),
            focused: doc.focused(),
            stats: MorphStats::default(),
        }
    }
}

/// Element ids under `root` (inclusive) that occur exactly once.
fn unique_ids(doc: &Document, root: NodeId) -> AHashMap<String, NodeId> {
    let mut seen: AHashMap<String, NodeId> = AHashMap::new();
    let mut duplicated: AHashSet<String> = AHashSet::new();
    for node in doc.descendants(root) {
        if !doc.is_element(node) {
            continue;
        }
        let Some(id) = doc.attr(node, "id").filter(|id| !id.is_empty()) else {
            continue;
        };
        if seen.insert(id.to_string(), node).is_some() {
            duplicated.insert(id.to_string());
        }
    }
    if !duplicated.is_empty() {
        trace!(?duplicated, "Duplicate ids excluded from persistence");
    }
    seen.retain(|id, _| !duplicated.contains(id));
    seen
}

/// Reconcile `old_root` against `new_root` and return the root now in place.
///
/// `new_root` is consumed: nodes are moved out of it and whatever is left is
/// freed. The returned id is `old_root` unless the roots are incompatible
/// (different tag or id), in which case the new content replaces it.
pub fn morph(doc: &mut Document, old_root: NodeId, new_root: NodeId) -> NodeId {
    morph_with_stats(doc, old_root, new_root).0
}

pub fn morph_with_stats(doc: &mut Document, old_root: NodeId, new_root: NodeId) -> (NodeId, MorphStats) {
    let mut ctx = MorphContext::new(doc, old_root, new_root);

    let result = if is_soft_match(doc, old_root, new_root) {
        morph_node(&mut ctx, doc, old_root, new_root);
        old_root
    } else {
        let replacement = import_node(&mut ctx, doc, new_root);
        doc.replace(old_root, replacement);
        remove_old(&mut ctx, doc, old_root);
        ctx.stats.inserted += 1;
        replacement
    };

    if result != new_root && doc.contains(new_root) {
        doc.free_subtree(new_root);
    }
    for parked in std::mem::take(&mut ctx.pantry) {
        if doc.contains(parked) && doc.parent(parked).is_none() && parked != result {
            doc.free_subtree(parked);
        }
    }

    trace!(stats = ?ctx.stats, "Morph finished");
    (result, ctx.stats)
}

fn morph_node(ctx: &mut MorphContext, doc: &mut Document, old: NodeId, new: NodeId) {
    match (doc.kind(old).cloned(), doc.kind(new).cloned()) {
        (Some(NodeKind::Text(a)), Some(NodeKind::Text(b)))
        | (Some(NodeKind::Comment(a)), Some(NodeKind::Comment(b))) => {
            if a != b {
                doc.set_text(old, &b);
                ctx.stats.texts_changed += 1;
            }
        }
        (Some(NodeKind::Element(tag)), Some(NodeKind::Element(_))) => {
            sync_element(ctx, doc, &tag, old, new);
            morph_children(ctx, doc, old, new);
        }
        (Some(NodeKind::Root), Some(NodeKind::Root)) => {
            morph_children(ctx, doc, old, new);
        }
        _ => {
            let replacement = import_node(ctx, doc, new);
            doc.replace(old, replacement);
            remove_old(ctx, doc, old);
            ctx.stats.inserted += 1;
        }
    }
}

/// Copy attributes from `new` to `old`, keeping live control input unless
/// the new markup says otherwise.
fn sync_element(ctx: &mut MorphContext, doc: &mut Document, tag: &str, old: NodeId, new: NodeId) {
    let had_checked = doc.has_attr(old, "checked");
    let had_selected = doc.has_attr(old, "selected");
    let new_attrs = doc.attrs(new);

    for (name, value) in &new_attrs {
        if doc.attr(old, name) != Some(value.as_str()) {
            doc.set_attr(old, name, value);
            ctx.stats.attrs_changed += 1;
        }
    }
    let stale: Vec<String> = doc
        .attrs(old)
        .into_iter()
        .map(|(name, _)| name)
        .filter(|name| !new_attrs.iter().any(|(n, _)| n == name))
        .collect();
    for name in stale {
        doc.remove_attr(old, &name);
        ctx.stats.attrs_changed += 1;
    }

    if doc.control(old).is_none() {
        return;
    }

    let explicit_value = new_attrs
        .iter()
        .find(|(n, _)| n == "value")
        .map(|(_, v)| v.clone());
    let has_checked = doc.has_attr(new, "checked");
    let has_selected = doc.has_attr(new, "selected");
    let explicit_select = (tag == "select")
        .then(|| {
            let chosen = doc
                .descendants(new)
                .into_iter()
                .any(|n| doc.tag(n) == Some("option") && doc.has_attr(n, "selected"));
            chosen.then(|| doc.value(new)).flatten()
        })
        .flatten();

    if let Some(state) = doc.control_mut(old) {
        if let Some(value) = explicit_value.or(explicit_select) {
            state.value = value;
        }
        if has_checked != had_checked {
            state.checked = has_checked;
        }
        if has_selected != had_selected {
            state.selected = has_selected;
        }
    }
}

fn morph_children(ctx: &mut MorphContext, doc: &mut Document, old_parent: NodeId, new_parent: NodeId) {
    let new_children: Vec<NodeId> = doc.children(new_parent).to_vec();
    let mut cursor = doc.first_child(old_parent);

    for new_child in new_children {
        if let Some(start) = cursor {
            if let Some(matched) = find_best_match(ctx, doc, new_child, start) {
                remove_until(ctx, doc, start, matched);
                morph_node(ctx, doc, matched, new_child);
                cursor = doc.next_sibling(matched);
                continue;
            }
        }

        if let Some(existing) = find_persistent(ctx, doc, new_child, old_parent) {
            if Some(existing) != cursor {
                doc.insert_before(old_parent, existing, cursor);
                ctx.stats.moved += 1;
            }
            morph_node(ctx, doc, existing, new_child);
            cursor = doc.next_sibling(existing);
            continue;
        }

        // Importing may pull persistent nodes out of this run, the cursor included.
        let remaining = siblings_from(doc, cursor);
        let inserted = import_node(ctx, doc, new_child);
        cursor = remaining
            .into_iter()
            .find(|n| doc.parent(*n) == Some(old_parent));
        doc.insert_before(old_parent, inserted, cursor);
        ctx.stats.inserted += 1;
    }

    while let Some(node) = cursor {
        cursor = doc.next_sibling(node);
        remove_old(ctx, doc, node);
    }
}

/// Scan the old siblings from `start` for the best partner of `new_child`.
///
/// An id-set match wins immediately. A new node with a persistent id of its
/// own only id-set matches the old node with that id. Otherwise the first structural match is
/// kept as a fallback, unless the new node's following siblings match the old
/// run twice first, which means the old node probably belongs to them.
fn find_best_match(ctx: &MorphContext, doc: &Document, new_child: NodeId, start: NodeId) -> Option<NodeId> {
    let mut soft: Option<NodeId> = None;
    let persistent_new = has_persistent_id(ctx, doc, new_child);
    let mut soft_blocked = persistent_new;
    let mut next_new = doc.next_sibling(new_child);
    let mut sibling_soft_matches = 0;
    let mut cursor = Some(start);

    while let Some(old) = cursor {
        if is_soft_match(doc, old, new_child) {
            // A persistent node only pairs with the old element carrying its id,
            // not with an ancestor that merely contains it.
            let same_id = !persistent_new || doc.attr(old, "id") == doc.attr(new_child, "id");
            if same_id && is_id_set_match(ctx, old, new_child) {
                return Some(old);
            }
            if soft.is_none() && !soft_blocked && !ctx.id_map.contains_key(&old) {
                soft = Some(old);
            }
        }

        if soft.is_none() && !soft_blocked {
            if let Some(upcoming) = next_new {
                if is_soft_match(doc, old, upcoming) {
                    sibling_soft_matches += 1;
                    next_new = doc.next_sibling(upcoming);
                    if sibling_soft_matches >= 2 {
                        soft_blocked = true;
                    }
                }
            }
        }

        // Never move the focused element out of the way.
        if ctx.focused.is_some_and(|f| doc.is_inclusive_ancestor(old, f)) {
            break;
        }
        cursor = doc.next_sibling(old);
    }

    if soft_blocked {
        None
    } else {
        soft
    }
}

fn siblings_from(doc: &Document, start: Option<NodeId>) -> Vec<NodeId> {
    let Some(start) = start else {
        return Vec::new();
    };
    match doc.parent(start) {
        Some(parent) => doc
            .children(parent)
            .iter()
            .copied()
            .skip_while(|n| *n != start)
            .collect(),
        None => Vec::new(),
    }
}

fn has_persistent_id(ctx: &MorphContext, doc: &Document, node: NodeId) -> bool {
    doc.attr(node, "id").is_some_and(|id| ctx.persistent.contains(id))
}

fn is_soft_match(doc: &Document, old: NodeId, new: NodeId) -> bool {
    match (doc.kind(old), doc.kind(new)) {
        (Some(NodeKind::Element(a)), Some(NodeKind::Element(b))) => {
            a == b
                && match doc.attr(old, "id").filter(|id| !id.is_empty()) {
                    Some(id) => doc.attr(new, "id") == Some(id),
                    None => true,
                }
        }
        (Some(NodeKind::Text(_)), Some(NodeKind::Text(_)))
        | (Some(NodeKind::Comment(_)), Some(NodeKind::Comment(_)))
        | (Some(NodeKind::Root), Some(NodeKind::Root)) => true,
        _ => false,
    }
}

fn is_id_set_match(ctx: &MorphContext, old: NodeId, new: NodeId) -> bool {
    match (ctx.id_map.get(&old), ctx.id_map.get(&new)) {
        (Some(a), Some(b)) => a.iter().any(|id| b.contains(id)),
        _ => false,
    }
}

/// An old persistent element (in the tree or the pantry) that `new_child`
/// should reuse.
fn find_persistent(ctx: &MorphContext, doc: &Document, new_child: NodeId, old_parent: NodeId) -> Option<NodeId> {
    let id = doc.attr(new_child, "id")?;
    if !ctx.persistent.contains(id) {
        return None;
    }
    let existing = *ctx.old_by_id.get(id)?;
    let usable = doc.contains(existing)
        && doc.attr(existing, "id") == Some(id)
        && is_soft_match(doc, existing, new_child)
        && !doc.is_inclusive_ancestor(existing, old_parent);
    usable.then_some(existing)
}

/// Bring a new node into the old tree. Nodes without persistent descendants
/// are moved over as they are; otherwise an empty copy is built up so the
/// persistent descendants can be pulled in from the old tree.
fn import_node(ctx: &mut MorphContext, doc: &mut Document, new_node: NodeId) -> NodeId {
    if !ctx.id_map.contains_key(&new_node) {
        doc.detach(new_node);
        return new_node;
    }
    match doc.shallow_clone(new_node) {
        Some(shell) => {
            morph_children(ctx, doc, shell, new_node);
            shell
        }
        None => new_node,
    }
}

fn remove_until(ctx: &mut MorphContext, doc: &mut Document, start: NodeId, end: NodeId) {
    let mut cursor = Some(start);
    while let Some(node) = cursor {
        if node == end {
            break;
        }
        cursor = doc.next_sibling(node);
        remove_old(ctx, doc, node);
    }
}

fn remove_old(ctx: &mut MorphContext, doc: &mut Document, node: NodeId) {
    ctx.stats.removed += 1;
    if ctx.id_map.contains_key(&node) {
        doc.detach(node);
        ctx.pantry.push(node);
    } else {
        doc.free_subtree(node);
    }
}
