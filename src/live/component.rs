//! Mounted component instances and their registry.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use ahash::AHashSet;
use tracing::debug;

use crate::dom::{Document, NodeId};
use crate::live::binding::{parse_listeners, ATTR_ID, ATTR_LISTENERS, ATTR_NAME, ATTR_STATE};

/// Type alias for component ids (`soli-id`).
pub type ComponentId = String;

/// A mounted component: an element carrying `soli-id`.
#[derive(Debug, Clone)]
pub struct LiveComponent {
    pub id: ComponentId,
    pub name: String,
    pub state: JsonValue,
    pub subscriptions: AHashSet<String>,
    pub root: NodeId,
    in_flight: usize,
    next_seq: u64,
    applied_seq: u64,
}

impl LiveComponent {
    /// Read a component from its root markers. `None` without a `soli-id`.
    pub fn from_root(doc: &Document, root: NodeId) -> Option<Self> {
        let id = doc.attr(root, ATTR_ID)?.trim();
        if id.is_empty() {
            return None;
        }
        let mut component = Self {
            id: id.to_string(),
            name: String::new(),
            state: JsonValue::Null,
            subscriptions: AHashSet::new(),
            root,
            in_flight: 0,
            next_seq: 0,
            applied_seq: 0,
        };
        component.refresh(doc);
        Some(component)
    }

    /// Re-read name, state and subscriptions from the root markers.
    pub fn refresh(&mut self, doc: &Document) {
        self.name = doc
            .attr(self.root, ATTR_NAME)
            .map(str::to_string)
            .unwrap_or_else(|| self.id.clone());
        self.state = match doc.attr(self.root, ATTR_STATE) {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                debug!(component = %self.id, "state is not JSON: {}", e);
                JsonValue::String(raw.to_string())
            }),
            None => JsonValue::Null,
        };
        self.subscriptions = doc
            .attr(self.root, ATTR_LISTENERS)
            .map(parse_listeners)
            .unwrap_or_default();
    }

    pub fn subscribes_to(&self, event: &str) -> bool {
        self.subscriptions.contains(event)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Allocate the sequence number for a new request.
    pub fn begin_request(&mut self) -> u64 {
        self.next_seq += 1;
        self.in_flight += 1;
        self.next_seq
    }

    /// Mark a request settled. Returns whether others are still pending.
    pub fn finish_request(&mut self) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.in_flight > 0
    }

    /// Whether a response with `seq` is newer than the last applied one.
    /// Accepting it records it as applied.
    pub fn accept_response(&mut self, seq: u64) -> bool {
        if seq <= self.applied_seq {
            return false;
        }
        self.applied_seq = seq;
        true
    }
}

/// What a registry scan changed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanReport {
    pub mounted: Vec<ComponentId>,
    pub unmounted: Vec<ComponentId>,
}

/// Registry of mounted components, in mount order.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: IndexMap<ComponentId, LiveComponent>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: LiveComponent) {
        debug!(component = %component.id, name = %component.name, "mounted");
        self.components.insert(component.id.clone(), component);
    }

    pub fn unregister(&mut self, id: &str) -> Option<LiveComponent> {
        let removed = self.components.shift_remove(id);
        if removed.is_some() {
            debug!(component = %id, "unmounted");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&LiveComponent> {
        self.components.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut LiveComponent> {
        self.components.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        self.components.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveComponent> {
        self.components.values()
    }

    /// Component whose root is `node` or its nearest ancestor.
    pub fn owner_of(&self, doc: &Document, node: NodeId) -> Option<&LiveComponent> {
        let root = doc.closest(node, |d, n| {
            d.attr(n, ATTR_ID)
                .is_some_and(|id| self.components.get(id).is_some_and(|c| c.root == n))
        })?;
        let id = doc.attr(root, ATTR_ID)?;
        self.components.get(id)
    }

    /// Bring the registry in line with the document: drop components whose
    /// root left it, register new roots and re-read markers on the rest.
    pub fn scan(&mut self, doc: &Document) -> ScanReport {
        let mut report = ScanReport::default();

        let detached: Vec<ComponentId> = self
            .components
            .values()
            .filter(|c| !doc.is_connected(c.root) || doc.attr(c.root, ATTR_ID) != Some(c.id.as_str()))
            .map(|c| c.id.clone())
            .collect();
        for id in detached {
            self.unregister(&id);
            report.unmounted.push(id);
        }

        for node in doc.descendants(doc.root()) {
            let Some(id) = doc.attr(node, ATTR_ID) else {
                continue;
            };
            match self.components.get_mut(id) {
                Some(existing) if existing.root == node => existing.refresh(doc),
                Some(_) => debug!(component = %id, "duplicate soli-id ignored"),
                None => {
                    if let Some(component) = LiveComponent::from_root(doc, node) {
                        report.mounted.push(component.id.clone());
                        self.register(component);
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const PAGE: &str = r#"<main>
        <div soli-id="c1" soli-name="counter" soli-state='{"count": 2}' soli-listeners='["saved"]'>
            <button>+</button>
            <section soli-id="c2" soli-listeners="saved, deleted"><span>inner</span></section>
        </div>
    </main>"#;

    #[test]
    fn test_scan_registers_nested_components() {
        let doc = parse_document(PAGE);
        let mut registry = ComponentRegistry::new();
        let report = registry.scan(&doc);

        assert_eq!(report.mounted, vec!["c1".to_string(), "c2".to_string()]);
        let c1 = registry.get("c1").unwrap();
        assert_eq!(c1.name, "counter");
        assert_eq!(c1.state, json!({"count": 2}));
        assert!(c1.subscribes_to("saved"));
        let c2 = registry.get("c2").unwrap();
        assert_eq!(c2.name, "c2");
        assert!(c2.subscribes_to("deleted"));
    }

    #[test]
    fn test_owner_is_nearest_component() {
        let doc = parse_document(PAGE);
        let mut registry = ComponentRegistry::new();
        registry.scan(&doc);

        let button = doc.descendants(doc.root()).into_iter().find(|n| doc.tag(*n) == Some("button")).unwrap();
        let span = doc.descendants(doc.root()).into_iter().find(|n| doc.tag(*n) == Some("span")).unwrap();
        assert_eq!(registry.owner_of(&doc, button).unwrap().id, "c1");
        assert_eq!(registry.owner_of(&doc, span).unwrap().id, "c2");
    }

    #[test]
    fn test_scan_drops_detached_roots() {
        let mut doc = parse_document(PAGE);
        let mut registry = ComponentRegistry::new();
        registry.scan(&doc);

        let c2 = registry.get("c2").unwrap().root;
        doc.detach(c2);
        let report = registry.scan(&doc);
        assert_eq!(report.unmounted, vec!["c2".to_string()]);
        assert_eq!(registry.ids(), vec!["c1".to_string()]);
    }

    #[test]
    fn test_sequence_numbers_reject_stale_responses() {
        let doc = parse_document(PAGE);
        let mut registry = ComponentRegistry::new();
        registry.scan(&doc);
        let c1 = registry.get_mut("c1").unwrap();

        let first = c1.begin_request();
        let second = c1.begin_request();
        assert_eq!(c1.in_flight(), 2);
        assert!(c1.accept_response(second));
        assert!(c1.finish_request());
        assert!(!c1.accept_response(first));
        assert!(!c1.finish_request());
    }

    #[test]
    fn test_non_json_state_kept_raw() {
        let doc = parse_document(r#"<div soli-id="x" soli-state="plain"></div>"#);
        let mut registry = ComponentRegistry::new();
        registry.scan(&doc);
        assert_eq!(registry.get("x").unwrap().state, json!("plain"));
    }
}
