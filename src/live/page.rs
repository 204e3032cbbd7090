//! The live document: tree, mounted components and cached bindings.

use ahash::AHashMap;
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

use crate::dom::{outer_html, parse_document, Document, NodeId};
use crate::live::binding::{evaluate_condition, Binding, BindingResolver, ModelBinding, ATTR_ID};
use crate::live::component::{ComponentId, ComponentRegistry, ScanReport};

/// Owns everything the runtime mutates in response to signals.
#[derive(Debug)]
pub struct Page {
    pub document: Document,
    pub components: ComponentRegistry,
    resolver: BindingResolver,
    bindings: AHashMap<NodeId, Vec<Binding>>,
    url: String,
    history: Vec<String>,
}

impl Page {
    pub fn new(resolver: BindingResolver) -> Self {
        Self {
            document: Document::new(),
            components: ComponentRegistry::new(),
            resolver,
            bindings: AHashMap::new(),
            url: String::new(),
            history: Vec::new(),
        }
    }

    /// Replace the document with `markup` served at `url` and mount its components.
    pub fn load(&mut self, url: &str, markup: &str) -> ScanReport {
        self.document = parse_document(markup);
        self.components = ComponentRegistry::new();
        self.bindings.clear();
        self.url = url.to_string();
        self.history = vec![url.to_string()];
        self.reattach(self.document.root())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// URLs pushed onto the session history, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Push `url` onto the history and make it current.
    pub fn navigate(&mut self, url: &str) {
        if self.url == url {
            return;
        }
        self.url = url.to_string();
        self.history.push(url.to_string());
    }

    /// Bindings declared on `node`, parsed once and cached.
    pub fn bindings(&mut self, node: NodeId) -> &[Binding] {
        let resolver = &self.resolver;
        let document = &self.document;
        self.bindings
            .entry(node)
            .or_insert_with(|| resolver.resolve(document, node))
    }

    /// Drop cached bindings under `scope` and for nodes no longer alive.
    pub fn invalidate(&mut self, scope: NodeId) {
        let document = &self.document;
        self.bindings
            .retain(|node, _| document.contains(*node) && !document.is_inclusive_ancestor(scope, *node));
    }

    /// Walk from `node` up to its component root looking for a binding.
    pub fn nearest<T>(
        &mut self,
        node: NodeId,
        pick: impl Fn(&Binding) -> Option<T>,
    ) -> Option<(NodeId, T)> {
        let mut chain = vec![node];
        chain.extend(self.document.ancestors(node));
        for candidate in chain {
            if let Some(found) = self.bindings(candidate).iter().find_map(&pick) {
                return Some((candidate, found));
            }
            if self.document.has_attr(candidate, ATTR_ID) {
                break;
            }
        }
        None
    }

    pub fn model_binding(&mut self, node: NodeId) -> Option<ModelBinding> {
        self.bindings(node)
            .iter()
            .find_map(|b| b.as_model().cloned())
    }

    /// Id of the component owning `node`.
    pub fn owner(&self, node: NodeId) -> Option<ComponentId> {
        self.components
            .owner_of(&self.document, node)
            .map(|c| c.id.clone())
    }

    /// Current value of a model-bound control as sent to the server.
    pub fn model_value(&self, node: NodeId) -> JsonValue {
        let doc = &self.document;
        let Some(control) = doc.control(node) else {
            return JsonValue::Null;
        };
        match (doc.tag(node), doc.attr(node, "type")) {
            (Some("input"), Some("checkbox")) => JsonValue::Bool(control.checked),
            (Some("input"), Some("radio")) if !control.checked => JsonValue::Null,
            (Some("select"), _) if doc.has_attr(node, "multiple") => JsonValue::Array(
                doc.descendants(node)
                    .into_iter()
                    .filter(|n| doc.tag(*n) == Some("option"))
                    .filter_map(|n| doc.control(n).filter(|c| c.selected).map(|c| c.value.clone()))
                    .map(JsonValue::String)
                    .collect(),
            ),
            _ => JsonValue::String(control.value.clone()),
        }
    }

    /// Every model-bound value owned by `component` (nested components excluded).
    pub fn model_values(&mut self, component: &str) -> Map<String, JsonValue> {
        let mut values = Map::new();
        let Some(root) = self.components.get(component).map(|c| c.root) else {
            return values;
        };
        for node in self.document.descendants(root) {
            let Some(binding) = self.model_binding(node) else {
                continue;
            };
            if self.owner(node).as_deref() != Some(component) {
                continue;
            }
            // Unchecked radios do not speak for the group.
            let value = self.model_value(node);
            if value.is_null() && values.contains_key(&binding.property) {
                continue;
            }
            values.insert(binding.property, value);
        }
        values
    }

    /// Evaluate `soli-show` expressions under `scope` against their owner's state.
    pub fn apply_conditionals(&mut self, scope: NodeId) {
        for node in self.document.descendants(scope) {
            let expr = self.bindings(node).iter().find_map(|b| match b {
                Binding::Conditional(expr) => Some(expr.clone()),
                _ => None,
            });
            let Some(expr) = expr else {
                continue;
            };
            let visible = self
                .components
                .owner_of(&self.document, node)
                .map(|c| evaluate_condition(&expr, &c.state))
                .unwrap_or(false);
            if visible {
                self.document.remove_attr(node, "hidden");
            } else {
                self.document.set_attr(node, "hidden", "");
            }
        }
    }

    /// Bring bindings, components and conditionals up to date after `scope`
    /// was replaced or reconciled.
    pub fn reattach(&mut self, scope: NodeId) -> ScanReport {
        self.invalidate(scope);
        let report = self.components.scan(&self.document);
        self.apply_conditionals(scope);
        report
    }

    /// `id -> root markup` for every mounted component.
    pub fn component_markup(&self) -> IndexMap<String, String> {
        self.components
            .iter()
            .map(|c| (c.id.clone(), outer_html(&self.document, c.root)))
            .collect()
    }
}
