//! Request lifecycle for one component: build, settle, apply.
//!
//! These functions run with the page locked. The network exchange between
//! [`begin_request`] and [`apply_response`] happens without it, so several
//! requests for one component can be in flight at once. Each carries a
//! sequence number and a response older than the last one applied is not
//! reconciled.

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::dom::{parse_fragment, NodeId, Selection};
use crate::error::LiveError;
use crate::live::binding::{ATTR_ID, ATTR_LOADING};
use crate::live::component::ScanReport;
use crate::live::morph::morph;
use crate::live::page::Page;
use crate::live::protocol::{LiveEvent, RequestPayload, WireRequest, WireResponse};

/// How to find the focused control again after its subtree was rebuilt.
#[derive(Debug, Clone, PartialEq)]
pub enum FocusTarget {
    Model(String),
    Name(String),
    Id(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FocusLocator {
    pub target: FocusTarget,
    pub selection: Option<Selection>,
}

/// Locator for the focused element, if it lies within `root`.
pub fn capture_focus(page: &mut Page, root: NodeId) -> Option<FocusLocator> {
    let focused = page.document.focused()?;
    if !page.document.is_inclusive_ancestor(root, focused) {
        return None;
    }
    let target = if let Some(model) = page.model_binding(focused) {
        FocusTarget::Model(model.property)
    } else if let Some(name) = page.document.attr(focused, "name") {
        FocusTarget::Name(name.to_string())
    } else {
        FocusTarget::Id(page.document.attr(focused, "id")?.to_string())
    };
    Some(FocusLocator {
        target,
        selection: page.document.selection(),
    })
}

/// Put focus back where `locator` says. Best effort.
pub fn restore_focus(page: &mut Page, root: NodeId, locator: &FocusLocator) -> bool {
    if let Some(focused) = page.document.focused() {
        if page.document.is_connected(focused) {
            return true;
        }
    }

    let candidates = page.document.descendants(root);
    let found = candidates.into_iter().find(|node| match &locator.target {
        FocusTarget::Model(property) => page
            .model_binding(*node)
            .is_some_and(|m| &m.property == property),
        FocusTarget::Name(name) => page.document.attr(*node, "name") == Some(name.as_str()),
        FocusTarget::Id(id) => page.document.attr(*node, "id") == Some(id.as_str()),
    });
    let Some(node) = found else {
        debug!(?locator, "focus target gone");
        return false;
    };

    page.document.focus(node);
    if let Some(selection) = locator.selection {
        page.document.set_selection(selection.start, selection.end);
    }
    true
}

/// Build the wire request for `payload`, mark the component loading and
/// return the request with its sequence number.
pub fn begin_request(
    page: &mut Page,
    component_id: &str,
    payload: RequestPayload,
) -> Result<(WireRequest, u64), LiveError> {
    let component = page
        .components
        .get_mut(component_id)
        .ok_or_else(|| LiveError::UnknownComponent(component_id.to_string()))?;
    let seq = component.begin_request();
    let request = WireRequest::new(&component.name, component.state.clone(), payload);
    let root = component.root;
    page.document.set_attr(root, ATTR_LOADING, "");
    Ok((request, seq))
}

/// Settle a request whatever its outcome. The loading marker stays while
/// other requests for the component are pending.
pub fn finish_request(page: &mut Page, component_id: &str) {
    let Some(component) = page.components.get_mut(component_id) else {
        return;
    };
    let root = component.root;
    if component.finish_request() {
        page.document.set_attr(root, ATTR_LOADING, "");
    } else {
        page.document.remove_attr(root, ATTR_LOADING);
    }
}

/// Outcome of applying a response.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Applied {
    pub events: Vec<LiveEvent>,
    /// Components mounted or unmounted by the reconciliation.
    pub report: ScanReport,
}

/// Reconcile the component against `response` and return its events.
pub fn apply_response(
    page: &mut Page,
    component_id: &str,
    seq: u64,
    response: WireResponse,
) -> Result<Applied, LiveError> {
    let component = page
        .components
        .get_mut(component_id)
        .ok_or_else(|| LiveError::UnknownComponent(component_id.to_string()))?;
    if !component.accept_response(seq) {
        debug!(component = %component_id, seq, "stale response not applied");
        return Ok(Applied {
            events: response.events,
            report: ScanReport::default(),
        });
    }
    let root = component.root;

    let (_, report) = reconcile(page, root, &response.html)?;
    Ok(Applied {
        events: response.events,
        report,
    })
}

/// Morph `root` against `markup`, then restore focus and re-attach.
/// Returns the root now in place and what the re-scan found.
pub fn reconcile(page: &mut Page, root: NodeId, markup: &str) -> Result<(NodeId, ScanReport), LiveError> {
    let fragment = parse_fragment(&mut page.document, markup);
    let new_root = fragment.iter().copied().find(|n| page.document.is_element(*n));
    for node in &fragment {
        if Some(*node) != new_root {
            page.document.free_subtree(*node);
        }
    }
    let Some(new_root) = new_root else {
        return Err(LiveError::malformed("response markup has no root element"));
    };

    let locator = capture_focus(page, root);
    let morphed = morph(&mut page.document, root, new_root);

    if morphed != root {
        // The root was replaced; keep the component (and its counters) attached.
        let id = page.document.attr(morphed, ATTR_ID).map(str::to_string);
        if let Some(component) = id.and_then(|id| page.components.get_mut(&id)) {
            if component.root == root {
                component.root = morphed;
            }
        }
    }

    let report = page.reattach(morphed);
    if let Some(locator) = locator {
        restore_focus(page, morphed, &locator);
    }
    Ok((morphed, report))
}

/// Payload for a `$set('prop', value)` call.
pub fn set_payload(args: &[JsonValue]) -> Option<RequestPayload> {
    let property = args.first()?.as_str()?;
    let value = args.get(1).cloned().unwrap_or(JsonValue::Null);
    Some(RequestPayload::model(property, value))
}
