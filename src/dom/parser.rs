//! HTML parsing.
//!
//! Markup runs through html5ever's tree builder into an `RcDom`, which is then
//! copied into the arena. Implied end tags, character references and
//! misnested markup are therefore handled the way a browser handles them.

use html5ever::tendril::TendrilSink;
use html5ever::tree_builder::TreeBuilderOpts;
use html5ever::ParseOpts;
use markup5ever_rcdom::{Handle, NodeData as RcNodeData, RcDom};

use super::{Document, NodeId};

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

pub fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style")
}

fn parse_html(markup: &str) -> RcDom {
    let opts = ParseOpts {
        tree_builder: TreeBuilderOpts {
            exact_errors: false,
            scripting_enabled: false,
            ..TreeBuilderOpts::default()
        },
        ..ParseOpts::default()
    };
    html5ever::parse_document(RcDom::default(), opts).one(markup)
}

/// Parse a page. The document root holds what html5ever builds: leading
/// comments and the `html` element with its `head` and `body`.
pub fn parse_document(markup: &str) -> Document {
    let mut doc = Document::new();
    let root = doc.root();
    let dom = parse_html(markup);
    let mut top = Vec::new();
    for child in dom.document.children.borrow().iter() {
        if let Some(node) = import(&mut doc, child) {
            doc.append_child(root, node);
            top.push(node);
        }
    }
    finish_controls(&mut doc, &top);
    doc
}

/// Parse markup into detached nodes allocated in `doc`.
///
/// The markup is read as body content: the returned nodes are whatever lands
/// in `head` and `body`, in that order, after any leading comments.
pub fn parse_fragment(doc: &mut Document, markup: &str) -> Vec<NodeId> {
    let dom = parse_html(markup);
    let mut top = Vec::new();
    for child in dom.document.children.borrow().iter() {
        match &child.data {
            RcNodeData::Comment { .. } => top.extend(import(doc, child)),
            RcNodeData::Element { .. } => {
                for section in child.children.borrow().iter() {
                    for node in section.children.borrow().iter() {
                        top.extend(import(doc, node));
                    }
                }
            }
            _ => {}
        }
    }
    finish_controls(doc, &top);
    top
}

/// Copy `handle` and its subtree into `doc`. Doctypes and processing
/// instructions have no counterpart and are skipped.
fn import(doc: &mut Document, handle: &Handle) -> Option<NodeId> {
    let node = match &handle.data {
        RcNodeData::Element { name, attrs, .. } => {
            let node = doc.create_element(&name.local);
            for attr in attrs.borrow().iter() {
                doc.set_attr(node, &attr.name.local, &attr.value);
            }
            node
        }
        RcNodeData::Text { contents } => return Some(doc.create_text(&contents.borrow())),
        RcNodeData::Comment { contents } => return Some(doc.create_comment(contents)),
        _ => return None,
    };
    for child in handle.children.borrow().iter() {
        if let Some(child) = import(doc, child) {
            doc.append_child(node, child);
        }
    }
    init_control(doc, node);
    Some(node)
}

/// Seed control state from the rendered attributes.
fn init_control(doc: &mut Document, node: NodeId) {
    if doc.tag(node) == Some("select") {
        return;
    }
    let value = doc.attr(node, "value").unwrap_or_default().to_string();
    let checked = doc.has_attr(node, "checked");
    let selected = doc.has_attr(node, "selected");
    if let Some(state) = doc.control_mut(node) {
        state.value = value;
        state.checked = checked;
        state.selected = selected;
    }
}

/// Controls whose value comes from their content: textarea text, and the
/// selected option of a select.
fn finish_controls(doc: &mut Document, top: &[NodeId]) {
    let all: Vec<NodeId> = top.iter().flat_map(|n| doc.descendants(*n)).collect();
    for node in &all {
        let node = *node;
        match doc.tag(node) {
            Some("textarea") => {
                let text = doc.text_content(node);
                doc.set_value(node, &text);
            }
            Some("option") if !doc.has_attr(node, "value") => {
                let text = doc.text_content(node).trim().to_string();
                doc.set_value(node, &text);
            }
            _ => {}
        }
    }
    for node in all {
        if doc.tag(node) != Some("select") {
            continue;
        }
        let options: Vec<NodeId> = doc
            .descendants(node)
            .into_iter()
            .filter(|n| doc.tag(*n) == Some("option"))
            .collect();
        let chosen = options
            .iter()
            .find(|o| doc.control(**o).is_some_and(|c| c.selected))
            .or_else(|| options.first())
            .and_then(|o| doc.value(*o));
        if let Some(value) = chosen {
            doc.set_value(node, &value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{outer_html, NodeKind};
    use pretty_assertions::assert_eq;

    fn body(doc: &Document) -> NodeId {
        doc.descendants(doc.root())
            .into_iter()
            .find(|n| doc.tag(*n) == Some("body"))
            .unwrap()
    }

    #[test]
    fn test_parse_document_builds_html_skeleton() {
        let doc = parse_document(r#"<!DOCTYPE html><!-- note --><div id="a" class='x y'><p>Hi <b>there</b></p></div>"#);
        let top = doc.children(doc.root());
        assert_eq!(doc.kind(top[0]), Some(&NodeKind::Comment(" note ".to_string())));
        assert_eq!(doc.tag(top[1]), Some("html"));

        let div = doc.children(body(&doc))[0];
        assert_eq!(doc.attr(div, "class"), Some("x y"));
        let p = doc.children(div)[0];
        assert_eq!(doc.children(p).len(), 2);
        assert_eq!(doc.text_content(p), "Hi there");
    }

    #[test]
    fn test_parse_fragment_void_and_unquoted() {
        let mut doc = Document::new();
        let top = parse_fragment(&mut doc, "<input type=text name=q checked><span>ok</span>");
        assert_eq!(top.len(), 2);
        assert_eq!(doc.attr(top[0], "type"), Some("text"));
        assert_eq!(doc.attr(top[0], "checked"), Some(""));
        assert!(doc.control(top[0]).is_some_and(|c| c.checked));
        assert_eq!(doc.tag(top[1]), Some("span"));
        assert!(top.iter().all(|n| doc.parent(*n).is_none()));
    }

    #[test]
    fn test_implied_end_tags() {
        let mut doc = Document::new();
        let list = parse_fragment(&mut doc, "<ul><li>a<li>b</ul>")[0];
        assert_eq!(outer_html(&doc, list), "<ul><li>a</li><li>b</li></ul>");

        let select = parse_fragment(
            &mut doc,
            "<select><option value=a>A<option value=b selected>B</select>",
        )[0];
        assert_eq!(doc.children(select).len(), 2);
        assert_eq!(doc.value(select).as_deref(), Some("b"));
    }

    #[test]
    fn test_character_references_are_decoded() {
        let mut doc = Document::new();
        let p = parse_fragment(&mut doc, r#"<p title="a &amp; &quot;b&quot;">it&#x27;s &#8212; &hellip; ok</p>"#)[0];
        assert_eq!(doc.attr(p, "title"), Some(r#"a & "b""#));
        assert_eq!(doc.text_content(p), "it's \u{2014} \u{2026} ok");
    }

    #[test]
    fn test_misnested_close_is_recovered() {
        let mut doc = Document::new();
        let top = parse_fragment(&mut doc, "<div><span>a</div><p>b</p>");
        assert_eq!(top.len(), 2);
        assert_eq!(outer_html(&doc, top[0]), "<div><span>a</span></div>");
    }

    #[test]
    fn test_parse_control_values() {
        let mut doc = Document::new();
        let top = parse_fragment(
            &mut doc,
            r#"<textarea name="bio">hello</textarea><select name="s"><option>a</option><option value="b" selected>B</option></select>"#,
        );
        assert_eq!(doc.value(top[0]).as_deref(), Some("hello"));
        assert_eq!(doc.value(top[1]).as_deref(), Some("b"));
    }

    #[test]
    fn test_less_than_in_text() {
        let mut doc = Document::new();
        let p = parse_fragment(&mut doc, "<p>1 < 2</p>")[0];
        assert_eq!(doc.text_content(p), "1 < 2");
    }
}
