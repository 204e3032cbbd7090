//! Markup serialization.

use super::{Document, NodeId, NodeKind};
use crate::dom::parser::{is_raw_text_tag, is_void_tag};

/// Escape text content.
pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape a double-quoted attribute value.
pub fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Serialize `id` including its own tag.
pub fn outer_html(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    write_node(doc, id, &mut out);
    out
}

/// Serialize the children of `id`.
pub fn inner_html(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    for child in doc.children(id) {
        write_node(doc, *child, &mut out);
    }
    out
}

fn write_node(doc: &Document, id: NodeId, out: &mut String) {
    let Some(node) = doc.node(id) else {
        return;
    };
    match &node.kind {
        NodeKind::Root => {
            for child in &node.children {
                write_node(doc, *child, out);
            }
        }
        NodeKind::Text(text) => {
            let raw_parent = doc.parent(id).and_then(|p| doc.tag(p)).is_some_and(is_raw_text_tag);
            if raw_parent {
                out.push_str(text);
            } else {
                out.push_str(&escape_text(text));
            }
        }
        NodeKind::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeKind::Element(tag) => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in &node.attrs {
                out.push(' ');
                out.push_str(name);
                if !value.is_empty() {
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
            }
            out.push('>');
            if is_void_tag(tag) {
                return;
            }
            for child in &node.children {
                write_node(doc, *child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_fragment;

    #[test]
    fn test_escaped_attribute_parses_back() {
        let raw = r#"a < b && "c" > d"#;
        let mut doc = Document::new();
        let markup = format!(r#"<p title="{}"></p>"#, escape_attr(raw));
        let p = parse_fragment(&mut doc, &markup)[0];
        assert_eq!(doc.attr(p, "title"), Some(raw));
        assert_eq!(outer_html(&doc, p), markup);
    }

    #[test]
    fn test_outer_html_void_and_boolean_attrs() {
        let mut doc = Document::new();
        let div = parse_fragment(&mut doc, r#"<div id="a"><input disabled value="x &amp; y"><br></div>"#)[0];
        assert_eq!(
            outer_html(&doc, div),
            r#"<div id="a"><input disabled value="x &amp; y"><br></div>"#
        );
    }

    #[test]
    fn test_raw_text_is_not_escaped() {
        let mut doc = Document::new();
        let div = parse_fragment(&mut doc, "<div><script>if (a < b) {}</script></div>")[0];
        assert_eq!(inner_html(&doc, div), "<script>if (a < b) {}</script>");
    }
}
