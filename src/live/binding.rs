//! Binding resolver.
//!
//! Turns `soli-*` attributes on a node into typed [`Binding`]s:
//! - `soli-click="save(1, 'draft')"` - action
//! - `soli-model[.lazy|.blur|.debounce[.<N>ms]]="title"` - model binding
//! - `soli-keydown.enter="search"`, `soli-submit`, `soli-change` - event listeners
//! - `soli-show="!collapsed"` - conditional

use serde_json::{Map, Value as JsonValue};
use ahash::AHashSet;
use std::time::Duration;
use tracing::debug;

use crate::dom::{Document, NodeId};
use crate::error::BindingParseError;

pub const BINDING_PREFIX: &str = "soli-";

/// Component identity marker.
pub const ATTR_ID: &str = "soli-id";
/// Component logical name.
pub const ATTR_NAME: &str = "soli-name";
/// Serialized component state (JSON).
pub const ATTR_STATE: &str = "soli-state";
/// Event names the component subscribes to.
pub const ATTR_LISTENERS: &str = "soli-listeners";
/// Set by the runtime while a request for the component is in flight.
pub const ATTR_LOADING: &str = "soli-loading";

/// Argument asking for the fields of the enclosing modal to be appended.
pub const MODAL_MARKER: &str = "$modal";

/// Magic action that re-renders without changing anything.
pub const REFRESH_ACTION: &str = "$refresh";

/// Magic action `$set('prop', value)`.
pub const SET_ACTION: &str = "$set";

/// A parsed `method(arg, ...)` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub method: String,
    pub args: Vec<JsonValue>,
    /// The `$modal` marker was present.
    pub collect_modal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelMode {
    Live,
    Lazy,
    Blur,
    Debounce,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelBinding {
    pub property: String,
    pub mode: ModelMode,
    /// Only set for `Live` and `Debounce`.
    pub debounce: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Action(ActionCall),
    Model(ModelBinding),
    EventListener {
        event: String,
        key: Option<String>,
        action: ActionCall,
    },
    Conditional(String),
}

impl Binding {
    pub fn as_model(&self) -> Option<&ModelBinding> {
        match self {
            Binding::Model(model) => Some(model),
            _ => None,
        }
    }
}

/// Resolves binding attributes with a configured default debounce.
#[derive(Debug, Clone)]
pub struct BindingResolver {
    default_debounce: Duration,
}

impl BindingResolver {
    pub fn new(default_debounce: Duration) -> Self {
        Self { default_debounce }
    }

    /// All bindings on `node`. Malformed attributes are dropped and logged.
    pub fn resolve(&self, doc: &Document, node: NodeId) -> Vec<Binding> {
        let mut bindings = Vec::new();
        let mut has_model = false;

        for (name, value) in doc.attrs(node) {
            match self.parse_attr(&name, &value) {
                Ok(Some(Binding::Model(model))) => {
                    if has_model {
                        debug!("{}", BindingParseError::DuplicateModel(name));
                        continue;
                    }
                    has_model = true;
                    bindings.push(Binding::Model(model));
                }
                Ok(Some(binding)) => bindings.push(binding),
                Ok(None) => {}
                Err(e) => debug!(attr = %name, "{}", e),
            }
        }

        bindings
    }

    /// Parse a single attribute. `Ok(None)` for attributes that are not
    /// bindings, including the component markers.
    pub fn parse_attr(&self, name: &str, value: &str) -> Result<Option<Binding>, BindingParseError> {
        let Some(rest) = name.strip_prefix(BINDING_PREFIX) else {
            return Ok(None);
        };
        let mut parts = rest.split('.');
        let base = parts.next().unwrap_or_default();
        let modifiers: Vec<&str> = parts.collect();

        match base {
            "click" => Ok(Some(Binding::Action(parse_action(value)?))),
            "model" => Ok(Some(Binding::Model(self.parse_model(name, &modifiers, value)?))),
            "keydown" | "keyup" => Ok(Some(Binding::EventListener {
                event: base.to_string(),
                key: modifiers.first().map(|k| k.to_ascii_lowercase()),
                action: parse_action(value)?,
            })),
            "submit" | "change" => Ok(Some(Binding::EventListener {
                event: base.to_string(),
                key: None,
                action: parse_action(value)?,
            })),
            "show" => {
                let expr = value.trim();
                if expr.is_empty() {
                    return Err(BindingParseError::EmptyValue(name.to_string()));
                }
                Ok(Some(Binding::Conditional(expr.to_string())))
            }
            _ => Ok(None),
        }
    }

    fn parse_model(
        &self,
        attr: &str,
        modifiers: &[&str],
        value: &str,
    ) -> Result<ModelBinding, BindingParseError> {
        let property = value.trim();
        if property.is_empty() {
            return Err(BindingParseError::EmptyValue(attr.to_string()));
        }

        let (mode, debounce) = match modifiers {
            [] => (ModelMode::Live, Some(self.default_debounce)),
            ["lazy"] => (ModelMode::Lazy, None),
            ["blur"] => (ModelMode::Blur, None),
            ["debounce"] => (ModelMode::Debounce, Some(self.default_debounce)),
            ["debounce", duration] => (ModelMode::Debounce, Some(parse_duration(duration)?)),
            [other, ..] => {
                return Err(BindingParseError::UnknownModifier {
                    attr: attr.to_string(),
                    modifier: other.to_string(),
                })
            }
        };

        Ok(ModelBinding {
            property: property.to_string(),
            mode,
            debounce,
        })
    }
}

/// `500ms`, `2s` or a bare millisecond count.
fn parse_duration(raw: &str) -> Result<Duration, BindingParseError> {
    let invalid = || BindingParseError::InvalidDebounce(raw.to_string());
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.parse().map(Duration::from_millis).map_err(|_| invalid());
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return secs.parse().map(Duration::from_secs).map_err(|_| invalid());
    }
    raw.parse().map(Duration::from_millis).map_err(|_| invalid())
}

/// Parse `method` or `method(arg1, arg2, ...)`.
pub fn parse_action(expr: &str) -> Result<ActionCall, BindingParseError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(BindingParseError::malformed(expr, "empty expression"));
    }

    let (method, inner) = match expr.find('(') {
        Some(open) => {
            let Some(inner) = expr[open + 1..].strip_suffix(')') else {
                return Err(BindingParseError::malformed(expr, "missing closing parenthesis"));
            };
            (expr[..open].trim(), Some(inner))
        }
        None => (expr, None),
    };

    if method.is_empty() || !method.chars().all(is_method_char) {
        return Err(BindingParseError::malformed(expr, "invalid method name"));
    }

    let mut call = ActionCall {
        method: method.to_string(),
        args: Vec::new(),
        collect_modal: false,
    };

    if let Some(inner) = inner {
        for raw in split_args(expr, inner)? {
            if raw == MODAL_MARKER {
                call.collect_modal = true;
            } else {
                call.args.push(parse_arg(&raw));
            }
        }
    }

    Ok(call)
}

fn is_method_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// Split on top-level commas, respecting quotes and brackets.
fn split_args(expr: &str, inner: &str) -> Result<Vec<String>, BindingParseError> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in inner.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(BindingParseError::malformed(expr, "unbalanced brackets"));
                }
                current.push(c);
            }
            ',' if depth == 0 => {
                let arg = current.trim().to_string();
                if arg.is_empty() {
                    return Err(BindingParseError::malformed(expr, "empty argument"));
                }
                args.push(arg);
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if quote.is_some() {
        return Err(BindingParseError::malformed(expr, "unterminated string"));
    }
    if depth != 0 {
        return Err(BindingParseError::malformed(expr, "unbalanced brackets"));
    }
    let last = current.trim().to_string();
    if last.is_empty() {
        return Err(BindingParseError::malformed(expr, "empty argument"));
    }
    args.push(last);
    Ok(args)
}

/// Literal (number, boolean, null, JSON) or a de-quoted string.
fn parse_arg(raw: &str) -> JsonValue {
    if let Ok(value) = serde_json::from_str::<JsonValue>(raw) {
        return value;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        let inner = &raw[1..raw.len() - 1];
        return JsonValue::String(inner.replace("\\'", "'"));
    }
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return JsonValue::String(raw[1..raw.len() - 1].to_string());
    }
    JsonValue::String(raw.to_string())
}

/// Dialog-like container.
pub fn is_modal(doc: &Document, node: NodeId) -> bool {
    doc.tag(node) == Some("dialog")
        || doc.attr(node, "role") == Some("dialog")
        || doc
            .attr(node, "class")
            .is_some_and(|c| c.split_whitespace().any(|cls| cls == "modal"))
}

/// Named field values inside the nearest modal ancestor of `node`.
pub fn collect_modal_fields(doc: &Document, node: NodeId) -> Map<String, JsonValue> {
    let mut fields = Map::new();
    let Some(modal) = doc.closest(node, is_modal) else {
        return fields;
    };

    for field in doc.descendants(modal) {
        let Some(name) = doc.attr(field, "name") else {
            continue;
        };
        let Some(control) = doc.control(field) else {
            continue;
        };
        if doc.tag(field) == Some("option") {
            continue;
        }
        match doc.attr(field, "type") {
            Some("checkbox") => {
                fields.insert(name.to_string(), JsonValue::Bool(control.checked));
            }
            Some("radio") => {
                if control.checked {
                    fields.insert(name.to_string(), JsonValue::String(control.value.clone()));
                }
            }
            _ => {
                fields.insert(name.to_string(), JsonValue::String(control.value.clone()));
            }
        }
    }

    fields
}

/// Parse `soli-listeners`: a JSON array or a comma-separated list.
pub fn parse_listeners(raw: &str) -> AHashSet<String> {
    if let Ok(names) = serde_json::from_str::<Vec<String>>(raw) {
        return names.into_iter().filter(|n| !n.is_empty()).collect();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

/// Does a pressed key satisfy a `soli-keydown.<filter>` binding?
pub fn key_matches(filter: Option<&str>, key: &str) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let normalize = |k: &str| match k.to_ascii_lowercase().as_str() {
        "esc" => "escape".to_string(),
        " " | "spacebar" => "space".to_string(),
        "return" => "enter".to_string(),
        other => other.to_string(),
    };
    normalize(filter) == normalize(key)
}

/// Evaluate a `soli-show` expression (`path` or `!path`) against state.
pub fn evaluate_condition(expr: &str, state: &JsonValue) -> bool {
    let expr = expr.trim();
    if let Some(inner) = expr.strip_prefix('!') {
        return !evaluate_condition(inner, state);
    }
    let mut current = state;
    for segment in expr.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    is_truthy(current)
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn resolver() -> BindingResolver {
        BindingResolver::new(Duration::from_millis(150))
    }

    #[test]
    fn test_model_modifiers() {
        let r = resolver();
        let live = r.parse_attr("soli-model", "title").unwrap();
        assert_eq!(
            live,
            Some(Binding::Model(ModelBinding {
                property: "title".into(),
                mode: ModelMode::Live,
                debounce: Some(Duration::from_millis(150)),
            }))
        );

        let lazy = r.parse_attr("soli-model.lazy", "title").unwrap().unwrap();
        assert_eq!(lazy.as_model().unwrap().mode, ModelMode::Lazy);
        assert_eq!(lazy.as_model().unwrap().debounce, None);

        let blur = r.parse_attr("soli-model.blur", "email").unwrap().unwrap();
        assert_eq!(blur.as_model().unwrap().mode, ModelMode::Blur);

        let plain = r.parse_attr("soli-model.debounce", "q").unwrap().unwrap();
        assert_eq!(plain.as_model().unwrap().debounce, Some(Duration::from_millis(150)));

        let timed = r.parse_attr("soli-model.debounce.500ms", "q").unwrap().unwrap();
        assert_eq!(timed.as_model().unwrap().mode, ModelMode::Debounce);
        assert_eq!(timed.as_model().unwrap().debounce, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_model_errors() {
        let r = resolver();
        assert!(matches!(
            r.parse_attr("soli-model.eager", "q"),
            Err(BindingParseError::UnknownModifier { .. })
        ));
        assert!(matches!(
            r.parse_attr("soli-model.debounce.fast", "q"),
            Err(BindingParseError::InvalidDebounce(_))
        ));
        assert!(matches!(
            r.parse_attr("soli-model", "  "),
            Err(BindingParseError::EmptyValue(_))
        ));
    }

    #[test]
    fn test_action_arguments() {
        let call = parse_action(r#"save(1, 2.5, true, 'it\'s', "x", {"a": [1, 2]}, raw)"#).unwrap();
        assert_eq!(call.method, "save");
        assert_eq!(
            call.args,
            vec![
                json!(1),
                json!(2.5),
                json!(true),
                json!("it's"),
                json!("x"),
                json!({"a": [1, 2]}),
                json!("raw"),
            ]
        );
        assert!(!call.collect_modal);

        let bare = parse_action("refresh").unwrap();
        assert_eq!(bare.method, "refresh");
        assert!(bare.args.is_empty());

        let empty = parse_action("reset()").unwrap();
        assert!(empty.args.is_empty());
    }

    #[test]
    fn test_action_modal_marker() {
        let call = parse_action("create('user', $modal)").unwrap();
        assert_eq!(call.args, vec![json!("user")]);
        assert!(call.collect_modal);
    }

    #[test]
    fn test_malformed_actions() {
        for expr in ["", "save(", "save(1,)", "save('x)", "sa ve()", "save(1))", "(1)"] {
            assert!(
                matches!(parse_action(expr), Err(BindingParseError::MalformedAction { .. })),
                "expected error for {:?}",
                expr
            );
        }
    }

    #[test]
    fn test_resolve_skips_bad_and_duplicate_bindings() {
        let doc = parse_document(
            r#"<input soli-model="a" soli-model.lazy="b" soli-click="bad(" soli-keydown.enter="go" soli-id="c1">"#,
        );
        let input = doc.find_by_attr(doc.root(), "soli-id", "c1")[0];
        let bindings = resolver().resolve(&doc, input);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].as_model().unwrap().property, "a");
        assert!(matches!(
            &bindings[1],
            Binding::EventListener { event, key: Some(key), .. } if event == "keydown" && key == "enter"
        ));
    }

    #[test]
    fn test_collect_modal_fields() {
        let doc = parse_document(
            r#"<div class="modal fade"><form>
                 <input name="email" value="a@b.c">
                 <input type="checkbox" name="admin" checked>
                 <input type="radio" name="role" value="x">
                 <input type="radio" name="role" value="y" checked>
                 <textarea name="bio">hi</textarea>
                 <button id="go">Go</button>
               </form></div>
               <input name="outside" value="no">"#,
        );
        let go = doc.find_by_attr(doc.root(), "id", "go")[0];
        let fields = collect_modal_fields(&doc, go);
        assert_eq!(
            JsonValue::Object(fields),
            json!({"email": "a@b.c", "admin": true, "role": "y", "bio": "hi"})
        );
    }

    #[test]
    fn test_listeners_and_keys() {
        let json_list = parse_listeners(r#"["saved", "refresh"]"#);
        assert!(json_list.contains("saved") && json_list.contains("refresh"));
        let csv = parse_listeners("saved, refresh ,");
        assert_eq!(csv.len(), 2);

        assert!(key_matches(Some("enter"), "Enter"));
        assert!(key_matches(Some("esc"), "Escape"));
        assert!(!key_matches(Some("enter"), "a"));
        assert!(key_matches(None, "a"));
    }

    #[test]
    fn test_evaluate_condition() {
        let state = json!({"open": true, "user": {"name": ""}, "count": 0});
        assert!(evaluate_condition("open", &state));
        assert!(!evaluate_condition("!open", &state));
        assert!(!evaluate_condition("user.name", &state));
        assert!(!evaluate_condition("count", &state));
        assert!(!evaluate_condition("missing", &state));
    }
}
