//! Wire format for component requests and push messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// System event that updates the browser URL instead of reaching components.
pub const UPDATE_URL_EVENT: &str = "update-url";

/// An event emitted by a component or pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub name: String,
    #[serde(default = "empty_payload")]
    pub payload: JsonValue,
}

fn empty_payload() -> JsonValue {
    JsonValue::Object(Map::new())
}

impl LiveEvent {
    pub fn new(name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Target of an `update-url` event.
    pub fn url(&self) -> Option<&str> {
        if self.name != UPDATE_URL_EVENT {
            return None;
        }
        self.payload.get("url").and_then(|u| u.as_str())
    }
}

/// What a request asks the server to do. At most one kind per request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    /// Re-render with the current state.
    Refresh,
    Action {
        method: String,
        args: Vec<JsonValue>,
    },
    Models(Map<String, JsonValue>),
    Event(LiveEvent),
}

impl RequestPayload {
    pub fn action(method: impl Into<String>, args: Vec<JsonValue>) -> Self {
        Self::Action {
            method: method.into(),
            args,
        }
    }

    pub fn model(property: impl Into<String>, value: JsonValue) -> Self {
        let mut models = Map::new();
        models.insert(property.into(), value);
        Self::Models(models)
    }
}

/// `POST <basePath>/<componentId>` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub name: String,
    pub state: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub params: Option<Vec<JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub models: Option<Map<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event: Option<LiveEvent>,
}

impl WireRequest {
    pub fn new(name: &str, state: JsonValue, payload: RequestPayload) -> Self {
        let mut request = Self {
            name: name.to_string(),
            state,
            action: None,
            params: None,
            models: None,
            event: None,
        };
        match payload {
            RequestPayload::Refresh => {}
            RequestPayload::Action { method, args } => {
                request.action = Some(method);
                request.params = Some(args);
            }
            RequestPayload::Models(models) => request.models = Some(models),
            RequestPayload::Event(event) => request.event = Some(event),
        }
        request
    }
}

/// Server reply: a replacement fragment for the component root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub html: String,
    #[serde(default)]
    pub events: Vec<LiveEvent>,
}

impl WireResponse {
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: LiveEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Push stream message: `{name, payload, timestamp?}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushMessage {
    pub name: String,
    #[serde(default = "empty_payload")]
    pub payload: JsonValue,
    #[serde(default)]
    pub timestamp: Option<JsonValue>,
}

impl From<PushMessage> for LiveEvent {
    fn from(message: PushMessage) -> Self {
        LiveEvent::new(message.name, message.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_serializes_only_populated_kind() {
        let request = WireRequest::new(
            "counter",
            json!({"count": 1}),
            RequestPayload::action("increment", vec![json!(2)]),
        );
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"name": "counter", "state": {"count": 1}, "action": "increment", "params": [2]})
        );

        let refresh = WireRequest::new("counter", JsonValue::Null, RequestPayload::Refresh);
        assert_eq!(
            serde_json::to_value(&refresh).unwrap(),
            json!({"name": "counter", "state": null})
        );

        let event = WireRequest::new(
            "list",
            json!({}),
            RequestPayload::Event(LiveEvent::new("saved", json!({"id": 3}))),
        );
        assert_eq!(
            serde_json::to_value(&event).unwrap()["event"],
            json!({"name": "saved", "payload": {"id": 3}})
        );
    }

    #[test]
    fn test_response_defaults_events() {
        let response: WireResponse = serde_json::from_str(r#"{"html": "<div></div>"}"#).unwrap();
        assert!(response.events.is_empty());
        assert!(serde_json::from_str::<WireResponse>(r#"{"events": []}"#).is_err());
    }

    #[test]
    fn test_update_url_event() {
        let event = LiveEvent::new(UPDATE_URL_EVENT, json!({"url": "/posts?page=2"}));
        assert_eq!(event.url(), Some("/posts?page=2"));
        assert_eq!(LiveEvent::new("other", json!({"url": "/x"})).url(), None);
    }

    #[test]
    fn test_push_message_without_payload() {
        let message: PushMessage =
            serde_json::from_str(r#"{"name": "ping", "timestamp": 1700000000}"#).unwrap();
        let event: LiveEvent = message.into();
        assert_eq!(event, LiveEvent::new("ping", json!({})));
    }
}
