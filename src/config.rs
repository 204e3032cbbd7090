//! Runtime configuration, read once at boot.

use serde::Deserialize;
use std::time::Duration;

/// Default endpoint prefix for component requests.
pub const DEFAULT_BASE_PATH: &str = "/live/component";

/// Default prefix of the admin area hosting the push stream.
pub const DEFAULT_ADMIN_BASE_PATH: &str = "/admin";

/// Default debounce applied to `live` model bindings, in milliseconds.
pub const DEFAULT_MODEL_DEBOUNCE_MS: u64 = 150;

/// Base delay between push-channel reconnect attempts, in milliseconds.
pub const DEFAULT_PUSH_RECONNECT_DELAY_MS: u64 = 3000;

/// Reconnect attempts before the push channel gives up.
pub const DEFAULT_PUSH_MAX_RECONNECTS: u32 = 5;

/// Maximum forwarding depth for recursive event broadcasts.
pub const DEFAULT_MAX_BROADCAST_DEPTH: usize = 8;

/// Request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Prefix of the environment variables read by [`LiveConfig::from_env`].
pub const ENV_PREFIX: &str = "SOLI_LIVE_";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveConfig {
    /// Origin the runtime talks to, e.g. `http://localhost:3000`.
    pub endpoint: String,
    pub base_path: String,
    /// Debounce for `live` model bindings, in milliseconds.
    pub model_debounce: u64,
    pub debug: bool,
    pub disable_snapshot: bool,
    #[serde(rename = "disableSSE", alias = "disableSse")]
    pub disable_sse: bool,
    pub admin_base_path: String,
    pub max_broadcast_depth: usize,
    /// Push-channel reconnect base delay, in milliseconds.
    pub push_reconnect_delay: u64,
    pub push_max_reconnects: u32,
    /// Request timeout, in seconds.
    pub request_timeout: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000".to_string(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            model_debounce: DEFAULT_MODEL_DEBOUNCE_MS,
            debug: false,
            disable_snapshot: false,
            disable_sse: false,
            admin_base_path: DEFAULT_ADMIN_BASE_PATH.to_string(),
            max_broadcast_depth: DEFAULT_MAX_BROADCAST_DEPTH,
            push_reconnect_delay: DEFAULT_PUSH_RECONNECT_DELAY_MS,
            push_max_reconnects: DEFAULT_PUSH_MAX_RECONNECTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl LiveConfig {
    /// Parse a JSON config object; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Defaults overlaid with `SOLI_LIVE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by the full
    /// environment variable name. Unparseable values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("ENDPOINT") {
            config.endpoint = v;
        }
        if let Some(v) = get("BASE_PATH") {
            config.base_path = v;
        }
        if let Some(v) = get("MODEL_DEBOUNCE").and_then(|v| v.parse().ok()) {
            config.model_debounce = v;
        }
        if let Some(v) = get("DEBUG") {
            config.debug = parse_flag(&v);
        }
        if let Some(v) = get("DISABLE_SNAPSHOT") {
            config.disable_snapshot = parse_flag(&v);
        }
        if let Some(v) = get("DISABLE_SSE") {
            config.disable_sse = parse_flag(&v);
        }
        if let Some(v) = get("ADMIN_BASE_PATH") {
            config.admin_base_path = v;
        }
        if let Some(v) = get("MAX_BROADCAST_DEPTH").and_then(|v| v.parse().ok()) {
            config.max_broadcast_depth = v;
        }
        if let Some(v) = get("PUSH_RECONNECT_DELAY").and_then(|v| v.parse().ok()) {
            config.push_reconnect_delay = v;
        }
        if let Some(v) = get("PUSH_MAX_RECONNECTS").and_then(|v| v.parse().ok()) {
            config.push_max_reconnects = v;
        }
        if let Some(v) = get("REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
            config.request_timeout = v;
        }
        config
    }

    pub fn model_debounce(&self) -> Duration {
        Duration::from_millis(self.model_debounce)
    }

    pub fn push_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.push_reconnect_delay)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// `POST` target for a component.
    pub fn component_url(&self, component_id: &str) -> String {
        format!(
            "{}{}/{}",
            self.endpoint.trim_end_matches('/'),
            normalize_path(&self.base_path),
            urlencoding::encode(component_id)
        )
    }

    /// Push stream location.
    pub fn push_url(&self) -> String {
        format!(
            "{}{}/events/stream",
            self.endpoint.trim_end_matches('/'),
            normalize_path(&self.admin_base_path)
        )
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_json_camel_case_with_defaults() {
        let config = LiveConfig::from_json(
            r#"{"basePath": "/wire/", "modelDebounce": 300, "disableSSE": true, "debug": true}"#,
        )
        .unwrap();
        assert_eq!(config.base_path, "/wire/");
        assert_eq!(config.model_debounce, 300);
        assert!(config.disable_sse);
        assert!(config.debug);
        assert!(!config.disable_snapshot);
        assert_eq!(config.admin_base_path, DEFAULT_ADMIN_BASE_PATH);
        assert_eq!(config.push_max_reconnects, 5);
    }

    #[test]
    fn test_urls() {
        let config = LiveConfig {
            endpoint: "http://example.test/".to_string(),
            base_path: "/wire/".to_string(),
            ..LiveConfig::default()
        };
        assert_eq!(
            config.component_url("counter 1"),
            "http://example.test/wire/counter%201"
        );
        assert_eq!(config.push_url(), "http://example.test/admin/events/stream");
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<String, String> = [
            ("SOLI_LIVE_DEBUG", "yes"),
            ("SOLI_LIVE_MODEL_DEBOUNCE", "75"),
            ("SOLI_LIVE_PUSH_MAX_RECONNECTS", "not-a-number"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = LiveConfig::from_lookup(|k| vars.get(k).cloned());
        assert!(config.debug);
        assert_eq!(config.model_debounce, 75);
        assert_eq!(config.push_max_reconnects, DEFAULT_PUSH_MAX_RECONNECTS);
    }
}
