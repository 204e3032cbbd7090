//! Error types for the live runtime.

use thiserror::Error;

/// A binding attribute whose value cannot be understood. The binding is
/// dropped and the element stays otherwise functional.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingParseError {
    #[error("Malformed action expression '{expr}': {reason}")]
    MalformedAction { expr: String, reason: String },

    #[error("Unknown modifier '{modifier}' on '{attr}'")]
    UnknownModifier { attr: String, modifier: String },

    #[error("Invalid debounce duration '{0}'")]
    InvalidDebounce(String),

    #[error("Element already has a model binding; ignoring '{0}'")]
    DuplicateModel(String),

    #[error("Empty value for '{0}'")]
    EmptyValue(String),
}

impl BindingParseError {
    pub fn malformed(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedAction {
            expr: expr.into(),
            reason: reason.into(),
        }
    }
}

/// Runtime errors. None of them is fatal to the page: they are caught per
/// request (or per channel) and logged.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Unknown component '{0}'")]
    UnknownComponent(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Push channel error: {0}")]
    PushChannel(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LiveError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Errors that mean the request never produced usable markup.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Status { .. } | Self::MalformedResponse(_) | Self::Json(_)
        )
    }
}

impl From<reqwest::Error> for LiveError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None if e.is_decode() => Self::MalformedResponse(e.to_string()),
            None => Self::Transport(e.to_string()),
        }
    }
}

impl From<std::io::Error> for LiveError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type LiveResult<T> = Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_error_messages() {
        let err = BindingParseError::malformed("save(", "unbalanced parentheses");
        assert_eq!(
            err.to_string(),
            "Malformed action expression 'save(': unbalanced parentheses"
        );
    }

    #[test]
    fn test_request_failure_classification() {
        assert!(LiveError::transport("down").is_request_failure());
        assert!(LiveError::malformed("no html").is_request_failure());
        assert!(!LiveError::UnknownComponent("c1".into()).is_request_failure());
    }
}
