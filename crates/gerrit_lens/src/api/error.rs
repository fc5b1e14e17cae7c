//! Error types for Gerrit API operations.

use thiserror::Error;

use crate::http::HttpError;

/// Errors that can occur when talking to a Gerrit server.
///
/// Errors are `Clone` so a single failed request can be handed to every
/// caller that was coalesced onto it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GerritError {
    /// Connection, DNS or timeout failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with a non-2xx status.
    #[error("HTTP error ({status}): {body}")]
    Http { status: u16, body: String },

    /// Response body was not the expected JSON.
    #[error("JSON parse error: {0}")]
    Parse(String),

    /// A mutating request was attempted while read-only mode is on.
    #[error("Read-only mode is enabled, refusing {method} {path}")]
    ReadOnly { method: &'static str, path: String },

    /// Invalid or incomplete client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GerritError {
    /// HTTP status of the failure, if the server answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            GerritError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

impl From<HttpError> for GerritError {
    fn from(err: HttpError) -> Self {
        GerritError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for GerritError {
    fn from(err: serde_json::Error) -> Self {
        GerritError::Parse(err.to_string())
    }
}

/// Get a short error message suitable for display.
pub fn short_error_message(err: &GerritError) -> String {
    match err {
        GerritError::Network(_) => "Network error".to_string(),
        GerritError::Http { status, body } => {
            let first = body.lines().next().unwrap_or_default();
            if first.chars().count() > 50 {
                let truncated: String = first.chars().take(47).collect();
                format!("HTTP {}: {}...", status, truncated)
            } else if first.is_empty() {
                format!("HTTP {}", status)
            } else {
                format!("HTTP {}: {}", status, first)
            }
        }
        GerritError::Parse(_) => "JSON parse error".to_string(),
        GerritError::ReadOnly { .. } => "Read-only mode".to_string(),
        GerritError::Config(msg) => format!("Config: {}", msg),
    }
}

/// Result type for Gerrit API operations.
pub type Result<T> = std::result::Result<T, GerritError>;
