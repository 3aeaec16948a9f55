//! Error types for the service navigation core

use std::fmt;

pub type Result<T> = std::result::Result<T, NavError>;

#[derive(Debug)]
pub enum NavError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request failed before a response was received
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Local storage could not be read or written
    Storage(String),

    /// Backend answered with a non-success status or could not be reached
    Backend(String),

    /// Referenced service does not exist
    ServiceNotFound(String),

    /// Referenced category does not exist
    CategoryNotFound(String),

    /// Operation would break a catalog invariant
    InvalidOperation(String),

    /// Component has been shut down
    Closed,
}

impl fmt::Display for NavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavError::Io(err) => write!(f, "IO error: {}", err),
            NavError::Http(err) => write!(f, "HTTP error: {}", err),
            NavError::Json(err) => write!(f, "JSON error: {}", err),
            NavError::Config(msg) => write!(f, "Configuration error: {}", msg),
            NavError::Storage(msg) => write!(f, "Storage error: {}", msg),
            NavError::Backend(msg) => write!(f, "Backend sync failed: {}", msg),
            NavError::ServiceNotFound(id) => write!(f, "Service not found: {}", id),
            NavError::CategoryNotFound(id) => write!(f, "Category not found: {}", id),
            NavError::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            NavError::Closed => write!(f, "Component has been shut down"),
        }
    }
}

impl std::error::Error for NavError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NavError::Io(err) => Some(err),
            NavError::Http(err) => Some(err),
            NavError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NavError {
    fn from(err: std::io::Error) -> Self {
        NavError::Io(err)
    }
}

impl From<reqwest::Error> for NavError {
    fn from(err: reqwest::Error) -> Self {
        NavError::Http(err)
    }
}

impl From<serde_json::Error> for NavError {
    fn from(err: serde_json::Error) -> Self {
        NavError::Json(err)
    }
}

/// Failure kinds of an import, kept apart so callers can render the right
/// feedback for each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    /// The file holding the document could not be read
    Read(String),

    /// The document is not well-formed JSON
    Parse(String),

    /// The document is well-formed but violates the export format
    Validation(Vec<String>),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Read(msg) => write!(f, "Failed to read file: {}", msg),
            ImportError::Parse(msg) => write!(f, "Failed to parse JSON: {}", msg),
            ImportError::Validation(errors) => {
                write!(f, "Invalid import data: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for ImportError {}

impl ImportError {
    /// All messages carried by the error, one per violation
    pub fn messages(&self) -> Vec<String> {
        match self {
            ImportError::Validation(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}
