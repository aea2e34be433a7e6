//! Error types for jiralink
//!
//! Defines one error enum covering every failure mode of the bridge. Upstream
//! failures are normalized into [`RestError`] so callers can branch on the
//! HTTP-like status code without knowing Jira wire details.
//! Uses thiserror for ergonomic error handling.

use crate::client::{RestError, StatusCoder};
use thiserror::Error;

/// Result type alias for jiralink operations
pub type Result<T> = std::result::Result<T, JiraLinkError>;

/// Comprehensive error type for jiralink operations
#[derive(Error, Debug)]
pub enum JiraLinkError {
    /// Registry or store lookup miss
    #[error("{0}: not found")]
    NotFound(String),

    /// Optimistic-concurrency write rejected by the store
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// Multiple instances attempted without the required license
    #[error("{0}")]
    Licensing(String),

    /// Zero or several candidates where exactly one was required
    #[error("{0}")]
    Ambiguous(String),

    /// Caller supplied something unusable
    #[error("{0}")]
    InvalidInput(String),

    /// The request can't be fulfilled through the API; a manual path was offered
    #[error("{0}")]
    Unsupported(String),

    /// Normalized upstream failure carrying a status code
    #[error(transparent)]
    Rest(#[from] RestError),

    /// Network or decode failure with no usable upstream status
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// An error wrapped with operation context
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<JiraLinkError>,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl JiraLinkError {
    /// Shorthand for a [`JiraLinkError::NotFound`]
    pub fn not_found(what: impl Into<String>) -> Self {
        JiraLinkError::NotFound(what.into())
    }

    /// Whether this error (or the error it wraps) is a lookup miss
    pub fn is_not_found(&self) -> bool {
        match self {
            JiraLinkError::NotFound(_) => true,
            JiraLinkError::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Returns the status-code capability if this error carries one.
    pub fn status_coder(&self) -> Option<&dyn StatusCoder> {
        match self {
            JiraLinkError::Rest(e) => Some(e),
            JiraLinkError::Context { source, .. } => source.status_coder(),
            _ => None,
        }
    }

    /// Wrap this error with a description of the operation that failed
    pub fn context(self, context: impl Into<String>) -> Self {
        JiraLinkError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Adds operation context to fallible results
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

impl crate::retry::RetryableError for JiraLinkError {
    fn is_conflict(&self) -> bool {
        match self {
            JiraLinkError::Conflict(_) => true,
            JiraLinkError::Context { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}
