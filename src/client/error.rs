//! Normalized upstream errors
//!
//! Jira reports failures in two shapes: a structured body
//! (`{"errorMessages": [...], "errors": {"field": "msg"}}`) or plain text.
//! Both become a [`RestError`] carrying the HTTP status.

use crate::JiraLinkError;
use indexmap::IndexMap;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;

/// Access to the HTTP-like status code of an error
pub trait StatusCoder {
    fn status_code(&self) -> u16;
}

/// An upstream failure with its status code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestError {
    pub status: u16,
    pub message: String,
}

impl RestError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for RestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RestError {}

impl StatusCoder for RestError {
    fn status_code(&self) -> u16 {
        self.status
    }
}

/// Structured Jira error body
#[derive(Debug, Default, Deserialize)]
pub struct JiraErrorBody {
    #[serde(rename = "errorMessages", default)]
    pub error_messages: Vec<String>,
    #[serde(default)]
    pub errors: IndexMap<String, String>,
}

impl JiraErrorBody {
    pub fn is_empty(&self) -> bool {
        self.error_messages.is_empty() && self.errors.is_empty()
    }

    /// One line per field error, then one per message
    pub fn to_message(&self) -> String {
        let mut message = String::new();
        for (field, msg) in &self.errors {
            message.push_str(&format!(" - {}: {}\n", field, msg));
        }
        for msg in &self.error_messages {
            message.push_str(&format!(" - {}\n", msg));
        }
        message
    }
}

/// Status for an optional error: 200 when absent, the carried status when
/// the error has one (looking through context), 500 otherwise.
pub fn status_code(err: Option<&JiraLinkError>) -> u16 {
    match err {
        None => StatusCode::OK.as_u16(),
        Some(e) => e
            .status_coder()
            .map(|c| c.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR.as_u16()),
    }
}

/// [`status_code`] for a result
pub fn status_code_of<T>(result: &crate::Result<T>) -> u16 {
    status_code(result.as_ref().err())
}

/// Turn an unsuccessful response body into a [`RestError`].
///
/// A structured body with content is flattened into one message; anything
/// else falls back to the raw text, or the status reason when empty.
pub fn user_friendly_jira_error(status: u16, body: &str) -> RestError {
    if let Ok(parsed) = serde_json::from_str::<JiraErrorBody>(body) {
        if !parsed.is_empty() {
            return RestError::new(status, parsed.to_message());
        }
    }

    let text = body.trim();
    if !text.is_empty() {
        return RestError::new(status, text);
    }

    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("unknown status");
    RestError::new(
        status,
        format!("request failed with status {} {}", status, reason),
    )
}

/// Error body normalization for attachment uploads: the structured shape
/// when it decodes, otherwise the raw text prefixed with ` - `.
pub fn attachment_upload_error(status: u16, body: &str) -> RestError {
    match serde_json::from_str::<JiraErrorBody>(body) {
        Ok(parsed) => RestError::new(status, parsed.to_message()),
        Err(_) => RestError::new(status, format!(" - {}", body)),
    }
}
