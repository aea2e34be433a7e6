//! Jira REST data types
//!
//! Only the fields the bridge reads are typed; issue fields the bridge doesn't
//! know about (custom fields) are kept verbatim in [`IssueFields::unknowns`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

fn is_false(b: &bool) -> bool {
    !*b
}

/// A Jira user as returned by user and search endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "accountId", default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,

    /// Server username
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    #[serde(rename = "displayName", default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,

    #[serde(rename = "emailAddress", default, skip_serializing_if = "String::is_empty")]
    pub email_address: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub active: bool,
}

impl User {
    /// `Display Name (username, email)` with empty parts left out
    pub fn describe(&self) -> String {
        let mut extra = self.name.clone();
        if !self.email_address.is_empty() {
            if !extra.is_empty() {
                extra.push_str(", ");
            }
            extra.push_str(&self.email_address);
        }
        if extra.is_empty() {
            self.display_name.clone()
        } else {
            format!("{} ({})", self.display_name, extra)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGroup {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueType {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub subtask: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCategory {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "statusCategory", default, skip_serializing_if = "Option::is_none")]
    pub status_category: Option<StatusCategory>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "issueTypes", default, skip_serializing_if = "Vec::is_empty")]
    pub issue_types: Vec<IssueType>,
}

impl Project {
    /// Reference by key, as used when creating issues
    pub fn by_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }
}

/// Issue fields; unrecognized keys (custom fields) are preserved in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,

    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "null_as_empty")]
    pub description: String,

    #[serde(rename = "issuetype", default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<User>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<User>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub labels: Vec<String>,

    #[serde(flatten)]
    pub unknowns: IndexMap<String, serde_json::Value>,
}

fn null_as_empty<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn null_as_default<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(rename = "self", default, skip_serializing_if = "String::is_empty")]
    pub self_url: String,
    #[serde(default)]
    pub fields: IssueFields,
}

impl Issue {
    pub fn summary(&self) -> &str {
        &self.fields.summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub to: Status,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated: String,
}

impl Comment {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

/// Query options for issue and create-metadata requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetQueryOptions {
    pub fields: String,
    pub expand: String,
    pub project_keys: String,
}

impl GetQueryOptions {
    pub fn fields(fields: impl Into<String>) -> Self {
        Self {
            fields: fields.into(),
            ..Default::default()
        }
    }

    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if !self.fields.is_empty() {
            params.push(("fields", self.fields.clone()));
        }
        if !self.expand.is_empty() {
            params.push(("expand", self.expand.clone()));
        }
        if !self.project_keys.is_empty() {
            params.push(("projectKeys", self.project_keys.clone()));
        }
        params
    }
}

/// JQL search options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub start_at: usize,
    pub max_results: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct SearchResult {
    #[serde(default)]
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TransitionsResult {
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// Statuses available to one issue type of a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTypeWithStatuses {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subtask: bool,
    #[serde(default)]
    pub statuses: Vec<Status>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCompleteSuggestion {
    #[serde(default)]
    pub value: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCompleteResult {
    #[serde(default)]
    pub results: Vec<AutoCompleteSuggestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGroupCollection {
    #[serde(default)]
    pub items: Vec<UserGroup>,
}

/// Groups a comment can be restricted to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentVisibilityResult {
    #[serde(default)]
    pub groups: UserGroupCollection,
}

/// One issue type in create metadata, with its field schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaIssueType {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subtask: bool,
    #[serde(default)]
    pub fields: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaProject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "issuetypes", default)]
    pub issue_types: Vec<MetaIssueType>,
}

/// Fields required to create issues, per project and issue type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateMetaInfo {
    #[serde(default)]
    pub expand: String,
    #[serde(default)]
    pub projects: Vec<MetaProject>,
}
