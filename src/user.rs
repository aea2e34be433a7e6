//! Host users and their per-instance Jira connections

use crate::types::{Id, IdSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How requests to Jira are authenticated for one connection
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    /// OAuth access token or personal access token
    Bearer { token: String },
    /// Username and password or API token
    Basic { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Bearer { .. } => f.write_str("Bearer(***)"),
            Credentials::Basic { username, .. } => write!(f, "Basic({}:***)", username),
        }
    }
}

/// Last project and issue type the user created an issue with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedFieldValues {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issue_type: String,
}

/// One user's link to one Jira instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub display_name: String,

    /// Cloud account identifier
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,

    /// Server username
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Server user key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email_address: String,

    pub credentials: Credentials,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_field_values: Option<SavedFieldValues>,
}

impl Connection {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            display_name: String::new(),
            account_id: String::new(),
            name: String::new(),
            key: String::new(),
            email_address: String::new(),
            credentials,
            saved_field_values: None,
        }
    }

    /// Name shown to other users; falls back to the server username
    pub fn display(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// A host platform user and the instances they are connected to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub host_user_id: Id,

    #[serde(default)]
    pub connected_instances: IdSet,

    /// Only honored while still connected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_instance_id: Option<Id>,
}

impl User {
    pub fn new(host_user_id: impl Into<Id>) -> Self {
        Self {
            host_user_id: host_user_id.into(),
            ..Default::default()
        }
    }

    pub fn is_connected(&self, instance_id: &Id) -> bool {
        self.connected_instances.contains(instance_id)
    }

    /// Default instance if set and still connected
    pub fn valid_default(&self) -> Option<&Id> {
        self.default_instance_id
            .as_ref()
            .filter(|id| self.is_connected(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_default_not_honored() {
        let mut user = User::new("u1");
        user.connected_instances.set(Id::new("https://a"));
        user.default_instance_id = Some(Id::new("https://b"));
        assert!(user.valid_default().is_none());

        user.default_instance_id = Some(Id::new("https://a"));
        assert_eq!(user.valid_default(), Some(&Id::new("https://a")));
    }

    #[test]
    fn test_credentials_hidden_from_debug() {
        let creds = Credentials::Basic {
            username: "jdoe".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{:?}", Connection::new(creds));
        assert!(rendered.contains("jdoe"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_connection_serde() {
        let json = r#"{"display_name":"Jo","credentials":{"kind":"bearer","token":"t"}}"#;
        let conn: Connection = serde_json::from_str(json).unwrap();
        assert_eq!(conn.display(), "Jo");
        assert_eq!(
            conn.credentials,
            Credentials::Bearer { token: "t".into() }
        );
        assert!(conn.saved_field_values.is_none());
    }
}
