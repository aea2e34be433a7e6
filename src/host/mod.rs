//! The messaging platform the bridge runs inside
//!
//! The bridge never talks to the host directly; it goes through these traits
//! so the same workflows run inside a plugin, a CLI or a test.

mod memory;

pub use memory::{LogNotifier, MemoryHost, Recorded, RecordingNotifier, StaticLicense};

use crate::instance::InstanceConfig;
use crate::types::Id;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message in a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: String,
    pub user_id: Id,
    pub channel_id: String,
    /// Thread root; empty for top-level posts
    #[serde(default)]
    pub root_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub file_ids: Vec<String>,
}

impl Post {
    pub fn new(user_id: Id, channel_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id,
            channel_id: channel_id.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn in_thread(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = root_id.into();
        self
    }

    /// Root a reply to this post should use
    pub fn thread_root(&self) -> &str {
        if self.root_id.is_empty() {
            &self.id
        } else {
            &self.root_id
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUser {
    pub id: Id,
    pub username: String,
}

/// Metadata of an uploaded file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub path: String,
}

/// One autocomplete suggestion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocompleteItem {
    pub item: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help_text: String,
}

/// Host reads and command registration
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Public base URL of the host, without trailing slash
    fn site_url(&self) -> String;

    /// User ID that bot replies are posted as
    fn bot_user_id(&self) -> Id;

    async fn get_post(&self, post_id: &str) -> Result<Post>;

    async fn get_user(&self, user_id: &Id) -> Result<HostUser>;

    async fn get_file_info(&self, file_id: &str) -> Result<FileInfo>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// (Re)register the slash command surface
    async fn register_command(&self, autocomplete: bool, multi_instance: bool) -> Result<()>;
}

/// Outbound messages and broadcasts
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Broadcast the installed instance list to all clients
    async fn instances_changed(&self, instances: &[InstanceConfig]) -> Result<()>;

    /// Post visible only to `user_id`
    async fn send_ephemeral_post(&self, user_id: &Id, post: Post) -> Result<()>;

    async fn create_post(&self, post: Post) -> Result<Post>;

    /// Direct message from the bot to `user_id`
    async fn direct_message(&self, user_id: &Id, message: &str) -> Result<()>;
}

/// Whether the host is licensed for multiple instances
pub trait EnterpriseChecker: Send + Sync {
    fn has_enterprise_features(&self) -> bool;
}
