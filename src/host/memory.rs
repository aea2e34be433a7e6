//! In-process host implementations for tests and the CLI

use super::{EnterpriseChecker, FileInfo, HostApi, HostUser, Notifier, Post};
use crate::instance::InstanceConfig;
use crate::types::Id;
use crate::{JiraLinkError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Fixed license answer
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLicense(pub bool);

impl EnterpriseChecker for StaticLicense {
    fn has_enterprise_features(&self) -> bool {
        self.0
    }
}

#[derive(Default)]
struct HostData {
    posts: HashMap<String, Post>,
    users: HashMap<Id, HostUser>,
    files: HashMap<String, FileInfo>,
    blobs: HashMap<String, Vec<u8>>,
}

/// Host backed by in-memory maps
pub struct MemoryHost {
    site_url: String,
    bot_user_id: Id,
    data: RwLock<HostData>,
    registrations: Mutex<Vec<(bool, bool)>>,
}

impl MemoryHost {
    pub fn new(site_url: impl Into<String>, bot_user_id: impl Into<Id>) -> Self {
        Self {
            site_url: site_url.into().trim_end_matches('/').to_string(),
            bot_user_id: bot_user_id.into(),
            data: RwLock::new(HostData::default()),
            registrations: Mutex::new(Vec::new()),
        }
    }

    pub async fn add_post(&self, post: Post) {
        self.data.write().await.posts.insert(post.id.clone(), post);
    }

    pub async fn add_user(&self, user: HostUser) {
        self.data.write().await.users.insert(user.id.clone(), user);
    }

    /// Register a file and its contents under `info.path`
    pub async fn add_file(&self, info: FileInfo, contents: Vec<u8>) {
        let mut data = self.data.write().await;
        data.blobs.insert(info.path.clone(), contents);
        data.files.insert(info.id.clone(), info);
    }

    /// Every `(autocomplete, multi_instance)` registration, oldest first
    pub async fn registrations(&self) -> Vec<(bool, bool)> {
        self.registrations.lock().await.clone()
    }
}

#[async_trait]
impl HostApi for MemoryHost {
    fn site_url(&self) -> String {
        self.site_url.clone()
    }

    fn bot_user_id(&self) -> Id {
        self.bot_user_id.clone()
    }

    async fn get_post(&self, post_id: &str) -> Result<Post> {
        self.data
            .read()
            .await
            .posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| JiraLinkError::not_found(format!("post {}", post_id)))
    }

    async fn get_user(&self, user_id: &Id) -> Result<HostUser> {
        self.data
            .read()
            .await
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| JiraLinkError::not_found(format!("user {}", user_id)))
    }

    async fn get_file_info(&self, file_id: &str) -> Result<FileInfo> {
        self.data
            .read()
            .await
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| JiraLinkError::not_found(format!("file {}", file_id)))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.data
            .read()
            .await
            .blobs
            .get(path)
            .cloned()
            .ok_or_else(|| JiraLinkError::not_found(format!("file at {}", path)))
    }

    async fn register_command(&self, autocomplete: bool, multi_instance: bool) -> Result<()> {
        self.registrations
            .lock()
            .await
            .push((autocomplete, multi_instance));
        Ok(())
    }
}

/// One captured notification
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    InstancesChanged(Vec<InstanceConfig>),
    Ephemeral { user_id: Id, post: Post },
    Post(Post),
    DirectMessage { user_id: Id, message: String },
}

/// Notifier that keeps everything it is sent
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Recorded>>,
    next_post: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded(&self) -> Vec<Recorded> {
        self.events.lock().await.clone()
    }

    pub async fn ephemeral_messages(&self, user_id: &Id) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Recorded::Ephemeral { user_id: to, post } if to == user_id => {
                    Some(post.message.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub async fn posts(&self) -> Vec<Post> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Recorded::Post(post) => Some(post.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn direct_messages(&self, user_id: &Id) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Recorded::DirectMessage { user_id: to, message } if to == user_id => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn instances_changed(&self, instances: &[InstanceConfig]) -> Result<()> {
        self.events
            .lock()
            .await
            .push(Recorded::InstancesChanged(instances.to_vec()));
        Ok(())
    }

    async fn send_ephemeral_post(&self, user_id: &Id, post: Post) -> Result<()> {
        self.events.lock().await.push(Recorded::Ephemeral {
            user_id: user_id.clone(),
            post,
        });
        Ok(())
    }

    async fn create_post(&self, mut post: Post) -> Result<Post> {
        let n = self.next_post.fetch_add(1, Ordering::SeqCst) + 1;
        post.id = format!("post{}", n);
        self.events.lock().await.push(Recorded::Post(post.clone()));
        Ok(post)
    }

    async fn direct_message(&self, user_id: &Id, message: &str) -> Result<()> {
        self.events.lock().await.push(Recorded::DirectMessage {
            user_id: user_id.clone(),
            message: message.to_string(),
        });
        Ok(())
    }
}

/// Notifier that writes everything to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn instances_changed(&self, instances: &[InstanceConfig]) -> Result<()> {
        info!(count = instances.len(), "Instances changed");
        Ok(())
    }

    async fn send_ephemeral_post(&self, user_id: &Id, post: Post) -> Result<()> {
        info!(user = %user_id, channel = %post.channel_id, "{}", post.message);
        Ok(())
    }

    async fn create_post(&self, post: Post) -> Result<Post> {
        info!(channel = %post.channel_id, "{}", post.message);
        Ok(post)
    }

    async fn direct_message(&self, user_id: &Id, message: &str) -> Result<()> {
        info!(user = %user_id, "{}", message);
        Ok(())
    }
}
