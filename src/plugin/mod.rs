//! The bridge itself
//!
//! [`Plugin`] wires the stores, the host collaborators and the HTTP client
//! together and exposes the user-facing workflows:
//!
//! - **instances**: install, uninstall, legacy marker, aliases
//! - **resolve**: pick the instance a request targets
//! - **user**: connect, disconnect, default instance, saved field defaults
//! - **issue**: search, transition, assign, create, attach comments
//! - **attachments**: background upload tasks and failure reporting

mod attachments;
mod instances;
mod issue;
mod resolve;
mod user;

pub use attachments::{notify_on_failed_attachment, AttachmentReport, AttachmentTask};
pub use issue::{
    AttachComment, AttachedComment, CreateIssue, CreateIssueResult, CreateMetadata,
    ProjectMetadata, TransitionIssue, DEFAULT_SEARCH_LIMIT, MIN_USER_SEARCH_QUERY_LENGTH,
};

use crate::client::Client;
use crate::config::PluginConfig;
use crate::host::{EnterpriseChecker, HostApi, Notifier};
use crate::instance::Instance;
use crate::store::{InstanceStore, UserStore};
use crate::types::Id;
use crate::user::Connection;
use crate::{JiraLinkError, Result};
use std::sync::Arc;

/// Multi-instance Jira bridge
///
/// Cheap to clone; background tasks hold their own clone.
#[derive(Clone)]
pub struct Plugin {
    config: Arc<PluginConfig>,
    instance_store: Arc<dyn InstanceStore>,
    user_store: Arc<dyn UserStore>,
    host: Arc<dyn HostApi>,
    notifier: Arc<dyn Notifier>,
    license: Arc<dyn EnterpriseChecker>,
    http: reqwest::Client,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    pub fn builder(config: PluginConfig) -> PluginBuilder {
        PluginBuilder::new(config)
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn instance_store(&self) -> &dyn InstanceStore {
        self.instance_store.as_ref()
    }

    pub fn user_store(&self) -> &dyn UserStore {
        self.user_store.as_ref()
    }

    pub fn host(&self) -> &dyn HostApi {
        self.host.as_ref()
    }

    /// Client for `user_id`'s connection to `instance_id`, with the records
    /// it was built from
    pub async fn get_client(
        &self,
        instance_id: &Id,
        user_id: &Id,
    ) -> Result<(Arc<dyn Client>, Instance, Connection)> {
        let instance = self.instance_store.load_instance(instance_id).await?;
        let connection = self
            .user_store
            .load_connection(instance.id(), user_id)
            .await?;
        let client = instance.get_client(&self.http, &connection)?;
        Ok((client, instance, connection))
    }

    /// Host user that bot replies are posted as
    fn bot_user_id(&self) -> Id {
        let id = self.host.bot_user_id();
        if id.is_empty() {
            Id::new(self.config.bot_user_id.clone())
        } else {
            id
        }
    }
}

/// Assembles a [`Plugin`] from its collaborators
pub struct PluginBuilder {
    config: PluginConfig,
    instance_store: Option<Arc<dyn InstanceStore>>,
    user_store: Option<Arc<dyn UserStore>>,
    host: Option<Arc<dyn HostApi>>,
    notifier: Option<Arc<dyn Notifier>>,
    license: Option<Arc<dyn EnterpriseChecker>>,
    http: Option<reqwest::Client>,
}

impl PluginBuilder {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            instance_store: None,
            user_store: None,
            host: None,
            notifier: None,
            license: None,
            http: None,
        }
    }

    /// Use one store for both instances and users
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: InstanceStore + UserStore + 'static,
    {
        self.instance_store = Some(store.clone());
        self.user_store = Some(store);
        self
    }

    pub fn instance_store(mut self, store: Arc<dyn InstanceStore>) -> Self {
        self.instance_store = Some(store);
        self
    }

    pub fn user_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.user_store = Some(store);
        self
    }

    pub fn host(mut self, host: Arc<dyn HostApi>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn license(mut self, license: Arc<dyn EnterpriseChecker>) -> Self {
        self.license = Some(license);
        self
    }

    /// Defaults to a client built from the `http` config section
    pub fn http(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<Plugin> {
        fn missing(what: &str) -> JiraLinkError {
            JiraLinkError::Config(format!("plugin built without {}", what))
        }

        let http = match self.http {
            Some(http) => http,
            None => self.config.http.build_client()?,
        };

        Ok(Plugin {
            instance_store: self.instance_store.ok_or_else(|| missing("an instance store"))?,
            user_store: self.user_store.ok_or_else(|| missing("a user store"))?,
            host: self.host.ok_or_else(|| missing("a host"))?,
            notifier: self.notifier.ok_or_else(|| missing("a notifier"))?,
            license: self.license.ok_or_else(|| missing("a license checker"))?,
            http,
            config: Arc::new(self.config),
        })
    }
}
