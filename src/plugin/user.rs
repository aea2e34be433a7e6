//! Connecting users to instances

use super::Plugin;
use crate::instance::Instance;
use crate::types::Id;
use crate::user::{Connection, SavedFieldValues, User};
use crate::{JiraLinkError, Result, ResultExt};
use tracing::{debug, info, warn};

impl Plugin {
    /// Store a connection and add the instance to the user's set.
    ///
    /// The first connected instance becomes the user's default.
    pub async fn connect_user(
        &self,
        instance_id: &Id,
        user_id: &Id,
        connection: Connection,
    ) -> Result<User> {
        let instance = self
            .instance_store
            .load_instance(instance_id)
            .await
            .with_context(|| format!("failed to load instance {}", instance_id))?;

        self.user_store
            .store_connection(instance.id(), user_id, &connection)
            .await?;

        let mut user = self.user_store.load_user_or_default(user_id).await?;
        user.connected_instances.set(instance.id().clone());
        if user.valid_default().is_none() {
            user.default_instance_id = Some(instance.id().clone());
        }
        self.user_store.store_user(&user).await?;

        info!(instance = %instance.id(), user = %user_id, jira_user = %connection.display(), "Connected user");
        Ok(user)
    }

    /// Disconnect from the instance named by `hint` (alias, URL, or empty for
    /// the default)
    pub async fn disconnect(&self, user_id: &Id, hint: &str) -> Result<Connection> {
        let (_, instance) = self.load_user_instance(user_id, hint).await?;
        self.disconnect_user(&instance, user_id).await
    }

    /// Remove one user's connection to `instance`
    pub async fn disconnect_user(&self, instance: &Instance, user_id: &Id) -> Result<Connection> {
        let mut user = self.user_store.load_user(user_id).await?;
        if !user.is_connected(instance.id()) {
            return Err(JiraLinkError::not_found(format!(
                "connection to {} for user {}",
                instance.id(),
                user_id
            )));
        }

        let connection = self
            .user_store
            .load_connection(instance.id(), user_id)
            .await?;
        self.user_store
            .delete_connection(instance.id(), user_id)
            .await?;

        user.connected_instances.delete(instance.id());
        if user.default_instance_id.as_ref() == Some(instance.id()) {
            user.default_instance_id = None;
        }
        if user.connected_instances.is_empty() {
            self.user_store.delete_user(user_id).await?;
        } else {
            self.user_store.store_user(&user).await?;
        }

        info!(instance = %instance.id(), user = %user_id, "Disconnected user");
        Ok(connection)
    }

    /// Make a connected instance the user's default
    pub async fn set_default_instance(&self, user_id: &Id, hint: &str) -> Result<Id> {
        let (mut user, instance_id) = self.resolve_user_instance_url(user_id, hint).await?;
        if !user.is_connected(&instance_id) {
            return Err(JiraLinkError::InvalidInput(format!(
                "you are not connected to {}",
                instance_id
            )));
        }

        user.default_instance_id = Some(instance_id.clone());
        self.user_store.store_user(&user).await?;
        Ok(instance_id)
    }

    /// Remember the instance (and optionally the project and issue type) a
    /// user last worked with. Failures are logged, never returned.
    pub async fn update_user_defaults(
        &self,
        user_id: &Id,
        instance_id: &Id,
        saved: Option<SavedFieldValues>,
    ) {
        if let Err(e) = self.try_update_user_defaults(user_id, instance_id, saved).await {
            warn!(user = %user_id, instance = %instance_id, error = %e, "Failed to update user defaults");
        }
    }

    async fn try_update_user_defaults(
        &self,
        user_id: &Id,
        instance_id: &Id,
        saved: Option<SavedFieldValues>,
    ) -> Result<()> {
        let mut user = self.user_store.load_user(user_id).await?;
        if !instance_id.is_empty() && user.default_instance_id.as_ref() != Some(instance_id) {
            user.default_instance_id = Some(instance_id.clone());
            self.user_store.store_user(&user).await?;
        }

        if let Some(saved) = saved {
            let mut connection = self
                .user_store
                .load_connection(instance_id, user_id)
                .await?;
            connection.saved_field_values = Some(saved);
            self.user_store
                .store_connection(instance_id, user_id, &connection)
                .await?;
        }
        debug!(user = %user_id, instance = %instance_id, "Updated user defaults");
        Ok(())
    }
}
