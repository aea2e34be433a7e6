//! Installing and removing Jira instances

use super::Plugin;
use crate::instance::{
    update_instances, Instance, InstanceConfig, InstanceType, Instances, LICENSE_ERROR,
};
use crate::types::Id;
use crate::user::User;
use crate::{JiraLinkError, Result, ResultExt};
use tracing::{error, info, warn};

/// What an uninstall transaction decided
struct Removal {
    instance: Option<Instance>,
    connected_users: Vec<Id>,
    instances: Instances,
}

impl Plugin {
    /// Installed instances in installation order
    pub async fn list_instances(&self) -> Result<Vec<InstanceConfig>> {
        let instances = self.instance_store.load_instances().await?;
        Ok(instances.value.as_config_map())
    }

    /// Install or reinstall an instance.
    ///
    /// Without enterprise features only one instance may be installed;
    /// reinstalling that same instance is always allowed.
    pub async fn install_instance(&self, instance: Instance) -> Result<()> {
        let instance = &instance;
        let updated = update_instances(self.instance_store.as_ref(), move |mut instances| async move {
            if !self.license.has_enterprise_features()
                && !instances.is_empty()
                && !instances.contains(instance.id())
            {
                return Err(JiraLinkError::Licensing(LICENSE_ERROR.to_string()));
            }

            self.instance_store
                .store_instance(instance)
                .await
                .context("failed to store new instance")?;
            instances.set(instance.common().clone());
            Ok((instances.clone(), instances))
        })
        .await?;

        info!(instance = %instance.id(), kind = %instance.instance_type(), "Installed Jira instance");
        self.instances_changed(&updated, "install_instance").await;
        Ok(())
    }

    /// Remove an instance and disconnect everyone connected to it.
    ///
    /// `instance_type` must match the stored record. A registry entry whose
    /// record has gone missing is dropped and `None` is returned.
    pub async fn uninstall_instance(
        &self,
        instance_id: &Id,
        instance_type: InstanceType,
    ) -> Result<Option<Instance>> {
        let removal = update_instances(self.instance_store.as_ref(), move |mut instances| async move {
            if !instances.contains(instance_id) {
                return Err(JiraLinkError::not_found(format!(
                    "instance {:?}",
                    instance_id.as_str()
                )));
            }

            let instance = match self.instance_store.load_instance(instance_id).await {
                Ok(instance) => instance,
                Err(e) if e.is_not_found() => {
                    warn!(instance = %instance_id, "Instance record missing, removing it from the registry");
                    instances.delete(instance_id);
                    return Ok((
                        instances.clone(),
                        Removal {
                            instance: None,
                            connected_users: Vec::new(),
                            instances,
                        },
                    ));
                }
                Err(e) => return Err(e),
            };

            if instance.instance_type() != instance_type {
                return Err(JiraLinkError::InvalidInput(format!(
                    "{} did not match instance {} type {}",
                    instance_type,
                    instance_id,
                    instance.instance_type()
                )));
            }

            let mut connected_users = Vec::new();
            self.user_store
                .map_users(&mut |user: &User| {
                    if user.is_connected(instance_id) {
                        connected_users.push(user.host_user_id.clone());
                    }
                    Ok(())
                })
                .await?;

            instances.delete(instance_id);
            Ok((
                instances.clone(),
                Removal {
                    instance: Some(instance),
                    connected_users,
                    instances,
                },
            ))
        })
        .await?;

        // The record outlives the registry entry until here so a retried
        // transaction still sees it. The registry change is committed, so a
        // failed delete only leaves an orphaned record behind.
        if removal.instance.is_some() {
            if let Err(e) = self.instance_store.delete_instance(instance_id).await {
                warn!(instance = %instance_id, error = %e, "Failed to delete instance record");
            }
        }

        if let Some(instance) = &removal.instance {
            for user_id in &removal.connected_users {
                if let Err(e) = self.disconnect_user(instance, user_id).await {
                    warn!(instance = %instance_id, user = %user_id, error = %e, "Failed to disconnect user");
                }
            }
        }

        info!(
            instance = %instance_id,
            disconnected = removal.connected_users.len(),
            "Uninstalled Jira instance"
        );
        self.instances_changed(&removal.instances, "uninstall_instance")
            .await;
        Ok(removal.instance)
    }

    /// Mark the instance used when a request names none
    pub async fn store_v2_legacy_instance(&self, instance_id: &Id) -> Result<()> {
        update_instances(self.instance_store.as_ref(), move |mut instances| async move {
            instances.set_v2_legacy(instance_id)?;
            Ok((instances, ()))
        })
        .await
    }

    /// Set, or clear with an empty alias, an instance's alias
    pub async fn set_instance_alias(&self, instance_id: &Id, alias: &str) -> Result<()> {
        let updated = update_instances(self.instance_store.as_ref(), move |mut instances| async move {
            instances.set_alias(instance_id, alias)?;
            Ok((instances.clone(), instances))
        })
        .await?;

        if let Err(e) = self
            .notifier
            .instances_changed(&updated.as_config_map())
            .await
        {
            warn!(error = %e, "Failed to broadcast instance change");
        }
        Ok(())
    }

    /// Re-register the command surface and broadcast the new list
    async fn instances_changed(&self, instances: &Instances, operation: &str) {
        let multi_instance = instances.len() > 1;
        if let Err(e) = self
            .host
            .register_command(self.config.enable_autocomplete, multi_instance)
            .await
        {
            error!(
                operation,
                error = %e,
                "Failed to re-register `/jira` command; please re-activate the plugin"
            );
        }

        if let Err(e) = self
            .notifier
            .instances_changed(&instances.as_config_map())
            .await
        {
            warn!(operation, error = %e, "Failed to broadcast instance change");
        }
    }
}
