//! Picking the instance a request targets

use super::Plugin;
use crate::host::AutocompleteItem;
use crate::instance::{normalize_jira_url, Instance};
use crate::types::Id;
use crate::user::User;
use crate::{JiraLinkError, Result, ResultExt};

impl Plugin {
    /// Instance for an inbound webhook.
    ///
    /// An explicit URL wins; otherwise the legacy instance, otherwise the only
    /// instance installed.
    pub async fn resolve_webhook_instance_url(&self, hint: &str) -> Result<Id> {
        if !hint.trim().is_empty() {
            return Ok(Id::new(normalize_jira_url(hint)?));
        }

        let instances = self.instance_store.load_instances().await?.value;
        if instances.is_empty() {
            return Err(JiraLinkError::not_found("no instances installed"));
        }
        if let Some(legacy) = instances.get_v2_legacy() {
            return Ok(legacy.instance_id.clone());
        }
        match instances.ids().as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(JiraLinkError::not_found("specify a Jira instance")),
        }
    }

    /// The user and the instance their request targets
    pub async fn resolve_user_instance_url(&self, user_id: &Id, hint: &str) -> Result<(User, Id)> {
        let user = self.user_store.load_user_or_default(user_id).await?;
        let instance_id = self.resolve_instance_for_user(&user, hint).await?;
        Ok((user, instance_id))
    }

    /// Resolution order: alias, then the hint as a URL, then the user's
    /// default if still connected, then their only connection.
    pub(crate) async fn resolve_instance_for_user(&self, user: &User, hint: &str) -> Result<Id> {
        if user.connected_instances.is_empty() {
            return Err(JiraLinkError::not_found(
                "your account is not connected to Jira. Please use `/jira connect`",
            ));
        }

        let hint = hint.trim();
        if !hint.is_empty() {
            let instances = self
                .instance_store
                .load_instances()
                .await
                .context("failed to load instances")?
                .value;
            if let Some(instance) = instances.get_by_alias(hint) {
                return Ok(instance.instance_id.clone());
            }
            return Ok(Id::new(normalize_jira_url(hint)?));
        }

        if let Some(default) = user.valid_default() {
            return Ok(default.clone());
        }
        match user.connected_instances.ids().as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(JiraLinkError::Ambiguous(
                "default jira instance not found, please run `/jira instance default <jiraURL>` to set one"
                    .to_string(),
            )),
        }
    }

    /// Resolve and load the instance record
    pub async fn load_user_instance(&self, user_id: &Id, hint: &str) -> Result<(User, Instance)> {
        let (user, instance_id) = self.resolve_user_instance_url(user_id, hint).await?;
        let instance = self.instance_store.load_instance(&instance_id).await?;
        Ok((user, instance))
    }

    /// The user's instances for autocomplete: default first, then the rest
    /// by alias where one is set
    pub async fn user_instance_choices(&self, user_id: &Id) -> Result<Vec<AutocompleteItem>> {
        let user = self.user_store.load_user_or_default(user_id).await?;
        let instances = self
            .instance_store
            .load_instances()
            .await
            .context("failed to load instances")?
            .value;

        let default = user.valid_default();
        let mut out = Vec::new();
        if let Some(default) = default {
            out.push(AutocompleteItem {
                item: default.to_string(),
                help_text: String::new(),
            });
        }
        for id in user.connected_instances.ids() {
            if Some(&id) == default {
                continue;
            }
            let alias = instances.get_alias(&id);
            out.push(AutocompleteItem {
                item: if alias.is_empty() {
                    id.to_string()
                } else {
                    alias.to_string()
                },
                help_text: String::new(),
            });
        }
        Ok(out)
    }

    /// Every installed instance: alias with the URL as help text, or the URL
    pub async fn installed_instance_choices(&self) -> Result<Vec<AutocompleteItem>> {
        let instances = self
            .instance_store
            .load_instances()
            .await
            .context("failed to load instances")?
            .value;

        Ok(instances
            .iter()
            .map(|instance| {
                if instance.alias.is_empty() {
                    AutocompleteItem {
                        item: instance.instance_id.to_string(),
                        help_text: String::new(),
                    }
                } else {
                    AutocompleteItem {
                        item: instance.alias.clone(),
                        help_text: instance.instance_id.to_string(),
                    }
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fixture, Fixture};
    use super::*;
    use crate::store::UserStore;
    use crate::user::{Connection, Credentials};

    async fn installed(f: &Fixture, urls: &[&str]) -> Vec<Instance> {
        let mut out = Vec::new();
        for url in urls {
            let instance = Instance::server(url).unwrap();
            f.plugin.install_instance(instance.clone()).await.unwrap();
            out.push(instance);
        }
        out
    }

    async fn connect(f: &Fixture, instance: &Instance, user_id: &Id) {
        let connection = Connection::new(Credentials::Bearer { token: "t".into() });
        f.plugin
            .connect_user(instance.id(), user_id, connection)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_resolution() {
        let f = fixture(true);
        let err = f.plugin.resolve_webhook_instance_url("").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("no instances installed"));

        let list = installed(&f, &["https://a.example.com"]).await;
        assert_eq!(
            f.plugin.resolve_webhook_instance_url("").await.unwrap(),
            *list[0].id()
        );

        let list = installed(&f, &["https://b.example.com"]).await;
        let err = f.plugin.resolve_webhook_instance_url("").await.unwrap_err();
        assert!(err.to_string().contains("specify a Jira instance"));

        f.plugin.store_v2_legacy_instance(list[0].id()).await.unwrap();
        assert_eq!(
            f.plugin.resolve_webhook_instance_url("").await.unwrap(),
            *list[0].id()
        );

        assert_eq!(
            f.plugin
                .resolve_webhook_instance_url("c.example.com/")
                .await
                .unwrap(),
            Id::new("https://c.example.com")
        );
    }

    #[tokio::test]
    async fn test_user_not_connected() {
        let f = fixture(true);
        installed(&f, &["https://a.example.com"]).await;
        let err = f
            .plugin
            .resolve_user_instance_url(&Id::new("u1"), "")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Please use `/jira connect`"));
    }

    #[tokio::test]
    async fn test_user_resolution_order() {
        let f = fixture(true);
        let list = installed(&f, &["https://a.example.com", "https://b.example.com"]).await;
        let user_id = Id::new("u1");
        connect(&f, &list[0], &user_id).await;
        connect(&f, &list[1], &user_id).await;
        f.plugin.set_instance_alias(list[1].id(), "beta").await.unwrap();

        // Default from first connection
        let (_, id) = f.plugin.resolve_user_instance_url(&user_id, "").await.unwrap();
        assert_eq!(&id, list[0].id());

        // Alias beats default
        let (_, id) = f
            .plugin
            .resolve_user_instance_url(&user_id, "beta")
            .await
            .unwrap();
        assert_eq!(&id, list[1].id());

        // Literal URL
        let (_, id) = f
            .plugin
            .resolve_user_instance_url(&user_id, "https://b.example.com/")
            .await
            .unwrap();
        assert_eq!(&id, list[1].id());
    }

    #[tokio::test]
    async fn test_stale_default_not_honored() {
        let f = fixture(true);
        let list = installed(&f, &["https://a.example.com", "https://b.example.com"]).await;
        let user_id = Id::new("u1");
        connect(&f, &list[0], &user_id).await;
        connect(&f, &list[1], &user_id).await;

        // Default points at an instance the user is no longer connected to
        let mut user = f.store.load_user(&user_id).await.unwrap();
        user.default_instance_id = Some(Id::new("https://gone.example.com"));
        f.store.store_user(&user).await.unwrap();

        let err = f
            .plugin
            .resolve_user_instance_url(&user_id, "")
            .await
            .unwrap_err();
        assert!(matches!(err, JiraLinkError::Ambiguous(_)));

        // With a single connection the stale default is skipped
        f.plugin.disconnect_user(&list[1], &user_id).await.unwrap();
        let (_, id) = f.plugin.resolve_user_instance_url(&user_id, "").await.unwrap();
        assert_eq!(&id, list[0].id());
    }

    #[tokio::test]
    async fn test_autocomplete_choices() {
        let f = fixture(true);
        let list = installed(
            &f,
            &["https://a.example.com", "https://b.example.com", "https://c.example.com"],
        )
        .await;
        f.plugin.set_instance_alias(list[2].id(), "gamma").await.unwrap();

        let user_id = Id::new("u1");
        connect(&f, &list[2], &user_id).await;
        connect(&f, &list[0], &user_id).await;
        f.plugin
            .set_default_instance(&user_id, "https://a.example.com")
            .await
            .unwrap();

        let items: Vec<String> = f
            .plugin
            .user_instance_choices(&user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.item)
            .collect();
        assert_eq!(items, vec!["https://a.example.com", "gamma"]);

        let installed = f.plugin.installed_instance_choices().await.unwrap();
        assert_eq!(installed.len(), 3);
        assert_eq!(installed[0].item, "https://a.example.com");
        assert_eq!(installed[0].help_text, "");
        assert_eq!(installed[2].item, "gamma");
        assert_eq!(installed[2].help_text, "https://c.example.com");
    }
}
