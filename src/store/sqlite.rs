//! SQLite store implementation

use super::{InstanceStore, Revision, Stamped, UserStore, UserVisitor};
use crate::instance::{Instance, Instances};
use crate::types::Id;
use crate::user::{Connection, User};
use crate::{JiraLinkError, Result};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    pub wal_mode: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("jiralink");
        path.push("jiralink.db");

        Self {
            path,
            wal_mode: true,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// SQLite-backed store; records are JSON payloads keyed by ID
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
    config: StoreConfig,
}

impl SqliteStore {
    /// Open or create a store database
    pub fn open(config: StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %config.path.display(), "Opening store database");

        let conn = rusqlite::Connection::open(&config.path)?;
        if config.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        let store = Self {
            conn: Mutex::new(conn),
            config,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS registry (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                revision INTEGER NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS instances (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS connections (
                instance_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (instance_id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_connections_user ON connections(user_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| JiraLinkError::Storage("store connection lock poisoned".to_string()))
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn load_payload<T: DeserializeOwned>(&self, sql: &str, key: &[&str], what: String) -> Result<T> {
        let payload: Option<String> = self
            .conn()?
            .query_row(sql, rusqlite::params_from_iter(key.iter()), |row| row.get(0))
            .optional()?;
        match payload {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Err(JiraLinkError::not_found(what)),
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl InstanceStore for SqliteStore {
    async fn load_instances(&self) -> Result<Stamped<Instances>> {
        let row: Option<(i64, String)> = self
            .conn()?
            .query_row(
                "SELECT revision, payload FROM registry WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((revision, payload)) => Ok(Stamped {
                value: serde_json::from_str(&payload)?,
                revision: revision as Revision,
            }),
            None => Ok(Stamped {
                value: Instances::new(),
                revision: 0,
            }),
        }
    }

    async fn store_instances(&self, instances: &Instances, expected: Revision) -> Result<Revision> {
        let payload = serde_json::to_string(instances)?;
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let current: Revision = tx
            .query_row("SELECT revision FROM registry WHERE id = 1", [], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?
            .map(|r| r as Revision)
            .unwrap_or(0);

        if current != expected {
            return Err(JiraLinkError::Conflict(format!(
                "instances at revision {}, expected {}",
                current, expected
            )));
        }

        let next = current + 1;
        tx.execute(
            r#"
            INSERT INTO registry (id, revision, payload, updated_at) VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                revision = excluded.revision,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
            params![next as i64, payload, now_millis()],
        )?;
        tx.commit()?;

        tracing::debug!(revision = next, "Registry stored");
        Ok(next)
    }

    async fn load_instance(&self, id: &Id) -> Result<Instance> {
        self.load_payload(
            "SELECT payload FROM instances WHERE id = ?1",
            &[id.as_str()],
            format!("instance {:?}", id.as_str()),
        )
    }

    async fn store_instance(&self, instance: &Instance) -> Result<()> {
        let payload = serde_json::to_string(instance)?;
        self.conn()?.execute(
            r#"
            INSERT INTO instances (id, payload, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
            "#,
            params![instance.id().as_str(), payload, now_millis()],
        )?;
        Ok(())
    }

    async fn delete_instance(&self, id: &Id) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM instances WHERE id = ?1", params![id.as_str()])?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn load_user(&self, user_id: &Id) -> Result<User> {
        self.load_payload(
            "SELECT payload FROM users WHERE id = ?1",
            &[user_id.as_str()],
            format!("user {:?}", user_id.as_str()),
        )
    }

    async fn store_user(&self, user: &User) -> Result<()> {
        let payload = serde_json::to_string(user)?;
        self.conn()?.execute(
            r#"
            INSERT INTO users (id, payload) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET payload = excluded.payload
            "#,
            params![user.host_user_id.as_str(), payload],
        )?;
        Ok(())
    }

    async fn delete_user(&self, user_id: &Id) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM users WHERE id = ?1", params![user_id.as_str()])?;
        Ok(())
    }

    async fn load_connection(&self, instance_id: &Id, user_id: &Id) -> Result<Connection> {
        self.load_payload(
            "SELECT payload FROM connections WHERE instance_id = ?1 AND user_id = ?2",
            &[instance_id.as_str(), user_id.as_str()],
            format!("connection for user {:?} to {}", user_id.as_str(), instance_id),
        )
    }

    async fn store_connection(
        &self,
        instance_id: &Id,
        user_id: &Id,
        connection: &Connection,
    ) -> Result<()> {
        let payload = serde_json::to_string(connection)?;
        self.conn()?.execute(
            r#"
            INSERT INTO connections (instance_id, user_id, payload) VALUES (?1, ?2, ?3)
            ON CONFLICT(instance_id, user_id) DO UPDATE SET payload = excluded.payload
            "#,
            params![instance_id.as_str(), user_id.as_str(), payload],
        )?;
        Ok(())
    }

    async fn delete_connection(&self, instance_id: &Id, user_id: &Id) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM connections WHERE instance_id = ?1 AND user_id = ?2",
            params![instance_id.as_str(), user_id.as_str()],
        )?;
        Ok(())
    }

    async fn map_users(&self, visit: &mut UserVisitor<'_>) -> Result<()> {
        let payloads: Vec<String> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare("SELECT payload FROM users ORDER BY rowid")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };

        for payload in payloads {
            let user: User = serde_json::from_str(&payload)?;
            visit(&user)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceCommon;
    use crate::user::Credentials;
    use tempfile::NamedTempFile;

    fn open_temp() -> (SqliteStore, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteStore::open(StoreConfig::at(temp.path())).unwrap();
        (store, temp)
    }

    #[tokio::test]
    async fn test_store_creation() {
        let (store, temp) = open_temp();
        assert_eq!(store.path(), temp.path());

        let empty = store.load_instances().await.unwrap();
        assert_eq!(empty.revision, 0);
        assert!(empty.value.is_empty());
    }

    #[tokio::test]
    async fn test_registry_revisions() {
        let (store, _temp) = open_temp();

        let mut instances = Instances::new();
        instances.set(InstanceCommon::new(
            "https://jira.local",
            crate::instance::InstanceType::Server,
        ));
        let rev = store.store_instances(&instances, 0).await.unwrap();
        assert_eq!(rev, 1);

        let loaded = store.load_instances().await.unwrap();
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.value, instances);

        let err = store.store_instances(&Instances::new(), 0).await.unwrap_err();
        assert!(matches!(err, JiraLinkError::Conflict(_)));
        // The losing write left nothing behind
        assert_eq!(store.load_instances().await.unwrap().value, instances);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp = NamedTempFile::new().unwrap();
        let instance = Instance::cloud_oauth("https://team.atlassian.net", "cid").unwrap();
        {
            let store = SqliteStore::open(StoreConfig::at(temp.path())).unwrap();
            store.store_instance(&instance).await.unwrap();

            let mut user = User::new("u1");
            user.connected_instances.set(instance.id().clone());
            store.store_user(&user).await.unwrap();
            store
                .store_connection(
                    instance.id(),
                    &user.host_user_id,
                    &Connection::new(Credentials::Bearer { token: "t".into() }),
                )
                .await
                .unwrap();
        }

        let store = SqliteStore::open(StoreConfig::at(temp.path())).unwrap();
        assert_eq!(store.load_instance(instance.id()).await.unwrap(), instance);
        let user = store.load_user(&Id::new("u1")).await.unwrap();
        assert!(user.is_connected(instance.id()));
        assert!(store
            .load_connection(instance.id(), &Id::new("u1"))
            .await
            .is_ok());

        store.delete_instance(instance.id()).await.unwrap();
        assert!(store
            .load_instance(instance.id())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_map_users_in_insertion_order() {
        let (store, _temp) = open_temp();
        for id in ["b", "a", "c"] {
            store.store_user(&User::new(id)).await.unwrap();
        }
        // Overwrite keeps position
        store.store_user(&User::new("b")).await.unwrap();

        let mut seen = Vec::new();
        store
            .map_users(&mut |u: &User| {
                seen.push(u.host_user_id.to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["b", "a", "c"]);
    }
}
