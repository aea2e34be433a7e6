//! In-memory store

use super::{InstanceStore, Revision, Stamped, UserStore, UserVisitor};
use crate::instance::{Instance, Instances};
use crate::types::Id;
use crate::user::{Connection, User};
use crate::{JiraLinkError, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    instances: Instances,
    revision: Revision,
    records: HashMap<Id, Instance>,
    users: IndexMap<Id, User>,
    connections: HashMap<(Id, Id), Connection>,
}

/// Store backed by process memory; used by tests and embedders
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn load_instances(&self) -> Result<Stamped<Instances>> {
        let state = self.state.read().await;
        Ok(Stamped {
            value: state.instances.clone(),
            revision: state.revision,
        })
    }

    async fn store_instances(&self, instances: &Instances, expected: Revision) -> Result<Revision> {
        let mut state = self.state.write().await;
        if state.revision != expected {
            return Err(JiraLinkError::Conflict(format!(
                "instances at revision {}, expected {}",
                state.revision, expected
            )));
        }
        state.instances = instances.clone();
        state.revision += 1;
        Ok(state.revision)
    }

    async fn load_instance(&self, id: &Id) -> Result<Instance> {
        self.state
            .read()
            .await
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| JiraLinkError::not_found(format!("instance {:?}", id.as_str())))
    }

    async fn store_instance(&self, instance: &Instance) -> Result<()> {
        self.state
            .write()
            .await
            .records
            .insert(instance.id().clone(), instance.clone());
        Ok(())
    }

    async fn delete_instance(&self, id: &Id) -> Result<()> {
        self.state.write().await.records.remove(id);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn load_user(&self, user_id: &Id) -> Result<User> {
        self.state
            .read()
            .await
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| JiraLinkError::not_found(format!("user {:?}", user_id.as_str())))
    }

    async fn store_user(&self, user: &User) -> Result<()> {
        self.state
            .write()
            .await
            .users
            .insert(user.host_user_id.clone(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, user_id: &Id) -> Result<()> {
        self.state.write().await.users.shift_remove(user_id);
        Ok(())
    }

    async fn load_connection(&self, instance_id: &Id, user_id: &Id) -> Result<Connection> {
        self.state
            .read()
            .await
            .connections
            .get(&(instance_id.clone(), user_id.clone()))
            .cloned()
            .ok_or_else(|| {
                JiraLinkError::not_found(format!(
                    "connection for user {:?} to {}",
                    user_id.as_str(),
                    instance_id
                ))
            })
    }

    async fn store_connection(
        &self,
        instance_id: &Id,
        user_id: &Id,
        connection: &Connection,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .connections
            .insert((instance_id.clone(), user_id.clone()), connection.clone());
        Ok(())
    }

    async fn delete_connection(&self, instance_id: &Id, user_id: &Id) -> Result<()> {
        self.state
            .write()
            .await
            .connections
            .remove(&(instance_id.clone(), user_id.clone()));
        Ok(())
    }

    async fn map_users(&self, visit: &mut UserVisitor<'_>) -> Result<()> {
        // Snapshot so the visitor never runs under the lock
        let users: Vec<User> = self.state.read().await.users.values().cloned().collect();
        for user in &users {
            visit(user)?;
        }
        Ok(())
    }
}
