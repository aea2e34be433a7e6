//! Persistence for instances, users and connections
//!
//! The registry is stored as one value guarded by a revision counter: a write
//! names the revision it was computed from and fails with
//! [`JiraLinkError::Conflict`](crate::JiraLinkError::Conflict) if another
//! writer got there first. Everything else is plain keyed storage.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreConfig};

use crate::instance::{Instance, Instances};
use crate::types::Id;
use crate::user::{Connection, User};
use crate::Result;
use async_trait::async_trait;

/// Monotonic version of the stored registry; 0 means never written
pub type Revision = u64;

/// A loaded value and the revision it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    pub revision: Revision,
}

/// Registry and per-instance records
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Current registry; empty at revision 0 if never stored
    async fn load_instances(&self) -> Result<Stamped<Instances>>;

    /// Replace the registry if it is still at `expected`; returns the new revision
    async fn store_instances(&self, instances: &Instances, expected: Revision) -> Result<Revision>;

    /// Fails with a not-found error when no record exists
    async fn load_instance(&self, id: &Id) -> Result<Instance>;

    async fn store_instance(&self, instance: &Instance) -> Result<()>;

    /// Deleting a missing record succeeds
    async fn delete_instance(&self, id: &Id) -> Result<()>;
}

/// Callback for [`UserStore::map_users`]
pub type UserVisitor<'a> = dyn FnMut(&User) -> Result<()> + Send + 'a;

/// Users and their connections
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with a not-found error for unknown users
    async fn load_user(&self, user_id: &Id) -> Result<User>;

    async fn store_user(&self, user: &User) -> Result<()>;

    async fn delete_user(&self, user_id: &Id) -> Result<()>;

    async fn load_connection(&self, instance_id: &Id, user_id: &Id) -> Result<Connection>;

    async fn store_connection(
        &self,
        instance_id: &Id,
        user_id: &Id,
        connection: &Connection,
    ) -> Result<()>;

    async fn delete_connection(&self, instance_id: &Id, user_id: &Id) -> Result<()>;

    /// Visit every stored user; an error from the visitor stops the walk
    async fn map_users(&self, visit: &mut UserVisitor<'_>) -> Result<()>;

    /// Load a user, treating an unknown user as one with no connections
    async fn load_user_or_default(&self, user_id: &Id) -> Result<User> {
        match self.load_user(user_id).await {
            Ok(user) => Ok(user),
            Err(e) if e.is_not_found() => Ok(User::new(user_id.clone())),
            Err(e) => Err(e),
        }
    }
}
