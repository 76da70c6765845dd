//! Store trait definitions.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::{
    DatabaseRecord, DatabaseStatus, HostRecord, HostStatus, ObjectKey, UserRecord, UserStatus,
};

use super::error::Result;
use super::event::Event;

/// Store trait for host records.
#[async_trait]
pub trait HostStore: Send + Sync {
    /// List all hosts.
    async fn list_hosts(&self) -> Result<Vec<HostRecord>>;

    /// Get a host by key.
    async fn get_host(&self, key: &ObjectKey) -> Result<Option<HostRecord>>;

    /// Replace a host's status.
    async fn update_host_status(&self, key: &ObjectKey, status: HostStatus) -> Result<HostRecord>;
}

/// Store trait for database records.
#[async_trait]
pub trait DatabaseStore: Send + Sync {
    /// List all databases.
    async fn list_databases(&self) -> Result<Vec<DatabaseRecord>>;

    /// Get a database by key.
    async fn get_database(&self, key: &ObjectKey) -> Result<Option<DatabaseRecord>>;

    /// Replace a database's status.
    async fn update_database_status(
        &self,
        key: &ObjectKey,
        status: DatabaseStatus,
    ) -> Result<DatabaseRecord>;

    /// Add a finalizer. Adding one that is already present is a no-op.
    async fn add_database_finalizer(
        &self,
        key: &ObjectKey,
        finalizer: &str,
    ) -> Result<DatabaseRecord>;

    /// Remove a finalizer.
    ///
    /// Returns `None` when removing it let the store purge a record whose
    /// deletion was requested.
    async fn remove_database_finalizer(
        &self,
        key: &ObjectKey,
        finalizer: &str,
    ) -> Result<Option<DatabaseRecord>>;
}

/// Store trait for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// List all users.
    async fn list_users(&self) -> Result<Vec<UserRecord>>;

    /// Get a user by key.
    async fn get_user(&self, key: &ObjectKey) -> Result<Option<UserRecord>>;

    /// Replace a user's status.
    async fn update_user_status(&self, key: &ObjectKey, status: UserStatus) -> Result<UserRecord>;
}

/// Composite store trait combining all record kinds.
///
/// This is the trait reconcilers and the controller use.
pub trait DesiredStateStore: HostStore + DatabaseStore + UserStore + Send + Sync {
    /// Subscribe to change events.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
