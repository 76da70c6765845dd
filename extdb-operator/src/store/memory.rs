//! In-process desired-state store.
//!
//! Follows the usual declarative-API rules: a deletion request on a record
//! with finalizers only marks it, and the record is purged when its last
//! finalizer is removed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::types::{
    DatabaseDescriptor, DatabaseRecord, DatabaseStatus, HostDescriptor, HostRecord, HostStatus,
    ObjectKey, Record, UserDescriptor, UserRecord, UserStatus,
};

use super::error::{Result, StoreError};
use super::event::Event;
use super::traits::{DatabaseStore, DesiredStateStore, HostStore, UserStore};

/// One record kind.
struct Table<D, S> {
    kind: &'static str,
    rows: RwLock<BTreeMap<ObjectKey, Record<D, S>>>,
    changed: fn(ObjectKey) -> Event,
    deleted: fn(ObjectKey) -> Event,
}

impl<D, S> Table<D, S>
where
    D: Clone + PartialEq,
    S: Clone + Default,
{
    fn new(
        kind: &'static str,
        changed: fn(ObjectKey) -> Event,
        deleted: fn(ObjectKey) -> Event,
    ) -> Self {
        Self {
            kind,
            rows: RwLock::new(BTreeMap::new()),
            changed,
            deleted,
        }
    }

    fn not_found(&self, key: &ObjectKey) -> StoreError {
        StoreError::NotFound(format!("{} {}", self.kind, key))
    }

    async fn list(&self) -> Vec<Record<D, S>> {
        self.rows.read().await.values().cloned().collect()
    }

    async fn get(&self, key: &ObjectKey) -> Option<Record<D, S>> {
        self.rows.read().await.get(key).cloned()
    }

    /// Create the record or replace its spec. Returns the record and whether
    /// anything changed.
    async fn apply(&self, key: &ObjectKey, spec: D) -> Result<(Record<D, S>, bool)> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(key) {
            Some(existing) if existing.meta.is_deleting() => Err(StoreError::Conflict(format!(
                "{} {} is being deleted",
                self.kind, key
            ))),
            Some(existing) if existing.spec == spec => Ok((existing.clone(), false)),
            Some(existing) => {
                existing.spec = spec;
                existing.meta.generation += 1;
                existing.meta.resource_version += 1;
                Ok((existing.clone(), true))
            }
            None => {
                let mut record = Record::new(key, spec);
                record.meta.generation = 1;
                record.meta.resource_version = 1;
                rows.insert(key.clone(), record.clone());
                Ok((record, true))
            }
        }
    }

    async fn update_status(&self, key: &ObjectKey, status: S) -> Result<Record<D, S>> {
        let mut rows = self.rows.write().await;
        let record = rows.get_mut(key).ok_or_else(|| self.not_found(key))?;
        record.status = status;
        record.meta.resource_version += 1;
        Ok(record.clone())
    }

    async fn add_finalizer(
        &self,
        key: &ObjectKey,
        finalizer: &str,
    ) -> Result<(Record<D, S>, bool)> {
        let mut rows = self.rows.write().await;
        let record = rows.get_mut(key).ok_or_else(|| self.not_found(key))?;
        if record.meta.has_finalizer(finalizer) {
            return Ok((record.clone(), false));
        }
        if record.meta.is_deleting() {
            return Err(StoreError::Conflict(format!(
                "cannot add finalizer to {} {} while it is being deleted",
                self.kind, key
            )));
        }
        record.meta.finalizers.push(finalizer.to_string());
        record.meta.resource_version += 1;
        Ok((record.clone(), true))
    }

    /// Returns the remaining record, or `None` if it was purged.
    async fn remove_finalizer(
        &self,
        key: &ObjectKey,
        finalizer: &str,
    ) -> Result<Option<Record<D, S>>> {
        let mut rows = self.rows.write().await;
        let record = rows.get_mut(key).ok_or_else(|| self.not_found(key))?;
        record.meta.finalizers.retain(|f| f != finalizer);
        record.meta.resource_version += 1;
        if record.meta.is_deleting() && record.meta.finalizers.is_empty() {
            rows.remove(key);
            debug!(kind = self.kind, %key, "Record purged after last finalizer removed");
            return Ok(None);
        }
        Ok(Some(record.clone()))
    }

    /// Returns the marked record, or `None` if it was purged right away.
    async fn request_deletion(&self, key: &ObjectKey) -> Result<Option<Record<D, S>>> {
        let mut rows = self.rows.write().await;
        let record = rows.get_mut(key).ok_or_else(|| self.not_found(key))?;
        if record.meta.finalizers.is_empty() {
            rows.remove(key);
            return Ok(None);
        }
        if record.meta.deletion_timestamp.is_none() {
            record.meta.deletion_timestamp = Some(Utc::now());
            record.meta.resource_version += 1;
        }
        Ok(Some(record.clone()))
    }
}

/// Desired-state store kept in memory.
pub struct MemoryStore {
    hosts: Table<HostDescriptor, HostStatus>,
    databases: Table<DatabaseDescriptor, DatabaseStatus>,
    users: Table<UserDescriptor, UserStatus>,
    events: broadcast::Sender<Event>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            hosts: Table::new("host", Event::HostChanged, Event::HostDeleted),
            databases: Table::new("database", Event::DatabaseChanged, Event::DatabaseDeleted),
            users: Table::new("user", Event::UserChanged, Event::UserDeleted),
            events,
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn apply<D, S>(
        &self,
        table: &Table<D, S>,
        key: &ObjectKey,
        spec: D,
    ) -> Result<Record<D, S>>
    where
        D: Clone + PartialEq,
        S: Clone + Default,
    {
        let (record, changed) = table.apply(key, spec).await?;
        if changed {
            self.emit((table.changed)(key.clone()));
        }
        Ok(record)
    }

    async fn request_deletion<D, S>(
        &self,
        table: &Table<D, S>,
        key: &ObjectKey,
    ) -> Result<Option<Record<D, S>>>
    where
        D: Clone + PartialEq,
        S: Clone + Default,
    {
        let remaining = table.request_deletion(key).await?;
        match remaining {
            Some(_) => self.emit((table.changed)(key.clone())),
            None => self.emit((table.deleted)(key.clone())),
        }
        Ok(remaining)
    }

    /// Create or update a host spec.
    pub async fn apply_host(&self, key: &ObjectKey, spec: HostDescriptor) -> Result<HostRecord> {
        self.apply(&self.hosts, key, spec).await
    }

    /// Create or update a database spec.
    pub async fn apply_database(
        &self,
        key: &ObjectKey,
        spec: DatabaseDescriptor,
    ) -> Result<DatabaseRecord> {
        self.apply(&self.databases, key, spec).await
    }

    /// Create or update a user spec.
    pub async fn apply_user(&self, key: &ObjectKey, spec: UserDescriptor) -> Result<UserRecord> {
        self.apply(&self.users, key, spec).await
    }

    pub async fn request_host_deletion(&self, key: &ObjectKey) -> Result<Option<HostRecord>> {
        self.request_deletion(&self.hosts, key).await
    }

    pub async fn request_database_deletion(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<DatabaseRecord>> {
        self.request_deletion(&self.databases, key).await
    }

    pub async fn request_user_deletion(&self, key: &ObjectKey) -> Result<Option<UserRecord>> {
        self.request_deletion(&self.users, key).await
    }
}

#[async_trait]
impl HostStore for MemoryStore {
    async fn list_hosts(&self) -> Result<Vec<HostRecord>> {
        Ok(self.hosts.list().await)
    }

    async fn get_host(&self, key: &ObjectKey) -> Result<Option<HostRecord>> {
        Ok(self.hosts.get(key).await)
    }

    async fn update_host_status(&self, key: &ObjectKey, status: HostStatus) -> Result<HostRecord> {
        self.hosts.update_status(key, status).await
    }
}

#[async_trait]
impl DatabaseStore for MemoryStore {
    async fn list_databases(&self) -> Result<Vec<DatabaseRecord>> {
        Ok(self.databases.list().await)
    }

    async fn get_database(&self, key: &ObjectKey) -> Result<Option<DatabaseRecord>> {
        Ok(self.databases.get(key).await)
    }

    async fn update_database_status(
        &self,
        key: &ObjectKey,
        status: DatabaseStatus,
    ) -> Result<DatabaseRecord> {
        self.databases.update_status(key, status).await
    }

    async fn add_database_finalizer(
        &self,
        key: &ObjectKey,
        finalizer: &str,
    ) -> Result<DatabaseRecord> {
        let (record, changed) = self.databases.add_finalizer(key, finalizer).await?;
        if changed {
            self.emit(Event::DatabaseChanged(key.clone()));
        }
        Ok(record)
    }

    async fn remove_database_finalizer(
        &self,
        key: &ObjectKey,
        finalizer: &str,
    ) -> Result<Option<DatabaseRecord>> {
        let remaining = self.databases.remove_finalizer(key, finalizer).await?;
        match remaining {
            Some(_) => self.emit(Event::DatabaseChanged(key.clone())),
            None => self.emit(Event::DatabaseDeleted(key.clone())),
        }
        Ok(remaining)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        Ok(self.users.list().await)
    }

    async fn get_user(&self, key: &ObjectKey) -> Result<Option<UserRecord>> {
        Ok(self.users.get(key).await)
    }

    async fn update_user_status(&self, key: &ObjectKey, status: UserStatus) -> Result<UserRecord> {
        self.users.update_status(key, status).await
    }
}

impl DesiredStateStore for MemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}
