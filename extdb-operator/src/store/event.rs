//! Change notifications emitted by a store.

use crate::types::ObjectKey;

/// Emitted when a record's spec or metadata changes.
///
/// Status writes do not emit events, so a reconciler writing status does not
/// trigger itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A host was created or its spec changed.
    HostChanged(ObjectKey),
    /// A host was purged.
    HostDeleted(ObjectKey),

    /// A database was created, changed, or had finalizers or deletion state updated.
    DatabaseChanged(ObjectKey),
    /// A database was purged.
    DatabaseDeleted(ObjectKey),

    /// A user was created or its spec changed.
    UserChanged(ObjectKey),
    /// A user was purged.
    UserDeleted(ObjectKey),
}

impl Event {
    /// Get the resource type for this event.
    pub fn resource_type(&self) -> &'static str {
        match self {
            Event::HostChanged(_) | Event::HostDeleted(_) => "host",
            Event::DatabaseChanged(_) | Event::DatabaseDeleted(_) => "database",
            Event::UserChanged(_) | Event::UserDeleted(_) => "user",
        }
    }

    /// Get the record key for this event.
    pub fn key(&self) -> &ObjectKey {
        match self {
            Event::HostChanged(key)
            | Event::HostDeleted(key)
            | Event::DatabaseChanged(key)
            | Event::DatabaseDeleted(key)
            | Event::UserChanged(key)
            | Event::UserDeleted(key) => key,
        }
    }
}
