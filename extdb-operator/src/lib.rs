//! Reconciliation engine for external relational databases.
//!
//! Desired state (hosts, databases, users) lives in a [`store::DesiredStateStore`].
//! Reconcilers converge live Postgres and MySQL servers toward it through
//! engine-specific [`provider::Provider`]s and report the outcome as status.

pub mod config;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod provider;
pub mod reconciler;
pub mod secrets;
pub mod status;
pub mod store;
pub mod types;

pub use config::Settings;
pub use controller::{Controller, SyncSummary, WorkItem};
pub use error::{ConnectionError, ProvisionError, ReconcileError, ValidationError};
pub use manifest::{Manifest, ManifestError};
pub use provider::{Provider, ProviderFactory, ProviderRegistry};
pub use reconciler::{Context, Kind, ReconcileAction, Reconciler};
pub use store::{DesiredStateStore, Event, MemoryStore, StoreError};
