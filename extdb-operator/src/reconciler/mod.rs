//! Reconcilers for the different record kinds.
//!
//! Each reconciler reads the desired state from the store, converges the
//! backend toward it through a [`Provider`] and writes the outcome back as
//! status. Nothing is kept between passes, so every pass is re-entrant.

pub mod database;
pub mod host;
pub mod user;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Settings;
use crate::error::{ReconcileError, Result};
use crate::provider::{resolve_provider, Provider, ProviderRegistry};
use crate::secrets::SecretStore;
use crate::store::DesiredStateStore;
use crate::types::{HostDescriptor, HostRecord, ObjectKey};

pub use database::DatabaseReconciler;
pub use host::HostReconciler;
pub use user::UserReconciler;

/// Record kind a reconciler handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Host,
    Database,
    User,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Host => "host",
            Kind::Database => "database",
            Kind::User => "user",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Converged; wait for the next trigger.
    Done,
    /// Metadata was written and another pass is needed right away.
    Requeue,
}

/// Trait for record reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> Kind;

    /// Run one convergence pass for the record at `key`. A record that no
    /// longer exists is not an error.
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileAction>;
}

/// Collaborators shared by every reconciler.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn DesiredStateStore>,
    pub providers: Arc<ProviderRegistry>,
    pub secrets: Arc<dyn SecretStore>,
    pub settings: Settings,
}

impl Context {
    pub fn new(
        store: Arc<dyn DesiredStateStore>,
        providers: ProviderRegistry,
        secrets: Arc<dyn SecretStore>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            providers: Arc::new(providers),
            secrets,
            settings,
        }
    }

    /// Resolve a host reference in `namespace`.
    pub async fn host(&self, namespace: &str, host_ref: &str) -> Result<HostRecord> {
        if host_ref.is_empty() {
            return Err(ReconcileError::ReferenceNotSet { kind: "host" });
        }
        self.store
            .get_host(&ObjectKey::new(namespace, host_ref))
            .await?
            .ok_or_else(|| ReconcileError::ReferenceNotFound {
                kind: "host",
                name: host_ref.to_string(),
            })
    }

    /// Provider for `host`, scoped to the current pass.
    pub async fn provider(
        &self,
        namespace: &str,
        host: &HostDescriptor,
    ) -> Result<Box<dyn Provider>> {
        resolve_provider(
            &self.providers,
            self.secrets.as_ref(),
            namespace,
            host,
            &self.settings,
        )
        .await
    }

    /// One reconciler per record kind.
    pub fn reconcilers(&self) -> Vec<Arc<dyn Reconciler>> {
        let host: Arc<dyn Reconciler> = Arc::new(HostReconciler::new(self.clone()));
        let database: Arc<dyn Reconciler> = Arc::new(DatabaseReconciler::new(self.clone()));
        let user: Arc<dyn Reconciler> = Arc::new(UserReconciler::new(self.clone()));
        vec![host, database, user]
    }
}
