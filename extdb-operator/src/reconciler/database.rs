//! Database convergence - ensures a declared database exists on its host.
//!
//! Every pass starts by observing the finalizer lifecycle of the record:
//!
//! ```text
//! Unadmitted ──add finalizer──▶ Admitted ──deletion──▶ PendingDeletion
//!                                  │                          │
//!                              converge           cleanup, drop finalizer
//!                                                             ▼
//!                                                          Deleted
//! ```
//!
//! The finalizer is persisted in its own pass before anything is
//! provisioned, so a record can never own a database the store does not
//! know to clean up.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};

use super::{Context, Kind, ReconcileAction, Reconciler};
use crate::error::Result;
use crate::lifecycle::{LifecycleAction, LifecycleState, DATABASE_FINALIZER};
use crate::status::{report, ObservedStatus, Outcome};
use crate::types::{DatabaseDescriptor, DatabaseRecord, ObjectKey};

pub struct DatabaseReconciler {
    ctx: Context,
}

impl DatabaseReconciler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn admit(&self, key: &ObjectKey, state: LifecycleState) -> Result<ReconcileAction> {
        state.transition(LifecycleState::Admitted)?;
        self.ctx
            .store
            .add_database_finalizer(key, DATABASE_FINALIZER)
            .await?;
        info!("Admitted database {}", key);
        Ok(ReconcileAction::Requeue)
    }

    async fn finalize(
        &self,
        key: &ObjectKey,
        record: &DatabaseRecord,
        state: LifecycleState,
    ) -> Result<ReconcileAction> {
        state.transition(LifecycleState::Deleted)?;
        // Cleanup is not destructive: the database stays on its host.
        info!(
            "Finalizing database {}; '{}' is left in place on host '{}'",
            key, record.spec.name, record.spec.host_ref
        );
        let remaining = self
            .ctx
            .store
            .remove_database_finalizer(key, DATABASE_FINALIZER)
            .await?;
        if remaining.is_none() {
            debug!("Database {} purged from the store", key);
        }
        Ok(ReconcileAction::Done)
    }

    async fn provision(&self, key: &ObjectKey, spec: &DatabaseDescriptor) -> Result<()> {
        let host = self.ctx.host(&key.namespace, &spec.host_ref).await?;
        host.spec.validate()?;
        let provider = self.ctx.provider(&key.namespace, &host.spec).await?;
        provider.create_database(spec).await?;
        Ok(())
    }

    async fn converge(&self, key: &ObjectKey, record: &DatabaseRecord) -> Result<ReconcileAction> {
        info!(
            namespace = %key.namespace,
            name = %key.name,
            host_ref = %record.spec.host_ref,
            "Reconciling database {}",
            record.spec.name
        );

        let result = self.provision(key, &record.spec).await;
        let outcome = match &result {
            Ok(()) => Outcome::DatabaseCreated {
                name: &record.spec.name,
            },
            Err(e) => {
                error!("Failed to reconcile database {}: {}", key, e);
                Outcome::Failed(e)
            }
        };

        let mut status = record.status.clone();
        status.apply(&report(&outcome, Utc::now()));
        self.ctx.store.update_database_status(key, status).await?;

        result.map(|()| ReconcileAction::Done)
    }
}

#[async_trait]
impl Reconciler for DatabaseReconciler {
    fn kind(&self) -> Kind {
        Kind::Database
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileAction> {
        let Some(record) = self.ctx.store.get_database(key).await? else {
            debug!("Database {} is gone, nothing to reconcile", key);
            return Ok(ReconcileAction::Done);
        };

        let state = LifecycleState::observe(&record.meta, DATABASE_FINALIZER);
        debug!("Database {} is {:?}", key, state);
        match state.action() {
            LifecycleAction::AddFinalizer => self.admit(key, state).await,
            LifecycleAction::Converge => self.converge(key, &record).await,
            LifecycleAction::Cleanup => self.finalize(key, &record, state).await,
            LifecycleAction::Nothing => Ok(ReconcileAction::Done),
        }
    }
}
