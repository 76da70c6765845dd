//! User reconciler - creates a principal on the host of its database and
//! applies its grants.
//!
//! Grants are additive: every declared grant is re-applied on each pass and
//! privileges that are no longer declared are not revoked. An existing
//! user's password is never rotated.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};

use super::{Context, Kind, ReconcileAction, Reconciler};
use crate::error::{ConnectionError, ConnectionFailure, ReconcileError, Result};
use crate::secrets::resolve_credential;
use crate::status::{report, ObservedStatus, Outcome};
use crate::types::{ObjectKey, UserDescriptor};

pub struct UserReconciler {
    ctx: Context,
}

impl UserReconciler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn provision(&self, key: &ObjectKey, spec: &UserDescriptor) -> Result<()> {
        if spec.database_ref.is_empty() {
            return Err(ReconcileError::ReferenceNotSet { kind: "database" });
        }
        let database = self
            .ctx
            .store
            .get_database(&ObjectKey::new(key.namespace.clone(), spec.database_ref.clone()))
            .await?
            .ok_or_else(|| ReconcileError::ReferenceNotFound {
                kind: "database",
                name: spec.database_ref.clone(),
            })?;
        let host = self.ctx.host(&key.namespace, &database.spec.host_ref).await?;
        host.spec.validate()?;
        let provider = self.ctx.provider(&key.namespace, &host.spec).await?;

        spec.validate()?;
        let password =
            resolve_credential(self.ctx.secrets.as_ref(), &key.namespace, &spec.credential)
                .await
                .map_err(|e| {
                    ConnectionError::new(
                        &spec.username,
                        &host.spec.address,
                        ConnectionFailure::Credential(e),
                    )
                })?;

        provider
            .create_user(&database.spec.name, spec, &password)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for UserReconciler {
    fn kind(&self) -> Kind {
        Kind::User
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileAction> {
        let Some(record) = self.ctx.store.get_user(key).await? else {
            debug!("User {} is gone, nothing to reconcile", key);
            return Ok(ReconcileAction::Done);
        };
        info!(
            namespace = %key.namespace,
            name = %key.name,
            database_ref = %record.spec.database_ref,
            "Reconciling user {}",
            record.spec.username
        );

        let result = self.provision(key, &record.spec).await;
        let outcome = match &result {
            Ok(()) => Outcome::UserReconciled {
                username: &record.spec.username,
            },
            Err(e) => {
                error!("Failed to reconcile user {}: {}", key, e);
                Outcome::Failed(e)
            }
        };

        let mut status = record.status.clone();
        status.apply(&report(&outcome, Utc::now()));
        self.ctx.store.update_user_status(key, status).await?;

        result.map(|()| ReconcileAction::Done)
    }
}
