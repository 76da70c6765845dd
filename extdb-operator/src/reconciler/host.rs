//! Host verifier - probes connectivity to a database server.
//!
//! Hosts own no external side effect, so there is no finalizer and no
//! cleanup on deletion.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};

use super::{Context, Kind, ReconcileAction, Reconciler};
use crate::error::Result;
use crate::status::{report, ObservedStatus, Outcome};
use crate::types::{HostDescriptor, ObjectKey};

pub struct HostReconciler {
    ctx: Context,
}

impl HostReconciler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn verify(&self, key: &ObjectKey, spec: &HostDescriptor) -> Result<()> {
        spec.validate()?;
        let provider = self.ctx.provider(&key.namespace, spec).await?;
        provider.check_connection().await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for HostReconciler {
    fn kind(&self) -> Kind {
        Kind::Host
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileAction> {
        let Some(record) = self.ctx.store.get_host(key).await? else {
            debug!("Host {} is gone, nothing to verify", key);
            return Ok(ReconcileAction::Done);
        };
        info!(
            namespace = %key.namespace,
            name = %key.name,
            engine = %record.spec.engine,
            "Reconciling host {}",
            record.spec.address
        );

        let result = self.verify(key, &record.spec).await;
        let outcome = match &result {
            Ok(()) => Outcome::HostConnected {
                address: &record.spec.address,
            },
            Err(e) => {
                error!("Failed to verify host {}: {}", key, e);
                Outcome::Failed(e)
            }
        };

        let mut status = record.status.clone();
        status.apply(&report(&outcome, Utc::now()));
        self.ctx.store.update_host_status(key, status).await?;

        result.map(|()| ReconcileAction::Done)
    }
}
