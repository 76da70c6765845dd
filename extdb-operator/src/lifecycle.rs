//! Finalizer-driven deletion lifecycle of a database record.
//!
//! The state is derived from the record's metadata on every pass and each
//! write the reconciler makes is checked against the allowed transitions.

use thiserror::Error;

use crate::types::ObjectMeta;

/// Finalizer placed on database records before anything is provisioned.
pub const DATABASE_FINALIZER: &str = "extdb.io/database-cleanup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No finalizer yet.
    Unadmitted,
    /// Finalizer present, converge normally.
    Admitted,
    /// Deletion requested, cleanup still owed.
    PendingDeletion,
    /// Deletion requested and cleanup done; the store may purge the record.
    Deleted,
}

/// What a pass must do in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    AddFinalizer,
    Converge,
    Cleanup,
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal lifecycle transition from {from:?} to {to:?}")]
pub struct LifecycleError {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

impl LifecycleState {
    pub fn observe(meta: &ObjectMeta, finalizer: &str) -> Self {
        match (meta.is_deleting(), meta.has_finalizer(finalizer)) {
            (false, false) => LifecycleState::Unadmitted,
            (false, true) => LifecycleState::Admitted,
            (true, true) => LifecycleState::PendingDeletion,
            (true, false) => LifecycleState::Deleted,
        }
    }

    pub fn action(self) -> LifecycleAction {
        match self {
            LifecycleState::Unadmitted => LifecycleAction::AddFinalizer,
            LifecycleState::Admitted => LifecycleAction::Converge,
            LifecycleState::PendingDeletion => LifecycleAction::Cleanup,
            LifecycleState::Deleted => LifecycleAction::Nothing,
        }
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        self == next
            || matches!(
                (self, next),
                (Unadmitted, Admitted)
                    | (Unadmitted, Deleted)
                    | (Admitted, PendingDeletion)
                    | (PendingDeletion, Deleted)
            )
    }

    pub fn transition(self, next: LifecycleState) -> Result<LifecycleState, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError {
                from: self,
                to: next,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectKey;
    use chrono::Utc;

    fn meta(finalized: bool, deleting: bool) -> ObjectMeta {
        let mut meta = ObjectMeta::new(&ObjectKey::new("default", "orders"));
        if finalized {
            meta.finalizers.push(DATABASE_FINALIZER.to_string());
        }
        if deleting {
            meta.deletion_timestamp = Some(Utc::now());
        }
        meta
    }

    #[test]
    fn test_observe() {
        use LifecycleState::*;
        assert_eq!(LifecycleState::observe(&meta(false, false), DATABASE_FINALIZER), Unadmitted);
        assert_eq!(LifecycleState::observe(&meta(true, false), DATABASE_FINALIZER), Admitted);
        assert_eq!(LifecycleState::observe(&meta(true, true), DATABASE_FINALIZER), PendingDeletion);
        assert_eq!(LifecycleState::observe(&meta(false, true), DATABASE_FINALIZER), Deleted);
    }

    #[test]
    fn test_foreign_finalizer_does_not_admit() {
        let mut m = meta(false, false);
        m.finalizers.push("someone.else/cleanup".into());
        assert_eq!(
            LifecycleState::observe(&m, DATABASE_FINALIZER),
            LifecycleState::Unadmitted
        );
    }

    #[test]
    fn test_transitions() {
        use LifecycleState::*;
        assert!(Unadmitted.transition(Admitted).is_ok());
        assert!(Admitted.transition(PendingDeletion).is_ok());
        assert!(PendingDeletion.transition(Deleted).is_ok());
        assert!(Admitted.transition(Admitted).is_ok());

        assert!(Admitted.transition(Unadmitted).is_err());
        assert!(Deleted.transition(Admitted).is_err());
        assert!(PendingDeletion.transition(Admitted).is_err());
    }

    #[test]
    fn test_actions() {
        assert_eq!(LifecycleState::Unadmitted.action(), LifecycleAction::AddFinalizer);
        assert_eq!(LifecycleState::PendingDeletion.action(), LifecycleAction::Cleanup);
        assert_eq!(LifecycleState::Deleted.action(), LifecycleAction::Nothing);
    }
}
