//! Maps reconciliation outcomes to the status text written back on records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::types::{DatabaseStatus, HostStatus, UserStatus};

/// Result of one convergence pass.
#[derive(Debug)]
pub enum Outcome<'a> {
    HostConnected { address: &'a str },
    DatabaseCreated { name: &'a str },
    UserReconciled { username: &'a str },
    Failed(&'a ReconcileError),
}

/// Message plus the time of success, if the pass succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

pub fn report(outcome: &Outcome<'_>, now: DateTime<Utc>) -> StatusRecord {
    let (message, timestamp) = match outcome {
        Outcome::HostConnected { address } => (
            format!("connection with host '{}' was successful", address),
            Some(now),
        ),
        Outcome::DatabaseCreated { name } => {
            (format!("database '{}' successfully created", name), Some(now))
        }
        Outcome::UserReconciled { username } => {
            (format!("user '{}' successfully reconciled", username), Some(now))
        }
        Outcome::Failed(err) => (err.to_string(), None),
    };
    StatusRecord { message, timestamp }
}

/// Status sub-record that accepts a [`StatusRecord`].
///
/// A failure overwrites the message but keeps the last success time.
pub trait ObservedStatus {
    fn apply(&mut self, record: &StatusRecord);
    fn message(&self) -> &str;
}

impl ObservedStatus for HostStatus {
    fn apply(&mut self, record: &StatusRecord) {
        self.connection_status = record.message.clone();
        if let Some(ts) = record.timestamp {
            self.last_connection_time = Some(ts);
        }
    }

    fn message(&self) -> &str {
        &self.connection_status
    }
}

impl ObservedStatus for DatabaseStatus {
    fn apply(&mut self, record: &StatusRecord) {
        self.creation_status = record.message.clone();
        if let Some(ts) = record.timestamp {
            self.last_creation_time = Some(ts);
        }
    }

    fn message(&self) -> &str {
        &self.creation_status
    }
}

impl ObservedStatus for UserStatus {
    fn apply(&mut self, record: &StatusRecord) {
        self.reconcile_status = record.message.clone();
        if let Some(ts) = record.timestamp {
            self.last_reconcile_time = Some(ts);
        }
    }

    fn message(&self) -> &str {
        &self.reconcile_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_messages() {
        let now = Utc::now();
        let rec = report(&Outcome::HostConnected { address: "db.internal" }, now);
        assert_eq!(rec.message, "connection with host 'db.internal' was successful");
        assert_eq!(rec.timestamp, Some(now));

        let rec = report(&Outcome::DatabaseCreated { name: "orders" }, now);
        assert_eq!(rec.message, "database 'orders' successfully created");
    }

    #[test]
    fn test_failure_keeps_last_success_time() {
        let earlier = Utc::now();
        let mut status = HostStatus::default();
        status.apply(&report(&Outcome::HostConnected { address: "db" }, earlier));

        let err = ReconcileError::ReferenceNotSet { kind: "host" };
        let rec = report(&Outcome::Failed(&err), Utc::now());
        assert_eq!(rec.timestamp, None);

        status.apply(&rec);
        assert_eq!(status.message(), "host reference is not set");
        assert_eq!(status.last_connection_time, Some(earlier));
    }
}
