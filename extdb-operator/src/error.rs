//! Error taxonomy of a reconciliation pass.
//!
//! Every variant renders to the human-readable text that ends up in a
//! record's status, so the `#[error]` strings are part of the status
//! vocabulary.

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::LifecycleError;
use crate::secrets::SecretError;
use crate::store::StoreError;
use crate::types::EngineKind;

/// Input rejected before any statement is sent to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{what} must not be empty")]
    Empty { what: &'static str },

    #[error("{what} '{value}' is longer than {max} bytes")]
    TooLong {
        what: &'static str,
        value: String,
        max: usize,
    },

    #[error("{what} '{value}' must start with a letter or underscore")]
    InvalidStart { what: &'static str, value: String },

    #[error("{what} '{value}' contains disallowed character {ch:?}")]
    DisallowedCharacter {
        what: &'static str,
        value: String,
        ch: char,
    },

    #[error("{what} contains a NUL byte")]
    NulByte { what: &'static str },

    #[error("password and passwordSecretRef are mutually exclusive")]
    ConflictingCredentials,

    #[error("at least one privilege grant is required")]
    NoGrants,

    #[error("grant on '{object_type}' lists no privileges")]
    EmptyGrant { object_type: String },

    #[error("object type '{object_type}' is not supported by {engine}")]
    UnsupportedObjectType {
        object_type: String,
        engine: &'static str,
    },

    #[error("privilege '{privilege}' cannot be granted on {object_type}")]
    UnsupportedPrivilege {
        privilege: String,
        object_type: &'static str,
    },
}

/// Why a backend connection could not be used.
#[derive(Debug, Error)]
pub enum ConnectionFailure {
    #[error("{0}")]
    Driver(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("liveness probe failed: {0}")]
    Probe(String),

    #[error("credential unavailable: {0}")]
    Credential(#[from] SecretError),
}

/// Network or authentication failure reaching a backend.
#[derive(Debug, Error)]
#[error("failed to connect to '{principal}@{host}': {failure}")]
pub struct ConnectionError {
    pub principal: String,
    pub host: String,
    pub failure: ConnectionFailure,
}

impl ConnectionError {
    pub fn new(
        principal: impl Into<String>,
        host: impl Into<String>,
        failure: ConnectionFailure,
    ) -> Self {
        Self {
            principal: principal.into(),
            host: host.into(),
            failure,
        }
    }
}

/// A provisioning operation did not converge.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("invalid input: {0}")]
    Invalid(#[from] ValidationError),

    #[error("failed to create {kind} '{object}': {cause}")]
    Rejected {
        kind: &'static str,
        object: String,
        cause: String,
    },

    #[error("statement on {kind} '{object}' timed out after {timeout:?}")]
    Timeout {
        kind: &'static str,
        object: String,
        timeout: Duration,
    },

    #[error("user '{user}' was created but its grants are incomplete: {cause}")]
    PartialGrant { user: String, cause: String },

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
}

/// Terminal result of a failed reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("database engine '{engine}' is not supported")]
    UnsupportedEngine { engine: EngineKind },

    #[error("{kind} reference is not set")]
    ReferenceNotSet { kind: &'static str },

    #[error("{kind} '{name}' not found")]
    ReferenceNotFound { kind: &'static str, name: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("invalid descriptor: {0}")]
    Invalid(#[from] ValidationError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
