//! Engine-specific provisioning behind one contract.
//!
//! A [`ProviderRegistry`] maps an [`EngineKind`] to a [`ProviderFactory`].
//! Reconcilers resolve the factory once per pass and build a [`Provider`]
//! scoped to that pass; providers never share connections between calls.

pub mod mysql;
pub mod postgres;
pub mod sql;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Settings;
use crate::error::{ConnectionError, ConnectionFailure, ProvisionError, ReconcileError};
use crate::secrets::{resolve_credential, SecretStore};
use crate::types::{DatabaseDescriptor, EngineKind, HostDescriptor, UserDescriptor};

pub use mysql::MysqlFactory;
pub use postgres::PostgresFactory;

/// Operations against one database host.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Open a connection with the administrative credentials, probe it, close it.
    async fn check_connection(&self) -> Result<(), ConnectionError>;

    /// Create the database unless one with the same name exists.
    ///
    /// An existing database is left untouched even if its owner, encoding or
    /// collation differ from the descriptor.
    async fn create_database(&self, desc: &DatabaseDescriptor) -> Result<(), ProvisionError>;

    /// Create the user unless it exists, then apply its grants on `database`.
    async fn create_user(
        &self,
        database: &str,
        desc: &UserDescriptor,
        password: &str,
    ) -> Result<(), ProvisionError>;

    /// Reserved for role-based privilege grouping.
    async fn create_role(&self) -> Result<(), ProvisionError> {
        Err(ProvisionError::NotImplemented("role creation"))
    }
}

/// Everything a provider needs to reach its host.
#[derive(Clone)]
pub struct ConnectionTarget {
    pub address: String,
    pub port: u16,
    pub principal: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
}

impl ConnectionTarget {
    pub fn new(host: &HostDescriptor, password: String, settings: &Settings) -> Self {
        Self {
            address: host.address.clone(),
            port: host.effective_port().unwrap_or_default(),
            principal: host.principal.clone(),
            password,
            connect_timeout: settings.connect_timeout,
            statement_timeout: settings.statement_timeout,
        }
    }

    pub fn connection_error(&self, failure: ConnectionFailure) -> ConnectionError {
        ConnectionError::new(&self.principal, &self.address, failure)
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("principal", &self.principal)
            .field("password", &"[REDACTED]")
            .field("connect_timeout", &self.connect_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

/// Builds providers for one engine.
pub trait ProviderFactory: Send + Sync {
    fn engine(&self) -> EngineKind;

    fn build(&self, target: ConnectionTarget) -> Box<dyn Provider>;
}

/// Provider factories keyed by engine.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<EngineKind, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Postgres and MySQL providers.
    pub fn with_defaults() -> Self {
        Self::new().register(PostgresFactory).register(MysqlFactory)
    }

    /// Register a factory, replacing any previous one for the same engine.
    pub fn register(mut self, factory: impl ProviderFactory + 'static) -> Self {
        self.factories.insert(factory.engine(), Arc::new(factory));
        self
    }

    pub fn supports(&self, engine: &EngineKind) -> bool {
        self.factories.contains_key(engine)
    }

    pub fn factory(&self, engine: &EngineKind) -> Result<Arc<dyn ProviderFactory>, ReconcileError> {
        self.factories
            .get(engine)
            .cloned()
            .ok_or_else(|| ReconcileError::UnsupportedEngine {
                engine: engine.clone(),
            })
    }

    pub fn engines(&self) -> Vec<EngineKind> {
        let mut engines: Vec<_> = self.factories.keys().cloned().collect();
        engines.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        engines
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}

/// Resolve the provider for `host`: look up the engine first, so an
/// unsupported engine fails before any credential lookup or network I/O.
pub async fn resolve_provider(
    registry: &ProviderRegistry,
    secrets: &dyn SecretStore,
    namespace: &str,
    host: &HostDescriptor,
    settings: &Settings,
) -> Result<Box<dyn Provider>, ReconcileError> {
    let factory = registry.factory(&host.engine)?;
    let password = resolve_credential(secrets, namespace, &host.credential)
        .await
        .map_err(|e| {
            ConnectionError::new(&host.principal, &host.address, ConnectionFailure::Credential(e))
        })?;
    debug!(
        host = %host.address,
        engine = %host.engine,
        secrets = secrets.provider_type(),
        "Resolved provider"
    );
    Ok(factory.build(ConnectionTarget::new(host, password, settings)))
}

/// Run one driver call under the statement deadline. The outer error is a
/// missed deadline; the inner one is whatever the server answered.
pub(crate) async fn deadline<T, F>(
    timeout: Duration,
    kind: &'static str,
    object: &str,
    fut: F,
) -> Result<Result<T, sqlx::Error>, ProvisionError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ProvisionError::Timeout {
            kind,
            object: object.to_string(),
            timeout,
        })
}

pub(crate) fn rejected(kind: &'static str, object: &str, err: sqlx::Error) -> ProvisionError {
    ProvisionError::Rejected {
        kind,
        object: object.to_string(),
        cause: err.to_string(),
    }
}

/// Run one driver call under the statement deadline, any server error
/// counting as a rejection.
pub(crate) async fn bounded<T, F>(
    timeout: Duration,
    kind: &'static str,
    object: &str,
    fut: F,
) -> Result<T, ProvisionError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    deadline(timeout, kind, object, fut)
        .await?
        .map_err(|e| rejected(kind, object, e))
}

/// Map a failure to open a call-scoped pool.
pub(crate) fn connect_failure(target: &ConnectionTarget, err: sqlx::Error) -> ConnectionError {
    match err {
        sqlx::Error::PoolTimedOut => {
            target.connection_error(ConnectionFailure::Timeout(target.connect_timeout))
        }
        other => target.connection_error(ConnectionFailure::Driver(other.to_string())),
    }
}
