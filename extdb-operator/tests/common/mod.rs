//! Test helpers for extdb-operator integration tests.
//!
//! `Backend` stands in for a database server: it keeps a catalog of
//! databases and users and records every call and every CREATE statement a
//! provider would have sent. No live database is needed.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use extdb_operator::error::{ConnectionError, ConnectionFailure, ProvisionError};
use extdb_operator::provider::postgres::create_database_statement;
use extdb_operator::provider::{ConnectionTarget, Provider, ProviderFactory, ProviderRegistry};
use extdb_operator::secrets::StaticSecretStore;
use extdb_operator::types::{
    Credential, DatabaseDescriptor, EngineKind, HostDescriptor, ObjectKey, UserDescriptor,
};
use extdb_operator::{Context, MemoryStore, Settings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CheckConnection { address: String, principal: String },
    CreateDatabase { name: String },
    CreateUser { database: String, username: String, password: String },
}

/// Fake database server shared by every provider the factory builds.
#[derive(Debug, Default)]
pub struct Backend {
    calls: Mutex<Vec<Call>>,
    call_times: Mutex<Vec<Instant>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    statements: Mutex<Vec<String>>,
    databases: Mutex<HashSet<String>>,
    users: Mutex<HashSet<String>>,
    passwords: Mutex<Vec<String>>,
    unreachable: Mutex<Option<String>>,
}

impl Backend {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// When each call was made.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Most connection checks that were ever in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Make every connection check take `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// CREATE statements actually issued.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Passwords providers were built with.
    pub fn admin_passwords(&self) -> Vec<String> {
        self.passwords.lock().unwrap().clone()
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.databases.lock().unwrap().contains(name)
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.users.lock().unwrap().contains(name)
    }

    /// Pre-populate the catalog.
    pub fn seed_database(&self, name: &str) {
        self.databases.lock().unwrap().insert(name.to_string());
    }

    /// Make every connection fail with `cause`, or succeed again with `None`.
    pub fn set_unreachable(&self, cause: Option<&str>) {
        *self.unreachable.lock().unwrap() = cause.map(str::to_string);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
        self.call_times.lock().unwrap().push(Instant::now());
    }

    async fn stall(&self) {
        let latency = *self.latency.lock().unwrap();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn connect(&self, target: &ConnectionTarget) -> Result<(), ConnectionError> {
        match self.unreachable.lock().unwrap().clone() {
            Some(cause) => Err(target.connection_error(ConnectionFailure::Driver(cause))),
            None => Ok(()),
        }
    }
}

pub struct FakeFactory {
    engine: EngineKind,
    backend: Arc<Backend>,
}

impl FakeFactory {
    pub fn new(engine: EngineKind, backend: Arc<Backend>) -> Self {
        Self { engine, backend }
    }
}

impl ProviderFactory for FakeFactory {
    fn engine(&self) -> EngineKind {
        self.engine.clone()
    }

    fn build(&self, target: ConnectionTarget) -> Box<dyn Provider> {
        self.backend
            .passwords
            .lock()
            .unwrap()
            .push(target.password.clone());
        Box::new(FakeProvider {
            backend: Arc::clone(&self.backend),
            target,
        })
    }
}

struct FakeProvider {
    backend: Arc<Backend>,
    target: ConnectionTarget,
}

#[async_trait]
impl Provider for FakeProvider {
    async fn check_connection(&self) -> Result<(), ConnectionError> {
        self.backend.record(Call::CheckConnection {
            address: self.target.address.clone(),
            principal: self.target.principal.clone(),
        });
        self.backend.stall().await;
        self.backend.connect(&self.target)
    }

    async fn create_database(&self, desc: &DatabaseDescriptor) -> Result<(), ProvisionError> {
        self.backend.record(Call::CreateDatabase {
            name: desc.name.clone(),
        });
        let statement = create_database_statement(desc, &self.target.principal)?;
        self.backend.connect(&self.target)?;

        let mut databases = self.backend.databases.lock().unwrap();
        if databases.insert(desc.name.clone()) {
            self.backend.statements.lock().unwrap().push(statement);
        }
        Ok(())
    }

    async fn create_user(
        &self,
        database: &str,
        desc: &UserDescriptor,
        password: &str,
    ) -> Result<(), ProvisionError> {
        self.backend.record(Call::CreateUser {
            database: database.to_string(),
            username: desc.username.clone(),
            password: password.to_string(),
        });
        desc.validate()?;
        self.backend.connect(&self.target)?;
        self.backend.users.lock().unwrap().insert(desc.username.clone());
        Ok(())
    }
}

/// Store, secrets and a fake backend wired into a reconciler [`Context`].
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub secrets: Arc<StaticSecretStore>,
    pub backend: Arc<Backend>,
    pub ctx: Context,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let secrets = Arc::new(StaticSecretStore::new());
        let backend = Arc::new(Backend::default());
        let registry = ProviderRegistry::new()
            .register(FakeFactory::new(EngineKind::Postgres, Arc::clone(&backend)))
            .register(FakeFactory::new(EngineKind::Mysql, Arc::clone(&backend)));
        let ctx = Context::new(store.clone(), registry, secrets.clone(), settings);
        Self {
            store,
            secrets,
            backend,
            ctx,
        }
    }

    pub async fn add_host(&self, name: &str, spec: HostDescriptor) -> ObjectKey {
        let key = key(name);
        self.store.apply_host(&key, spec).await.unwrap();
        key
    }

    pub async fn add_database(&self, name: &str, spec: DatabaseDescriptor) -> ObjectKey {
        let key = key(name);
        self.store.apply_database(&key, spec).await.unwrap();
        key
    }

    pub async fn add_user(&self, name: &str, spec: UserDescriptor) -> ObjectKey {
        let key = key(name);
        self.store.apply_user(&key, spec).await.unwrap();
        key
    }
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new("default", name)
}

/// `db.internal`, Postgres, principal `admin`, inline password.
pub fn example_host() -> HostDescriptor {
    HostDescriptor::new("db.internal", EngineKind::Postgres, "admin")
        .with_credential(Credential::inline("s3cret"))
}

/// Poll `check` until it holds. Under paused time the sleeps advance the
/// clock instantly.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}
