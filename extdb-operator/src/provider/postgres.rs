//! Postgres provider.
//!
//! Every call opens its own single-connection pool and closes it before
//! returning. A `CREATE` that loses a race against a concurrent pass is
//! treated as if the catalog check had found the object.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Executor;
use tracing::{debug, info, warn};

use super::sql::{self, CheckedGrant, Dialect, ObjectType};
use super::{
    bounded, connect_failure, deadline, rejected, ConnectionTarget, Provider, ProviderFactory,
};
use crate::error::{ConnectionError, ConnectionFailure, ProvisionError, ValidationError};
use crate::types::{DatabaseDescriptor, EngineKind, UserDescriptor};

/// Administrative database every connection check and CREATE DATABASE runs in.
pub const ADMIN_DATABASE: &str = "postgres";

/// Schema that `SCHEMA`, `TABLE`, `SEQUENCE` and `FUNCTION` grants apply to.
pub const DEFAULT_SCHEMA: &str = "public";

const CREATE_ROLE_SAVEPOINT: &str = "extdb_create_role";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresFactory;

impl ProviderFactory for PostgresFactory {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn build(&self, target: ConnectionTarget) -> Box<dyn Provider> {
        Box::new(PostgresProvider::new(target))
    }
}

#[derive(Debug)]
pub struct PostgresProvider {
    target: ConnectionTarget,
}

impl PostgresProvider {
    pub fn new(target: ConnectionTarget) -> Self {
        Self { target }
    }

    fn options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.target.address)
            .port(self.target.port)
            .username(&self.target.principal)
            .password(&self.target.password)
            .database(database)
            .ssl_mode(PgSslMode::Prefer)
    }

    /// Open a pool of one connection for a single call.
    async fn pool(&self, database: &str) -> Result<PgPool, ConnectionError> {
        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.target.connect_timeout)
            .connect_with(self.options(database))
            .await
            .map_err(|e| connect_failure(&self.target, e))
    }

    async fn close(&self, pool: PgPool) {
        if tokio::time::timeout(self.target.statement_timeout, pool.close())
            .await
            .is_err()
        {
            debug!(host = %self.target.address, "Closing connection pool timed out");
        }
    }

    async fn ensure_database(
        &self,
        pool: &PgPool,
        name: &str,
        statement: &str,
    ) -> Result<(), ProvisionError> {
        let timeout = self.target.statement_timeout;
        let existing = bounded(
            timeout,
            "database",
            name,
            pool.fetch_optional(
                sqlx::query("SELECT datname FROM pg_database WHERE datname = $1").bind(name),
            ),
        )
        .await?;
        if existing.is_some() {
            debug!(database = name, host = %self.target.address, "Database already exists");
            return Ok(());
        }

        info!(database = name, host = %self.target.address, "Creating database");
        if !create_object(timeout, "database", name, pool.execute(statement)).await? {
            debug!(database = name, host = %self.target.address, "Database created concurrently");
        }
        Ok(())
    }

    async fn ensure_user(
        &self,
        pool: &PgPool,
        username: &str,
        create: &str,
        grants: &[String],
    ) -> Result<(), ProvisionError> {
        let timeout = self.target.statement_timeout;
        let mut tx = bounded(timeout, "user", username, pool.begin()).await?;

        let existing = bounded(
            timeout,
            "user",
            username,
            (&mut *tx).fetch_optional(
                sqlx::query("SELECT rolname FROM pg_roles WHERE rolname = $1").bind(username),
            ),
        )
        .await?;
        if existing.is_none() {
            info!(user = username, host = %self.target.address, "Creating role");
            // A duplicate-role error would abort the transaction; the
            // savepoint keeps it usable for the grants
            let savepoint = format!("SAVEPOINT {}", CREATE_ROLE_SAVEPOINT);
            bounded(timeout, "user", username, (&mut *tx).execute(savepoint.as_str())).await?;
            let created =
                create_object(timeout, "user", username, (&mut *tx).execute(create)).await?;
            let release = if created {
                format!("RELEASE SAVEPOINT {}", CREATE_ROLE_SAVEPOINT)
            } else {
                debug!(user = username, host = %self.target.address, "Role created concurrently");
                format!("ROLLBACK TO SAVEPOINT {}", CREATE_ROLE_SAVEPOINT)
            };
            bounded(timeout, "user", username, (&mut *tx).execute(release.as_str())).await?;
        }
        for grant in grants {
            bounded(timeout, "user", username, (&mut *tx).execute(grant.as_str())).await?;
        }

        // Dropping an uncommitted transaction rolls it back
        bounded(timeout, "user", username, tx.commit()).await?;
        Ok(())
    }
}

/// Run a `CREATE` under the statement deadline. Returns `false` when the
/// object already existed.
async fn create_object<T, F>(
    timeout: Duration,
    kind: &'static str,
    object: &str,
    fut: F,
) -> Result<bool, ProvisionError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match deadline(timeout, kind, object, fut).await? {
        Ok(_) => Ok(true),
        Err(e) if already_exists(&e) => Ok(false),
        Err(e) => Err(rejected(kind, object, e)),
    }
}

/// Whether the server refused a `CREATE` because the object exists.
pub fn already_exists(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| is_duplicate_code(&code))
}

/// duplicate_database, duplicate_object, and unique_violation on a catalog
/// index when two sessions create the same name at once.
fn is_duplicate_code(code: &str) -> bool {
    matches!(code, "42P04" | "42710" | "23505")
}

#[async_trait]
impl Provider for PostgresProvider {
    async fn check_connection(&self) -> Result<(), ConnectionError> {
        let pool = self.pool(ADMIN_DATABASE).await?;
        let probe =
            tokio::time::timeout(self.target.statement_timeout, pool.execute("SELECT 1")).await;
        self.close(pool).await;

        match probe {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(self
                .target
                .connection_error(ConnectionFailure::Probe(e.to_string()))),
            Err(_) => Err(self
                .target
                .connection_error(ConnectionFailure::Timeout(self.target.statement_timeout))),
        }
    }

    async fn create_database(&self, desc: &DatabaseDescriptor) -> Result<(), ProvisionError> {
        let statement = create_database_statement(desc, &self.target.principal)?;

        let pool = self.pool(ADMIN_DATABASE).await?;
        let result = self.ensure_database(&pool, &desc.name, &statement).await;
        self.close(pool).await;
        result
    }

    async fn create_user(
        &self,
        database: &str,
        desc: &UserDescriptor,
        password: &str,
    ) -> Result<(), ProvisionError> {
        desc.validate()?;
        let database = sql::identifier("database name", database)?;
        let username = sql::identifier("username", &desc.username)?;
        let create = create_role_statement(username, password)?;
        let grants = desc
            .privileges
            .iter()
            .map(|grant| {
                sql::check_grant(Dialect::Postgres, grant)
                    .map(|checked| grant_statement(&checked, database, username))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if password.is_empty() {
            warn!(user = username, "Creating role without a password");
        }

        // Grants on schema objects resolve against the connected database
        let pool = self.pool(database).await?;
        let result = self.ensure_user(&pool, username, &create, &grants).await;
        self.close(pool).await;
        result
    }
}

/// `CREATE DATABASE` with owner, encoding and collation resolved against
/// the defaults. Every value is validated before it is quoted in.
pub fn create_database_statement(
    desc: &DatabaseDescriptor,
    default_owner: &str,
) -> Result<String, ValidationError> {
    let name = sql::identifier("database name", &desc.name)?;
    let owner = sql::identifier("owner", desc.owner_or(default_owner))?;
    let encoding = sql::encoding(desc.encoding())?;
    let collation = sql::collation(desc.collation())?;
    let collation = sql::pg_literal("collation", collation)?;

    Ok(format!(
        "CREATE DATABASE {} WITH OWNER {} ENCODING {} LC_COLLATE {} LC_CTYPE {}",
        sql::pg_ident(name),
        sql::pg_ident(owner),
        sql::pg_literal("encoding", encoding)?,
        collation,
        collation,
    ))
}

pub fn create_role_statement(username: &str, password: &str) -> Result<String, ValidationError> {
    let role = sql::pg_ident(username);
    if password.is_empty() {
        return Ok(format!("CREATE ROLE {} LOGIN", role));
    }
    Ok(format!(
        "CREATE ROLE {} LOGIN PASSWORD {}",
        role,
        sql::pg_literal("password", password)?
    ))
}

pub fn grant_statement(grant: &CheckedGrant, database: &str, username: &str) -> String {
    let schema = sql::pg_ident(DEFAULT_SCHEMA);
    let target = match grant.object_type {
        ObjectType::Database => format!("DATABASE {}", sql::pg_ident(database)),
        ObjectType::Schema => format!("SCHEMA {}", schema),
        ObjectType::Table => format!("ALL TABLES IN SCHEMA {}", schema),
        ObjectType::Sequence => format!("ALL SEQUENCES IN SCHEMA {}", schema),
        ObjectType::Function => format!("ALL FUNCTIONS IN SCHEMA {}", schema),
    };
    format!(
        "GRANT {} ON {} TO {}",
        grant.privilege_list(),
        target,
        sql::pg_ident(username)
    )
}
