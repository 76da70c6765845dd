//! MySQL provider.
//!
//! MySQL DDL commits implicitly, so user creation and grants cannot share a
//! transaction. A grant that fails after the user was created is reported as
//! [`ProvisionError::PartialGrant`]; the next pass re-applies every grant.
//! Both `CREATE` statements carry `IF NOT EXISTS`, so a concurrent pass that
//! wins the race leaves nothing to report.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::Executor;
use tracing::{debug, info};

use super::sql::{self, CheckedGrant, Dialect};
use super::{bounded, connect_failure, ConnectionTarget, Provider, ProviderFactory};
use crate::error::{ConnectionError, ConnectionFailure, ProvisionError, ValidationError};
use crate::types::{DatabaseDescriptor, EngineKind, UserDescriptor};

/// Host part of every account the provider creates.
pub const ACCOUNT_HOST: &str = "%";

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlFactory;

impl ProviderFactory for MysqlFactory {
    fn engine(&self) -> EngineKind {
        EngineKind::Mysql
    }

    fn build(&self, target: ConnectionTarget) -> Box<dyn Provider> {
        Box::new(MysqlProvider::new(target))
    }
}

#[derive(Debug)]
pub struct MysqlProvider {
    target: ConnectionTarget,
}

impl MysqlProvider {
    pub fn new(target: ConnectionTarget) -> Self {
        Self { target }
    }

    /// Open a pool of one connection for a single call.
    async fn pool(&self) -> Result<MySqlPool, ConnectionError> {
        let options = MySqlConnectOptions::new()
            .host(&self.target.address)
            .port(self.target.port)
            .username(&self.target.principal)
            .password(&self.target.password)
            .ssl_mode(MySqlSslMode::Preferred);
        MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.target.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| connect_failure(&self.target, e))
    }

    async fn close(&self, pool: MySqlPool) {
        if tokio::time::timeout(self.target.statement_timeout, pool.close())
            .await
            .is_err()
        {
            debug!(host = %self.target.address, "Closing connection pool timed out");
        }
    }

    async fn ensure_database(
        &self,
        pool: &MySqlPool,
        name: &str,
        statement: &str,
    ) -> Result<(), ProvisionError> {
        let timeout = self.target.statement_timeout;
        let existing = bounded(
            timeout,
            "database",
            name,
            pool.fetch_optional(
                sqlx::query(
                    "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
                )
                .bind(name),
            ),
        )
        .await?;
        if existing.is_some() {
            debug!(database = name, host = %self.target.address, "Database already exists");
            return Ok(());
        }

        info!(database = name, host = %self.target.address, "Creating database");
        bounded(timeout, "database", name, pool.execute(statement)).await?;
        Ok(())
    }

    async fn ensure_user(
        &self,
        pool: &MySqlPool,
        username: &str,
        create: &str,
        grants: &[String],
    ) -> Result<(), ProvisionError> {
        let timeout = self.target.statement_timeout;
        let existing = bounded(
            timeout,
            "user",
            username,
            pool.fetch_optional(
                sqlx::query("SELECT User FROM mysql.user WHERE User = ? AND Host = ?")
                    .bind(username)
                    .bind(ACCOUNT_HOST),
            ),
        )
        .await?;

        let created = existing.is_none();
        if created {
            info!(user = username, host = %self.target.address, "Creating user");
            bounded(timeout, "user", username, pool.execute(create)).await?;
        }

        for grant in grants {
            let applied = bounded(timeout, "user", username, pool.execute(grant.as_str())).await;
            match applied {
                Ok(_) => {}
                Err(e) if created => {
                    return Err(ProvisionError::PartialGrant {
                        user: username.to_string(),
                        cause: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MysqlProvider {
    async fn check_connection(&self) -> Result<(), ConnectionError> {
        let pool = self.pool().await?;
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
        let statement = create_database_statement(desc)?;

        let pool = self.pool().await?;
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
        let create = create_user_statement(username, password)?;
        let grants = desc
            .privileges
            .iter()
            .map(|grant| {
                sql::check_grant(Dialect::Mysql, grant)
                    .map(|checked| grant_statement(&checked, database, username))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pool = self.pool().await?;
        let result = self.ensure_user(&pool, username, &create, &grants).await;
        self.close(pool).await;
        result
    }
}

/// MySQL spells the Postgres `UTF8` family `utf8mb4`.
fn charset(encoding: &str) -> String {
    match encoding.to_ascii_uppercase().as_str() {
        "UTF8" | "UTF-8" | "UTF8MB4" => "utf8mb4".to_string(),
        _ => encoding.to_ascii_lowercase(),
    }
}

/// `CREATE DATABASE` with a character set. Owner has no MySQL equivalent and
/// is ignored. libc locale names (`en_US.UTF-8`) are not MySQL collations,
/// so those leave the server's default collation for the charset.
pub fn create_database_statement(desc: &DatabaseDescriptor) -> Result<String, ValidationError> {
    let name = sql::identifier("database name", &desc.name)?;
    let charset = charset(sql::encoding(desc.encoding())?);
    let collation = sql::collation(desc.collation())?;

    let mut statement = format!(
        "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET {}",
        sql::mysql_ident(name),
        sql::mysql_literal("encoding", &charset)?
    );
    if !collation.contains('.') {
        statement.push_str(" COLLATE ");
        statement.push_str(&sql::mysql_literal("collation", collation)?);
    }
    Ok(statement)
}

fn account(username: &str) -> String {
    format!("'{}'@'{}'", username, ACCOUNT_HOST)
}

/// `username` must already have passed [`sql::identifier`].
pub fn create_user_statement(username: &str, password: &str) -> Result<String, ValidationError> {
    Ok(format!(
        "CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}",
        account(username),
        sql::mysql_literal("password", password)?
    ))
}

/// `DATABASE` and `TABLE` grants both apply to every table of the database.
pub fn grant_statement(grant: &CheckedGrant, database: &str, username: &str) -> String {
    format!(
        "GRANT {} ON {}.* TO {}",
        grant.privilege_list(),
        sql::mysql_ident(database),
        account(username)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Grant;

    #[test]
    fn test_create_database_defaults() {
        let desc = DatabaseDescriptor::new("orders", "main");
        assert_eq!(
            create_database_statement(&desc).unwrap(),
            "CREATE DATABASE IF NOT EXISTS `orders` CHARACTER SET 'utf8mb4'"
        );
    }

    #[test]
    fn test_create_database_with_collation() {
        let mut desc = DatabaseDescriptor::new("orders", "main");
        desc.encoding = Some("latin1".into());
        desc.collation = Some("latin1_swedish_ci".into());
        assert_eq!(
            create_database_statement(&desc).unwrap(),
            "CREATE DATABASE IF NOT EXISTS `orders` CHARACTER SET 'latin1' \
             COLLATE 'latin1_swedish_ci'"
        );
    }

    #[test]
    fn test_user_statements() {
        assert_eq!(
            create_user_statement("app", "a\\b'c").unwrap(),
            "CREATE USER IF NOT EXISTS 'app'@'%' IDENTIFIED BY 'a\\\\b''c'"
        );

        let grant =
            sql::check_grant(Dialect::Mysql, &Grant::new("TABLE", &["select", "insert"])).unwrap();
        assert_eq!(
            grant_statement(&grant, "orders", "app"),
            "GRANT SELECT, INSERT ON `orders`.* TO 'app'@'%'"
        );
    }

    #[test]
    fn test_rejects_nul_in_password() {
        assert!(matches!(
            create_user_statement("app", "bad\0pw"),
            Err(ValidationError::NulByte { .. })
        ));
    }
}
