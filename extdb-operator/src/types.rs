//! Desired-state records and the observed status attached to them.
//!
//! Field names follow the declarative record format (camelCase), so records
//! can be loaded straight from a manifest or another desired-state store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Namespace used when a record does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default character encoding for new databases.
pub const DEFAULT_ENCODING: &str = "UTF8";

/// Default collation (and ctype) for new databases.
pub const DEFAULT_COLLATION: &str = "en_US.UTF-8";

/// Secret key read when a secret reference names no key.
pub const DEFAULT_SECRET_KEY: &str = "password";

// =============================================================================
// Record identity and metadata
// =============================================================================

/// Identity of a record in the desired-state store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Store-managed metadata of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Cleanup owed before the record may be purged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Set when deletion was requested but the record is not purged yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Bumped whenever `spec` changes.
    #[serde(default)]
    pub generation: u64,
    /// Bumped on every write.
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    pub fn new(key: &ObjectKey) -> Self {
        Self {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// A desired-state record: metadata, declared spec and observed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<D, S> {
    pub meta: ObjectMeta,
    pub spec: D,
    #[serde(default)]
    pub status: S,
}

impl<D, S: Default> Record<D, S> {
    pub fn new(key: &ObjectKey, spec: D) -> Self {
        Self {
            meta: ObjectMeta::new(key),
            spec,
            status: S::default(),
        }
    }
}

pub type HostRecord = Record<HostDescriptor, HostStatus>;
pub type DatabaseRecord = Record<DatabaseDescriptor, DatabaseStatus>;
pub type UserRecord = Record<UserDescriptor, UserStatus>;

// =============================================================================
// Engines and credentials
// =============================================================================

/// Database engine running on a host.
///
/// Unknown engine names are kept verbatim so they can be reported as
/// unsupported instead of failing to load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EngineKind {
    Postgres,
    Mysql,
    Other(String),
}

impl EngineKind {
    pub fn as_str(&self) -> &str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::Mysql => "mysql",
            EngineKind::Other(name) => name,
        }
    }

    /// Well-known port of the engine, if it has one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            EngineKind::Postgres => Some(5432),
            EngineKind::Mysql => Some(3306),
            EngineKind::Other(_) => None,
        }
    }
}

impl From<String> for EngineKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "postgres" => EngineKind::Postgres,
            "mysql" => EngineKind::Mysql,
            _ => EngineKind::Other(value),
        }
    }
}

impl From<&str> for EngineKind {
    fn from(value: &str) -> Self {
        EngineKind::from(value.to_string())
    }
}

impl From<EngineKind> for String {
    fn from(value: EngineKind) -> Self {
        match value {
            EngineKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one key of a secret in the record's namespace.
///
/// Accepts either a bare secret name or `{ name, key }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SelectorRepr")]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

impl SecretKeySelector {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default = "default_secret_key")]
        key: String,
    },
}

impl From<SelectorRepr> for SecretKeySelector {
    fn from(repr: SelectorRepr) -> Self {
        match repr {
            SelectorRepr::Name(name) => SecretKeySelector::new(name, DEFAULT_SECRET_KEY),
            SelectorRepr::Full { name, key } => SecretKeySelector { name, key },
        }
    }
}

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

/// Password given inline or by reference to a secret store entry.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret_ref: Option<SecretKeySelector>,
}

/// Where a credential's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource<'a> {
    Inline(&'a str),
    Secret(&'a SecretKeySelector),
    Empty,
}

impl Credential {
    pub fn inline(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            password_secret_ref: None,
        }
    }

    pub fn secret_ref(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            password: None,
            password_secret_ref: Some(SecretKeySelector::new(name, key)),
        }
    }

    pub fn source(&self) -> CredentialSource<'_> {
        match (&self.password_secret_ref, &self.password) {
            (Some(selector), _) => CredentialSource::Secret(selector),
            (None, Some(password)) => CredentialSource::Inline(password),
            (None, None) => CredentialSource::Empty,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.password.is_some() && self.password_secret_ref.is_some() {
            return Err(ValidationError::ConflictingCredentials);
        }
        if let Some(selector) = &self.password_secret_ref {
            if selector.name.is_empty() {
                return Err(ValidationError::Empty {
                    what: "passwordSecretRef name",
                });
            }
            if selector.key.is_empty() {
                return Err(ValidationError::Empty {
                    what: "passwordSecretRef key",
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("password_secret_ref", &self.password_secret_ref)
            .finish()
    }
}

// =============================================================================
// Host
// =============================================================================

/// One database server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDescriptor {
    /// Hostname or IP address.
    #[serde(alias = "host")]
    pub address: String,
    #[serde(alias = "type")]
    pub engine: EngineKind,
    /// Administrative principal used for every operation on the host.
    #[serde(alias = "superuser")]
    pub principal: String,
    #[serde(flatten)]
    pub credential: Credential,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl HostDescriptor {
    pub fn new(
        address: impl Into<String>,
        engine: EngineKind,
        principal: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            engine,
            principal: principal.into(),
            credential: Credential::default(),
            port: None,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Declared port, or the engine's well-known port when unset or zero.
    pub fn effective_port(&self) -> Option<u16> {
        match self.port {
            Some(port) if port != 0 => Some(port),
            _ => self.engine.default_port(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.address.is_empty() {
            return Err(ValidationError::Empty { what: "host address" });
        }
        if self.principal.is_empty() {
            return Err(ValidationError::Empty { what: "host principal" });
        }
        self.credential.validate()
    }
}

/// Observed state of a host, written by the host verifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    /// Last time a connection check succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connection_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub connection_status: String,
}

// =============================================================================
// Database
// =============================================================================

/// Desired state of one logical database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDescriptor {
    /// Name of the database on the host.
    pub name: String,
    /// Name of a host record in the same namespace.
    #[serde(default, alias = "databaseHostRef")]
    pub host_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, alias = "charset", skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
}

impl DatabaseDescriptor {
    pub fn new(name: impl Into<String>, host_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host_ref: host_ref.into(),
            owner: None,
            encoding: None,
            collation: None,
        }
    }

    /// Declared owner, or `fallback` (the host's principal).
    pub fn owner_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        non_empty(&self.owner).unwrap_or(fallback)
    }

    pub fn encoding(&self) -> &str {
        non_empty(&self.encoding).unwrap_or(DEFAULT_ENCODING)
    }

    pub fn collation(&self) -> &str {
        non_empty(&self.collation).unwrap_or(DEFAULT_COLLATION)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Observed state of a database, written by the convergence engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    #[serde(default)]
    pub creation_status: String,
    /// Last time the database was confirmed to exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_creation_time: Option<DateTime<Utc>>,
}

// =============================================================================
// User
// =============================================================================

/// Privileges granted on one kind of object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    /// e.g. `DATABASE`, `TABLE`.
    pub object_type: String,
    /// e.g. `SELECT`, `INSERT`.
    pub privileges: Vec<String>,
}

impl Grant {
    pub fn new(object_type: impl Into<String>, privileges: &[&str]) -> Self {
        Self {
            object_type: object_type.into(),
            privileges: privileges.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Desired state of a principal scoped to one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDescriptor {
    /// Name of a database record in the same namespace.
    #[serde(default)]
    pub database_ref: String,
    pub username: String,
    #[serde(flatten)]
    pub credential: Credential,
    #[serde(default)]
    pub privileges: Vec<Grant>,
}

impl UserDescriptor {
    pub fn new(database_ref: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            database_ref: database_ref.into(),
            username: username.into(),
            credential: Credential::default(),
            privileges: Vec::new(),
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.privileges.push(grant);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.username.is_empty() {
            return Err(ValidationError::Empty { what: "username" });
        }
        if self.privileges.is_empty() {
            return Err(ValidationError::NoGrants);
        }
        for grant in &self.privileges {
            if grant.privileges.is_empty() {
                return Err(ValidationError::EmptyGrant {
                    object_type: grant.object_type.clone(),
                });
            }
        }
        self.credential.validate()
    }
}

/// Observed state of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    #[serde(default)]
    pub reconcile_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_keeps_unknown_names() {
        let engine: EngineKind = serde_json::from_str("\"oracle\"").unwrap();
        assert_eq!(engine, EngineKind::Other("oracle".to_string()));
        assert_eq!(engine.to_string(), "oracle");

        let engine: EngineKind = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(engine, EngineKind::Postgres);
        assert_eq!(serde_json::to_string(&EngineKind::Mysql).unwrap(), "\"mysql\"");
    }

    #[test]
    fn test_host_descriptor_accepts_record_field_names() {
        let json = r#"{
            "host": "db.internal",
            "type": "postgres",
            "superuser": "admin",
            "passwordSecretRef": "db-admin"
        }"#;
        let host: HostDescriptor = serde_json::from_str(json).unwrap();

        assert_eq!(host.address, "db.internal");
        assert_eq!(host.engine, EngineKind::Postgres);
        assert_eq!(host.principal, "admin");
        assert_eq!(host.effective_port(), Some(5432));
        assert_eq!(
            host.credential.source(),
            CredentialSource::Secret(&SecretKeySelector::new("db-admin", "password"))
        );
    }

    #[test]
    fn test_host_validation() {
        let host = HostDescriptor::new("db.internal", EngineKind::Postgres, "admin");
        assert!(host.validate().is_ok());

        let no_address = HostDescriptor::new("", EngineKind::Postgres, "admin");
        assert!(no_address.validate().is_err());

        let both = host.clone().with_credential(Credential {
            password: Some("x".into()),
            password_secret_ref: Some(SecretKeySelector::new("s", "k")),
        });
        assert_eq!(both.validate(), Err(ValidationError::ConflictingCredentials));
    }

    #[test]
    fn test_zero_port_falls_back_to_engine_default() {
        let host = HostDescriptor::new("db", EngineKind::Mysql, "root").with_port(0);
        assert_eq!(host.effective_port(), Some(3306));
        let host = host.with_port(3307);
        assert_eq!(host.effective_port(), Some(3307));
    }

    #[test]
    fn test_database_defaults() {
        let mut db = DatabaseDescriptor::new("orders", "main");
        assert_eq!(db.owner_or("admin"), "admin");
        assert_eq!(db.encoding(), "UTF8");
        assert_eq!(db.collation(), "en_US.UTF-8");

        db.owner = Some(String::new());
        assert_eq!(db.owner_or("admin"), "admin");

        db.owner = Some("app".into());
        db.encoding = Some("LATIN1".into());
        assert_eq!(db.owner_or("admin"), "app");
        assert_eq!(db.encoding(), "LATIN1");
    }

    #[test]
    fn test_user_validation() {
        let user = UserDescriptor::new("orders", "app");
        assert_eq!(user.validate(), Err(ValidationError::NoGrants));

        let user = user.with_grant(Grant::new("TABLE", &[]));
        assert!(matches!(
            user.validate(),
            Err(ValidationError::EmptyGrant { .. })
        ));

        let user = UserDescriptor::new("orders", "app")
            .with_grant(Grant::new("TABLE", &["SELECT", "INSERT"]));
        assert!(user.validate().is_ok());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::inline("hunter2");
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }
}
