//! JSON manifest of desired-state records and the secrets they reference.
//!
//! ```json
//! {
//!   "hosts": [{
//!     "name": "main",
//!     "spec": {
//!       "host": "db.internal",
//!       "type": "postgres",
//!       "superuser": "admin",
//!       "passwordSecretRef": "db-admin"
//!     }
//!   }],
//!   "databases": [{ "name": "orders", "spec": { "name": "orders", "hostRef": "main" } }],
//!   "users": [{
//!     "name": "orders-app",
//!     "spec": {
//!       "databaseRef": "orders",
//!       "username": "app",
//!       "password": "...",
//!       "privileges": [{ "objectType": "TABLE", "privileges": ["SELECT"] }]
//!     }
//!   }],
//!   "secrets": [{ "name": "db-admin", "data": { "password": "..." } }]
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::secrets::StaticSecretStore;
use crate::store::{MemoryStore, StoreError};
use crate::types::{
    DatabaseDescriptor, HostDescriptor, ObjectKey, UserDescriptor, DEFAULT_NAMESPACE,
};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to apply manifest: {0}")]
    Store(#[from] StoreError),
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// One record of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<D> {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub spec: D,
}

impl<D> Entry<D> {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.data.keys().collect();
        keys.sort();
        f.debug_struct("SecretEntry")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("keys", &keys)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub hosts: Vec<Entry<HostDescriptor>>,
    #[serde(default)]
    pub databases: Vec<Entry<DatabaseDescriptor>>,
    #[serde(default)]
    pub users: Vec<Entry<UserDescriptor>>,
    #[serde(default)]
    pub secrets: Vec<SecretEntry>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ManifestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_str(&raw).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Seed `store` and `secrets` with the manifest's content. Secrets go in
    /// first so the records that reference them resolve on their first pass.
    pub async fn apply(
        &self,
        store: &MemoryStore,
        secrets: &StaticSecretStore,
    ) -> Result<(), ManifestError> {
        for secret in &self.secrets {
            secrets
                .insert(secret.namespace.clone(), secret.name.clone(), secret.data.clone())
                .await;
        }
        for entry in &self.hosts {
            store.apply_host(&entry.key(), entry.spec.clone()).await?;
        }
        for entry in &self.databases {
            store.apply_database(&entry.key(), entry.spec.clone()).await?;
        }
        for entry in &self.users {
            store.apply_user(&entry.key(), entry.spec.clone()).await?;
        }

        info!(
            "Manifest applied (hosts={}, databases={}, users={}, secrets={})",
            self.hosts.len(),
            self.databases.len(),
            self.users.len(),
            self.secrets.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretStore;
    use crate::store::{DatabaseStore, HostStore, UserStore};
    use crate::types::EngineKind;
    use std::io::Write;

    const MANIFEST: &str = r#"{
        "hosts": [{
            "name": "main",
            "spec": {
                "host": "db.internal",
                "type": "postgres",
                "superuser": "admin",
                "passwordSecretRef": "db-admin"
            }
        }],
        "databases": [{
            "name": "orders",
            "spec": { "name": "orders", "hostRef": "main" }
        }],
        "users": [{
            "namespace": "shop",
            "name": "orders-app",
            "spec": {
                "databaseRef": "orders",
                "username": "app",
                "password": "app-pw",
                "privileges": [{ "objectType": "TABLE", "privileges": ["SELECT", "INSERT"] }]
            }
        }],
        "secrets": [{ "name": "db-admin", "data": { "password": "s3cret" } }]
    }"#;

    #[tokio::test]
    async fn test_load_and_apply() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();

        let manifest = Manifest::load(file.path()).await.unwrap();
        assert_eq!(manifest.hosts[0].namespace, "default");
        assert_eq!(manifest.users[0].key(), ObjectKey::new("shop", "orders-app"));

        let store = MemoryStore::new();
        let secrets = StaticSecretStore::new();
        manifest.apply(&store, &secrets).await.unwrap();

        let host = store
            .get_host(&ObjectKey::new("default", "main"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(host.spec.engine, EngineKind::Postgres);
        assert_eq!(store.list_databases().await.unwrap().len(), 1);
        assert_eq!(store.list_users().await.unwrap()[0].spec.username, "app");
        assert_eq!(
            secrets
                .get_secret_value("default", "db-admin", "password")
                .await
                .unwrap(),
            "s3cret"
        );
    }

    #[tokio::test]
    async fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ \"hosts\": [ }").unwrap();

        let err = Manifest::load(file.path()).await.unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        assert!(serde_json::from_str::<Manifest>(r#"{ "roles": [] }"#).is_err());
        assert_eq!(serde_json::from_str::<Manifest>("{}").unwrap(), Manifest::default());
    }

    #[test]
    fn test_secret_debug_hides_values() {
        let entry = SecretEntry {
            namespace: "default".into(),
            name: "db-admin".into(),
            data: HashMap::from([("password".to_string(), "s3cret".to_string())]),
        };
        let rendered = format!("{:?}", entry);
        assert!(rendered.contains("password"));
        assert!(!rendered.contains("s3cret"));
    }
}
