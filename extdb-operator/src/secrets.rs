//! Secret store contract and the stores shipped with the operator.
//!
//! A secret is addressed by `(namespace, name, key)`. Resolution failures are
//! surfaced by the reconcilers as connection errors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{Credential, CredentialSource};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("secret '{namespace}/{name}' not found")]
    NotFound { namespace: String, name: String },

    #[error("key '{key}' not found in secret '{namespace}/{name}'")]
    KeyNotFound {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("secret provider '{provider}' unavailable: {detail}")]
    Unavailable { provider: String, detail: String },
}

impl SecretError {
    fn is_not_found(&self) -> bool {
        matches!(
            self,
            SecretError::NotFound { .. } | SecretError::KeyNotFound { .. }
        )
    }
}

/// Resolves secret references to plaintext values.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String, SecretError>;

    fn provider_type(&self) -> &'static str;
}

/// Resolve a credential to its password. An empty credential resolves to an
/// empty password.
pub async fn resolve_credential(
    store: &dyn SecretStore,
    namespace: &str,
    credential: &Credential,
) -> Result<String, SecretError> {
    match credential.source() {
        CredentialSource::Inline(password) => Ok(password.to_string()),
        CredentialSource::Secret(selector) => {
            store
                .get_secret_value(namespace, &selector.name, &selector.key)
                .await
        }
        CredentialSource::Empty => Ok(String::new()),
    }
}

// =============================================================================
// In-process store
// =============================================================================

/// Secrets held in memory, typically loaded from a manifest.
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    secrets: RwLock<HashMap<(String, String), HashMap<String, String>>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a whole secret.
    pub async fn insert(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        data: HashMap<String, String>,
    ) {
        self.secrets
            .write()
            .await
            .insert((namespace.into(), name.into()), data);
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String, SecretError> {
        let secrets = self.secrets.read().await;
        let data = secrets
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| SecretError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        data.get(key).cloned().ok_or_else(|| SecretError::KeyNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        })
    }

    fn provider_type(&self) -> &'static str {
        "static"
    }
}

// =============================================================================
// Environment store
// =============================================================================

/// Reads `<PREFIX>_<NAMESPACE>_<NAME>_<KEY>`, uppercased, with every
/// character outside `[A-Z0-9]` replaced by `_`.
#[derive(Debug, Clone)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn var_name(&self, namespace: &str, name: &str, key: &str) -> String {
        [self.prefix.as_str(), namespace, name, key]
            .iter()
            .map(|part| {
                part.chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() {
                            c.to_ascii_uppercase()
                        } else {
                            '_'
                        }
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String, SecretError> {
        let var = self.var_name(namespace, name, key);
        match std::env::var(&var) {
            Ok(value) if !value.is_empty() => {
                debug!(env_var = %var, "Secret loaded from environment variable");
                Ok(value)
            }
            // Empty value treated as not found
            _ => Err(SecretError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn provider_type(&self) -> &'static str {
        "env"
    }
}

// =============================================================================
// Layering
// =============================================================================

/// Tries each store in order; the first hit wins. Errors other than
/// "not found" stop the lookup.
pub struct LayeredSecretStore {
    layers: Vec<Arc<dyn SecretStore>>,
}

impl LayeredSecretStore {
    pub fn new(layers: Vec<Arc<dyn SecretStore>>) -> Self {
        Self { layers }
    }
}

#[async_trait]
impl SecretStore for LayeredSecretStore {
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String, SecretError> {
        let mut last = SecretError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        for layer in &self.layers {
            match layer.get_secret_value(namespace, name, key).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_not_found() => last = err,
                Err(err) => return Err(err),
            }
        }
        Err(last)
    }

    fn provider_type(&self) -> &'static str {
        "layered"
    }
}
