//! Secret-store collaborator
//!
//! Secrets are returned in `Zeroizing` buffers and dropped by the caller
//! after a single signing operation; nothing here caches them.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// Source of signing secrets, looked up by reference
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the secret value stored under `reference`
    async fn get_secret(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>>;
}

/// Reads secrets from environment variables.
///
/// A reference such as `webhooks/acme-prod` maps to
/// `SAFEHOOK_SECRET_WEBHOOKS_ACME_PROD`.
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

    /// Environment variable name for a reference
    pub fn var_name(&self, reference: &str) -> String {
        let suffix: String = reference
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::new("SAFEHOOK_SECRET_")
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>> {
        let var = self.var_name(reference);
        let value = std::env::var(&var)
            .map_err(|_| Error::SecretStore(format!("Secret '{}' not available", reference)))?;
        if value.is_empty() {
            return Err(Error::SecretStore(format!("Secret '{}' is empty", reference)));
        }
        Ok(Zeroizing::new(value.into_bytes()))
    }
}

/// In-memory secret store
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, reference: impl Into<String>, secret: impl Into<Vec<u8>>) {
        self.secrets
            .write()
            .await
            .insert(reference.into(), Zeroizing::new(secret.into()));
    }

    pub async fn remove(&self, reference: &str) {
        self.secrets.write().await.remove(reference);
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>> {
        self.secrets
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::SecretStore(format!("Secret '{}' not found", reference)))
    }
}
