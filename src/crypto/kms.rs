//! Key-management collaborator
//!
//! Data keys are generated per delivery and only ever leave this module
//! wrapped under a master key. Plaintext keys live in [`DataKey`], which is
//! zeroized on drop.

use super::{decrypt, encrypt, generate_key, KEY_SIZE};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Plaintext 256-bit data key.
///
/// Zeroized on drop so key material does not linger in memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; KEY_SIZE]);

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Access the raw bytes (for cipher construction only)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// A freshly generated data key in both forms
pub struct GeneratedDataKey {
    /// Identifier of the master key that wrapped `wrapped`
    pub key_id: String,
    pub plaintext: DataKey,
    pub wrapped: Vec<u8>,
}

/// External key-management service.
///
/// Implementations make network calls and may fail or stall; callers bound
/// every call with a timeout.
#[async_trait]
pub trait KeyManagementService: Send + Sync {
    /// Generate a new data key wrapped under `master_key_id`
    async fn generate_data_key(&self, master_key_id: &str) -> Result<GeneratedDataKey>;

    /// Recover the plaintext of a wrapped data key
    async fn unwrap_data_key(&self, wrapped: &[u8]) -> Result<DataKey>;
}

/// In-process key-management service wrapping data keys with AES-256-GCM.
///
/// Intended for development and tests; production deployments plug in a
/// network KMS behind the same trait.
pub struct LocalKms {
    key_id: String,
    master_key: DataKey,
}

impl LocalKms {
    pub fn new(key_id: impl Into<String>, master_key: [u8; KEY_SIZE]) -> Self {
        Self {
            key_id: key_id.into(),
            master_key: DataKey::from_bytes(master_key),
        }
    }

    /// Random master key; wrapped keys do not survive a restart
    pub fn ephemeral(key_id: impl Into<String>) -> Self {
        Self::new(key_id, generate_key())
    }

    /// Load the master key from an environment variable holding 32 bytes
    /// as hex (64 chars) or standard base64.
    pub fn from_env(key_id: impl Into<String>, var: &str) -> Result<Self> {
        let raw = std::env::var(var)
            .map_err(|_| Error::KeyManagement(format!("Master key variable {} is not set", var)))?;
        let bytes = parse_key_material(raw.trim())
            .ok_or_else(|| Error::KeyManagement(format!("{} must hold 32 bytes (hex or base64)", var)))?;
        Ok(Self::new(key_id, bytes))
    }
}

fn parse_key_material(raw: &str) -> Option<[u8; KEY_SIZE]> {
    let decoded = if raw.len() == KEY_SIZE * 2 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(raw).ok()?
    } else {
        STANDARD.decode(raw).ok()?
    };
    decoded.try_into().ok()
}

#[async_trait]
impl KeyManagementService for LocalKms {
    async fn generate_data_key(&self, master_key_id: &str) -> Result<GeneratedDataKey> {
        if master_key_id != self.key_id {
            return Err(Error::KeyManagement(format!(
                "Unknown master key: {}",
                master_key_id
            )));
        }

        let plaintext = DataKey::from_bytes(generate_key());
        let wrapped = encrypt(self.master_key.as_bytes(), plaintext.as_bytes())
            .map_err(|e| Error::KeyManagement(format!("Failed to wrap data key: {}", e)))?;

        Ok(GeneratedDataKey {
            key_id: self.key_id.clone(),
            plaintext,
            wrapped,
        })
    }

    async fn unwrap_data_key(&self, wrapped: &[u8]) -> Result<DataKey> {
        let mut bytes = decrypt(self.master_key.as_bytes(), wrapped)
            .map_err(|e| Error::KeyManagement(format!("Failed to unwrap data key: {}", e)))?;

        let result = <[u8; KEY_SIZE]>::try_from(bytes.as_slice())
            .map(DataKey::from_bytes)
            .map_err(|_| Error::KeyManagement("Unwrapped key has wrong length".to_string()));
        bytes.zeroize();
        result
    }
}
