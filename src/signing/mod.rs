//! Delivery signing
//!
//! Signatures are HMAC-SHA256 over `"{timestamp}.{body}"`, where `body` is
//! the exact serialized payload placed on the wire. The secret is fetched
//! from the secret store for every signature and dropped afterwards.
//!
//! A missing or unreachable secret never produces a made-up signature: the
//! outcome carries status `unsigned` (no secret configured) or `failed`
//! (lookup error) and the delivery proceeds with that status in its headers.

mod secrets;

pub use secrets::{EnvSecretStore, SecretStore, StaticSecretStore};

use crate::error::{Error, Result};
use crate::store::Store;
use ring::hmac;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Signature method advertised in headers
pub const SIGNATURE_METHOD: &str = "hmac-sha256";

/// Whether a signature accompanies a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Signed,
    /// No active secret is configured for the endpoint
    Unsigned,
    /// A secret is configured but could not be fetched in time
    Failed,
}

impl std::fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signed => write!(f, "signed"),
            Self::Unsigned => write!(f, "unsigned"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of signing one delivery body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureOutcome {
    pub method: String,
    /// Lowercase hex MAC; `None` unless `status` is `Signed`
    pub value: Option<String>,
    pub status: SignatureStatus,
    /// Why no signature was produced
    pub error: Option<String>,
}

impl SignatureOutcome {
    fn signed(value: String) -> Self {
        Self {
            method: SIGNATURE_METHOD.to_string(),
            value: Some(value),
            status: SignatureStatus::Signed,
            error: None,
        }
    }

    fn not_signed(status: SignatureStatus, error: impl Into<String>) -> Self {
        Self {
            method: SIGNATURE_METHOD.to_string(),
            value: None,
            status,
            error: Some(error.into()),
        }
    }
}

/// Signs delivery bodies with per-endpoint secrets
pub struct Signer {
    store: Arc<dyn Store>,
    secrets: Arc<dyn SecretStore>,
    timeout: Duration,
}

impl Signer {
    pub fn new(store: Arc<dyn Store>, secrets: Arc<dyn SecretStore>, timeout: Duration) -> Self {
        Self {
            store,
            secrets,
            timeout,
        }
    }

    /// Sign `body` for an endpoint. Never fails: problems are reported
    /// through the outcome status.
    pub async fn sign(&self, endpoint_id: Uuid, timestamp: i64, body: &str) -> SignatureOutcome {
        match self.try_sign(endpoint_id, timestamp, body).await {
            Ok(Some(value)) => SignatureOutcome::signed(value),
            Ok(None) => {
                tracing::debug!(endpoint_id = %endpoint_id, "No active signing secret");
                SignatureOutcome::not_signed(SignatureStatus::Unsigned, "no active signing secret")
            }
            Err(e) => {
                tracing::warn!(endpoint_id = %endpoint_id, error = %e, "Signing failed");
                SignatureOutcome::not_signed(SignatureStatus::Failed, e.to_string())
            }
        }
    }

    async fn try_sign(&self, endpoint_id: Uuid, timestamp: i64, body: &str) -> Result<Option<String>> {
        let lookup = async {
            let Some(secret_ref) = self.store.active_signing_secret(endpoint_id).await? else {
                return Ok(None);
            };
            if secret_ref.algorithm != SIGNATURE_METHOD {
                return Err(Error::Signing(format!(
                    "Unsupported signing algorithm '{}'",
                    secret_ref.algorithm
                )));
            }
            self.secrets.get_secret(&secret_ref.reference).await.map(Some)
        };

        let secret = tokio::time::timeout(self.timeout, lookup)
            .await
            .map_err(|_| Error::Signing(format!("Secret lookup exceeded {:?}", self.timeout)))?
            .map_err(|e| match e {
                Error::Signing(_) => e,
                other => Error::Signing(other.to_string()),
            })?;

        Ok(secret.map(|secret| compute_signature(&secret, timestamp, body)))
    }
}

/// HMAC-SHA256 over `"{timestamp}.{body}"`, hex encoded
pub fn compute_signature(secret: &[u8], timestamp: i64, body: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, &signed_message(timestamp, body));
    hex::encode(tag.as_ref())
}

/// Constant-time check of a received hex signature
pub fn verify_signature(secret: &[u8], timestamp: i64, body: &str, signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, &signed_message(timestamp, body), &expected).is_ok()
}

fn signed_message(timestamp: i64, body: &str) -> Vec<u8> {
    format!("{}.{}", timestamp, body).into_bytes()
}
