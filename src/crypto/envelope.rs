//! Field-level envelope encryption
//!
//! One data key is generated per delivery and reused for every flagged
//! field of that delivery. Each field gets its own nonce, and its path is
//! bound as associated data so ciphertexts cannot be swapped between fields.
//!
//! ```text
//! payload ──► select flagged fields ──► serialize ──► AES-256-GCM(data key, path as AAD)
//!                                                        │
//!            ciphertext (base64) substituted in place ◄──┘
//!            {nonce, tag, original kind} recorded in the envelope
//! ```

use super::{decrypt_detached, encrypt_detached, DetachedCiphertext, KeyManagementService, NONCE_SIZE, TAG_SIZE};
use crate::config::EncryptionConfig;
use crate::error::{Error, Result};
use crate::payload::{get_mut, FieldPath, ValueKind};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroize;

/// The only algorithm this manager produces or accepts
pub const ENVELOPE_ALGORITHM: &str = "AES-256-GCM";

/// Allowed clock skew for envelopes stamped in the future
const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Per-field encryption metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEnvelope {
    /// Base64 nonce
    pub nonce: String,
    /// Base64 authentication tag
    pub tag: String,
    /// JSON kind of the plaintext value
    pub value_type: ValueKind,
}

/// Metadata needed to decrypt the fields of one delivery.
///
/// Holds the wrapped data key only; the plaintext key is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionEnvelope {
    pub key_id: String,
    /// Base64 data key wrapped by the key-management service
    pub wrapped_key: String,
    pub algorithm: String,
    /// Field path → metadata
    pub fields: BTreeMap<String, FieldEnvelope>,
    pub encrypted_at: DateTime<Utc>,
}

/// Compact wire form of an envelope for the delivery header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSummary {
    #[serde(rename = "kid")]
    pub key_id: String,
    #[serde(rename = "alg")]
    pub algorithm: String,
    #[serde(rename = "wk")]
    pub wrapped_key: String,
    /// Unix seconds
    #[serde(rename = "ts")]
    pub encrypted_at: i64,
    #[serde(rename = "f")]
    pub fields: BTreeMap<String, FieldEnvelope>,
}

impl EncryptionEnvelope {
    /// Paths of the encrypted fields
    pub fn field_paths(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Entries of `paths` that no encrypted field covers, either exactly or
    /// through an encrypted ancestor
    pub fn uncovered(&self, paths: &[String]) -> Vec<String> {
        let encrypted: Vec<FieldPath> = self
            .fields
            .keys()
            .filter_map(|p| FieldPath::parse(p))
            .collect();
        paths
            .iter()
            .filter(|p| match FieldPath::parse(p) {
                Some(path) => !encrypted.iter().any(|e| path.starts_with(e)),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> EnvelopeSummary {
        EnvelopeSummary {
            key_id: self.key_id.clone(),
            algorithm: self.algorithm.clone(),
            wrapped_key: self.wrapped_key.clone(),
            encrypted_at: self.encrypted_at.timestamp(),
            fields: self.fields.clone(),
        }
    }

    /// Base64 JSON summary carried in the `X-Encryption-Envelope` header
    pub fn to_header_value(&self) -> Result<String> {
        let json = serde_json::to_vec(&self.summary())?;
        Ok(STANDARD.encode(json))
    }
}

/// Encrypts and decrypts the sensitive fields of event payloads
pub struct EnvelopeEncryptionManager {
    kms: Arc<dyn KeyManagementService>,
    master_key_id: String,
    operation_timeout: Duration,
    freshness_window: chrono::Duration,
}

impl EnvelopeEncryptionManager {
    pub fn new(kms: Arc<dyn KeyManagementService>, config: &EncryptionConfig) -> Self {
        Self {
            kms,
            master_key_id: config.master_key_id.clone(),
            operation_timeout: config.operation_timeout(),
            freshness_window: config.freshness_window(),
        }
    }

    /// Encrypt the fields at `field_paths` in a copy of `payload`.
    ///
    /// A path nested under another flagged path is covered by its
    /// ancestor. A flagged path that does not resolve in the payload is an
    /// error, as is any other failure; there is no plaintext fallback.
    pub async fn encrypt(
        &self,
        payload: &Value,
        field_paths: &[String],
    ) -> Result<(Value, EncryptionEnvelope)> {
        let paths = outermost_paths(field_paths)?;

        let generated = self
            .bounded(
                "data key generation",
                self.kms.generate_data_key(&self.master_key_id),
            )
            .await?;

        let mut encrypted = payload.clone();
        let mut fields = BTreeMap::new();

        for path in &paths {
            let path_str = path.to_string();
            let slot = get_mut(&mut encrypted, path).ok_or_else(|| {
                Error::Encryption(format!("Flagged field not found in payload: {}", path_str))
            })?;

            let value_type = ValueKind::of(slot);
            let mut plaintext = serde_json::to_vec(slot)?;
            let sealed = encrypt_detached(generated.plaintext.as_bytes(), path_str.as_bytes(), &plaintext);
            plaintext.zeroize();
            let sealed = sealed?;

            *slot = Value::String(STANDARD.encode(&sealed.ciphertext));
            fields.insert(
                path_str,
                FieldEnvelope {
                    nonce: STANDARD.encode(sealed.nonce),
                    tag: STANDARD.encode(sealed.tag),
                    value_type,
                },
            );
        }

        let envelope = EncryptionEnvelope {
            key_id: generated.key_id.clone(),
            wrapped_key: STANDARD.encode(&generated.wrapped),
            algorithm: ENVELOPE_ALGORITHM.to_string(),
            fields,
            encrypted_at: Utc::now(),
        };
        drop(generated);

        tracing::debug!(
            key_id = %envelope.key_id,
            fields = envelope.fields.len(),
            "Encrypted sensitive fields"
        );

        Ok((encrypted, envelope))
    }

    /// Reverse [`encrypt`](Self::encrypt), restoring each field's original
    /// JSON kind.
    pub async fn decrypt(&self, envelope: &EncryptionEnvelope, encrypted: &Value) -> Result<Value> {
        let problems = structural_problems(envelope);
        if !problems.is_empty() {
            return Err(Error::Encryption(format!(
                "Invalid envelope: {}",
                problems.join("; ")
            )));
        }

        let wrapped = STANDARD
            .decode(&envelope.wrapped_key)
            .map_err(|e| Error::Encryption(format!("Wrapped key is not base64: {}", e)))?;
        let key = self
            .bounded("data key unwrap", self.kms.unwrap_data_key(&wrapped))
            .await?;

        let mut output = encrypted.clone();
        for (path_str, field) in &envelope.fields {
            let path = FieldPath::parse(path_str)
                .ok_or_else(|| Error::Encryption(format!("Invalid field path: {}", path_str)))?;
            let slot = get_mut(&mut output, &path)
                .ok_or_else(|| Error::Encryption(format!("Encrypted field missing: {}", path_str)))?;

            let ciphertext = slot
                .as_str()
                .and_then(|s| STANDARD.decode(s).ok())
                .ok_or_else(|| Error::Encryption(format!("Field {} is not ciphertext", path_str)))?;

            let sealed = DetachedCiphertext {
                nonce: decode_fixed::<NONCE_SIZE>(&field.nonce)
                    .ok_or_else(|| Error::Encryption(format!("Bad nonce for {}", path_str)))?,
                ciphertext,
                tag: decode_fixed::<TAG_SIZE>(&field.tag)
                    .ok_or_else(|| Error::Encryption(format!("Bad tag for {}", path_str)))?,
            };

            let mut plaintext = decrypt_detached(key.as_bytes(), path_str.as_bytes(), &sealed)?;
            let value: serde_json::Result<Value> = serde_json::from_slice(&plaintext);
            plaintext.zeroize();
            let value = value?;

            if ValueKind::of(&value) != field.value_type {
                return Err(Error::Encryption(format!(
                    "Field {} decrypted to {:?}, expected {:?}",
                    path_str,
                    ValueKind::of(&value),
                    field.value_type
                )));
            }
            *slot = value;
        }

        Ok(output)
    }

    /// Replace the given fields with masks for safe logging.
    ///
    /// Strings longer than four characters keep their last four; everything
    /// else becomes a fixed marker. Not a substitute for encryption.
    pub fn mask(payload: &Value, field_paths: &[String]) -> Value {
        let mut masked = payload.clone();
        for path in field_paths.iter().filter_map(|p| FieldPath::parse(p)) {
            if let Some(slot) = get_mut(&mut masked, &path) {
                *slot = mask_value(slot);
            }
        }
        masked
    }

    /// Structural and freshness check of an envelope
    pub fn validate(&self, envelope: &EncryptionEnvelope) -> Result<()> {
        self.validate_at(envelope, Utc::now())
    }

    /// [`validate`](Self::validate) against an explicit clock
    pub fn validate_at(&self, envelope: &EncryptionEnvelope, now: DateTime<Utc>) -> Result<()> {
        let mut problems = structural_problems(envelope);

        if let Some(oldest) = now.checked_sub_signed(self.freshness_window) {
            if envelope.encrypted_at < oldest {
                problems.push("envelope is older than the freshness window".to_string());
            }
        }
        if envelope.encrypted_at > now + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            problems.push("envelope timestamp is in the future".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Encryption(format!("Invalid envelope: {}", problems.join("; "))))
        }
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "{} exceeded {}ms",
                    operation,
                    self.operation_timeout.as_millis()
                ))
            })?
    }
}

/// Parse paths, dropping any path already covered by a flagged ancestor
fn outermost_paths(field_paths: &[String]) -> Result<Vec<FieldPath>> {
    let mut parsed = field_paths
        .iter()
        .map(|p| {
            FieldPath::parse(p).ok_or_else(|| Error::Encryption(format!("Invalid field path: {}", p)))
        })
        .collect::<Result<Vec<_>>>()?;
    parsed.sort_by_key(|p| p.segments().len());

    let mut selected: Vec<FieldPath> = Vec::new();
    for path in parsed {
        let covered = selected
            .iter()
            .any(|s| path.segments().starts_with(s.segments()));
        if !covered {
            selected.push(path);
        }
    }
    Ok(selected)
}

fn structural_problems(envelope: &EncryptionEnvelope) -> Vec<String> {
    let mut problems = Vec::new();

    if envelope.key_id.trim().is_empty() {
        problems.push("missing key id".to_string());
    }
    match STANDARD.decode(&envelope.wrapped_key) {
        Ok(bytes) if !bytes.is_empty() => {}
        _ => problems.push("wrapped key is empty or not base64".to_string()),
    }
    if envelope.algorithm != ENVELOPE_ALGORITHM {
        problems.push(format!("unsupported algorithm {}", envelope.algorithm));
    }
    for (path, field) in &envelope.fields {
        if decode_fixed::<NONCE_SIZE>(&field.nonce).is_none() {
            problems.push(format!("field {} has no valid nonce", path));
        }
        if decode_fixed::<TAG_SIZE>(&field.tag).is_none() {
            problems.push(format!("field {} has no valid tag", path));
        }
    }

    problems
}

fn decode_fixed<const N: usize>(encoded: &str) -> Option<[u8; N]> {
    STANDARD.decode(encoded).ok()?.try_into().ok()
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => {
            let count = s.chars().count();
            if count > 4 {
                let tail: String = s.chars().skip(count - 4).collect();
                Value::String(format!("{}{}", "*".repeat(count - 4), tail))
            } else {
                Value::String("****".to_string())
            }
        }
        _ => Value::String("[MASKED]".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DataKey, GeneratedDataKey, LocalKms};
    use async_trait::async_trait;
    use serde_json::json;

    fn manager() -> EnvelopeEncryptionManager {
        let config = EncryptionConfig::default();
        let kms = Arc::new(LocalKms::ephemeral(config.master_key_id.clone()));
        EnvelopeEncryptionManager::new(kms, &config)
    }

    struct FailingKms;

    #[async_trait]
    impl KeyManagementService for FailingKms {
        async fn generate_data_key(&self, _master_key_id: &str) -> Result<GeneratedDataKey> {
            Err(Error::KeyManagement("service unavailable".to_string()))
        }

        async fn unwrap_data_key(&self, _wrapped: &[u8]) -> Result<DataKey> {
            Err(Error::KeyManagement("service unavailable".to_string()))
        }
    }

    struct SlowKms;

    #[async_trait]
    impl KeyManagementService for SlowKms {
        async fn generate_data_key(&self, _master_key_id: &str) -> Result<GeneratedDataKey> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(Error::KeyManagement("unreachable".to_string()))
        }

        async fn unwrap_data_key(&self, _wrapped: &[u8]) -> Result<DataKey> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(Error::KeyManagement("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_types() {
        let manager = manager();
        let payload = json!({"ssn": "123-45-6789", "visits": 3});

        let (encrypted, envelope) = manager
            .encrypt(&payload, &["ssn".to_string()])
            .await
            .unwrap();

        assert_ne!(encrypted["ssn"], "123-45-6789");
        assert!(!encrypted.to_string().contains("123-45-6789"));
        assert_eq!(encrypted["visits"], json!(3));
        assert_eq!(envelope.fields["ssn"].value_type, ValueKind::String);

        let decrypted = manager.decrypt(&envelope, &encrypted).await.unwrap();
        assert_eq!(decrypted, payload);
        assert!(decrypted["visits"].is_u64());
    }

    #[tokio::test]
    async fn test_roundtrip_non_string_fields() {
        let manager = manager();
        let payload = json!({
            "patient": {"dob": "1980-01-01", "allergies": ["penicillin"], "weight": 72.5},
            "active": true,
            "notes": null
        });
        let fields = vec![
            "patient.allergies".to_string(),
            "patient.weight".to_string(),
            "active".to_string(),
            "notes".to_string(),
        ];

        let (encrypted, envelope) = manager.encrypt(&payload, &fields).await.unwrap();
        assert!(encrypted["active"].is_string());
        assert!(encrypted["patient"]["allergies"].is_string());
        assert_eq!(envelope.fields.len(), 4);

        let decrypted = manager.decrypt(&envelope, &encrypted).await.unwrap();
        assert_eq!(decrypted, payload);
    }

    #[tokio::test]
    async fn test_nested_paths_use_outermost() {
        let manager = manager();
        let payload = json!({"patient": {"name": "Jane", "mrn": "1234567"}});
        let fields = vec!["patient.name".to_string(), "patient".to_string()];

        let (encrypted, envelope) = manager.encrypt(&payload, &fields).await.unwrap();
        assert_eq!(envelope.field_paths(), vec!["patient".to_string()]);
        assert!(encrypted["patient"].is_string());
        assert_eq!(manager.decrypt(&envelope, &encrypted).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_uncovered_paths() {
        let manager = manager();
        let payload = json!({"patient": {"name": "Jane"}, "ssn": "123-45-6789"});
        let (_, envelope) = manager
            .encrypt(&payload, &["patient".to_string()])
            .await
            .unwrap();

        assert!(envelope.uncovered(&["patient.name".to_string()]).is_empty());
        assert_eq!(
            envelope.uncovered(&["patient.name".to_string(), "ssn".to_string()]),
            vec!["ssn".to_string()]
        );
        // Unparseable paths are never considered covered
        assert_eq!(envelope.uncovered(&["a..b".to_string()]).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_path_is_error() {
        let manager = manager();
        let result = manager.encrypt(&json!({"a": 1}), &["b".to_string()]).await;
        assert!(matches!(result, Err(Error::Encryption(_))));
    }

    #[tokio::test]
    async fn test_keys_containing_separators() {
        let manager = manager();
        let payload = json!({
            "patient.name": "Jane Doe",
            "meta": {"ssn.value": "123-45-6789", "codes[0]": "E11.9"}
        });
        let fields: Vec<String> = [
            FieldPath::root().key("patient.name"),
            FieldPath::root().key("meta").key("ssn.value"),
            FieldPath::root().key("meta").key("codes[0]"),
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        let (encrypted, envelope) = manager.encrypt(&payload, &fields).await.unwrap();
        assert_eq!(envelope.fields.len(), 3);
        let wire = encrypted.to_string();
        assert!(!wire.contains("Jane Doe"));
        assert!(!wire.contains("123-45-6789"));
        assert!(!wire.contains("E11.9"));

        assert_eq!(manager.decrypt(&envelope, &encrypted).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_key_generation_failure_is_error() {
        let config = EncryptionConfig::default();
        let manager = EnvelopeEncryptionManager::new(Arc::new(FailingKms), &config);
        let result = manager
            .encrypt(&json!({"ssn": "123-45-6789"}), &["ssn".to_string()])
            .await;
        assert!(matches!(result, Err(Error::KeyManagement(_))));
    }

    #[tokio::test]
    async fn test_kms_timeout() {
        let config = EncryptionConfig {
            operation_timeout_ms: 20,
            ..Default::default()
        };
        let manager = EnvelopeEncryptionManager::new(Arc::new(SlowKms), &config);
        let result = manager
            .encrypt(&json!({"ssn": "1"}), &["ssn".to_string()])
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_fails() {
        let manager = manager();
        let payload = json!({"ssn": "123-45-6789"});
        let (mut encrypted, envelope) = manager
            .encrypt(&payload, &["ssn".to_string()])
            .await
            .unwrap();
        encrypted["ssn"] = json!(STANDARD.encode(b"forged"));
        assert!(manager.decrypt(&envelope, &encrypted).await.is_err());
    }

    #[tokio::test]
    async fn test_validate() {
        let manager = manager();
        let (_, envelope) = manager
            .encrypt(&json!({"ssn": "1"}), &["ssn".to_string()])
            .await
            .unwrap();
        assert!(manager.validate(&envelope).is_ok());

        let mut stale = envelope.clone();
        stale.encrypted_at = Utc::now() - chrono::Duration::days(2);
        assert!(manager.validate(&stale).is_err());

        let mut wrong_alg = envelope.clone();
        wrong_alg.algorithm = "AES-128-CBC".to_string();
        assert!(manager.validate(&wrong_alg).is_err());

        let mut no_tag = envelope;
        no_tag.fields.get_mut("ssn").unwrap().tag = String::new();
        let err = manager.validate(&no_tag).unwrap_err();
        assert!(err.to_string().contains("no valid tag"));
    }

    #[tokio::test]
    async fn test_header_value_excludes_plaintext() {
        let manager = manager();
        let (_, envelope) = manager
            .encrypt(&json!({"ssn": "123-45-6789"}), &["ssn".to_string()])
            .await
            .unwrap();

        let header = envelope.to_header_value().unwrap();
        let decoded: EnvelopeSummary =
            serde_json::from_slice(&STANDARD.decode(header).unwrap()).unwrap();
        assert_eq!(decoded.key_id, envelope.key_id);
        assert_eq!(decoded.fields.len(), 1);
        assert_eq!(decoded.wrapped_key, envelope.wrapped_key);
    }

    #[test]
    fn test_mask() {
        let payload = json!({"ssn": "123-45-6789", "pin": "12", "age": 40, "x": null});
        let masked = EnvelopeEncryptionManager::mask(
            &payload,
            &["ssn".to_string(), "pin".to_string(), "age".to_string(), "x".to_string()],
        );
        assert_eq!(masked["ssn"], "*******6789");
        assert_eq!(masked["pin"], "****");
        assert_eq!(masked["age"], "[MASKED]");
        assert!(masked["x"].is_null());
    }

    #[test]
    fn test_invalid_path_rejected() {
        assert!(outermost_paths(&["a..b".to_string()]).is_err());
    }
}
