//! Cryptographic primitives for field-level envelope encryption
//!
//! Provides AES-256-GCM helpers, the key-management collaborator and the
//! envelope manager that encrypts only the sensitive fields of a payload.

mod envelope;
mod kms;

pub use envelope::{
    EncryptionEnvelope, EnvelopeEncryptionManager, EnvelopeSummary, FieldEnvelope,
    ENVELOPE_ALGORITHM,
};
pub use kms::{DataKey, GeneratedDataKey, KeyManagementService, LocalKms};

use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use rand::RngCore;

/// AES-256-GCM encryption key size
pub const KEY_SIZE: usize = 32;

/// Nonce size for AES-GCM
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for AES-GCM
pub const TAG_SIZE: usize = 16;

/// Ciphertext with its nonce and tag kept apart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedCiphertext {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

/// Encrypt data using AES-256-GCM; the nonce is prepended to the output
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::Encryption(format!("Failed to create cipher: {}", e)))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::Encryption(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt nonce-prefixed AES-256-GCM data
pub fn decrypt(key: &[u8; KEY_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE {
        return Err(Error::Encryption("Ciphertext too short".to_string()));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::Encryption(format!("Failed to create cipher: {}", e)))?;

    let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
    let encrypted = &ciphertext[NONCE_SIZE..];

    cipher
        .decrypt(nonce, encrypted)
        .map_err(|e| Error::Encryption(format!("Decryption failed: {}", e)))
}

/// Encrypt with a fresh nonce, returning nonce, ciphertext and tag separately.
///
/// `aad` is authenticated but not encrypted.
pub fn encrypt_detached(
    key: &[u8; KEY_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<DetachedCiphertext> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::Encryption(format!("Failed to create cipher: {}", e)))?;

    let nonce = generate_nonce();
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut buffer)
        .map_err(|e| Error::Encryption(format!("Encryption failed: {}", e)))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(DetachedCiphertext {
        nonce,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypt a [`DetachedCiphertext`] produced with the same key and `aad`
pub fn decrypt_detached(
    key: &[u8; KEY_SIZE],
    aad: &[u8],
    sealed: &DetachedCiphertext,
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::Encryption(format!("Failed to create cipher: {}", e)))?;

    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&sealed.nonce),
            aad,
            &mut buffer,
            Tag::from_slice(&sealed.tag),
        )
        .map_err(|e| Error::Encryption(format!("Decryption failed: {}", e)))?;

    Ok(buffer)
}

/// Generate a random encryption key
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
