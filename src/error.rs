//! SafeHook error types

use thiserror::Error;

/// SafeHook error type
#[derive(Error, Debug)]
pub enum Error {
    /// Endpoint or service configuration error (no attempt is made)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Compliance gate blocked the operation
    #[error("Compliance violation: {}", .0.join("; "))]
    ComplianceViolation(Vec<String>),

    /// Field encryption or decryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Signature could not be produced
    #[error("Signing error: {0}")]
    Signing(String),

    /// Outbound transmission failed (network, timeout or non-2xx)
    #[error("Transmission error: {0}")]
    Transmission(String),

    /// Retention sweep failed for a tenant
    #[error("Retention error: {0}")]
    Retention(String),

    /// Persistence collaborator error
    #[error("Store error: {0}")]
    Store(String),

    /// Key-management collaborator error
    #[error("Key management error: {0}")]
    KeyManagement(String),

    /// Secret-store collaborator error
    #[error("Secret store error: {0}")]
    SecretStore(String),

    /// Event-bus collaborator error
    #[error("Event bus error: {0}")]
    EventBus(String),

    /// A bounded external call did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for SafeHook operations
pub type Result<T> = std::result::Result<T, Error>;

/// Serialize a value to JSON, falling back to `null` on error
pub fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
