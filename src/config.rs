//! SafeHook configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main SafeHook configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafeHookConfig {
    /// Audit query API
    #[serde(default)]
    pub api: ApiConfig,

    /// Outbound delivery
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Field-level envelope encryption
    #[serde(default)]
    pub encryption: EncryptionConfig,

    /// Payload signing
    #[serde(default)]
    pub signing: SigningConfig,

    /// Compliance gate
    #[serde(default)]
    pub compliance: ComplianceConfig,

    /// Retention sweep
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Event bus publication
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// Record persistence
    #[serde(default)]
    pub store: StoreConfig,
}

impl SafeHookConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.delivery.max_concurrency == 0 {
            return Err(Error::Config("delivery.max_concurrency must be > 0".to_string()));
        }
        if self.event_bus.batch_size == 0 || self.event_bus.batch_size > MAX_EVENT_BUS_BATCH {
            return Err(Error::Config(format!(
                "event_bus.batch_size must be between 1 and {}",
                MAX_EVENT_BUS_BATCH
            )));
        }
        if self.encryption.freshness_window_secs == 0
            || self.encryption.freshness_window_secs > MAX_FRESHNESS_WINDOW_SECS
        {
            return Err(Error::Config(format!(
                "encryption.freshness_window_secs must be between 1 and {}",
                MAX_FRESHNESS_WINDOW_SECS
            )));
        }
        if self.encryption.master_key_id.is_empty() {
            return Err(Error::Config("encryption.master_key_id is required".to_string()));
        }
        Ok(())
    }
}

/// Audit API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18791,
        }
    }
}

/// Delivery executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum bytes of response body kept on a delivery
    pub response_body_limit: usize,

    /// Concurrent pipelines per routed event
    pub max_concurrency: usize,

    /// Extra time beyond the endpoint timeout before an attempt is
    /// abandoned and recorded failed
    pub grace_period_ms: u64,

    /// User-Agent sent with every delivery
    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            response_body_limit: 1000,
            max_concurrency: 8,
            grace_period_ms: 2000,
            user_agent: format!("safehook/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DeliveryConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Envelope encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Master key identifier passed to the key-management service
    pub master_key_id: String,

    /// Environment variable holding the local master key (hex or base64)
    pub master_key_env: String,

    /// Maximum envelope age accepted by validation, in seconds
    pub freshness_window_secs: u64,

    /// Bound on each key-management call, in milliseconds
    pub operation_timeout_ms: u64,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            master_key_id: "alias/safehook-webhooks".to_string(),
            master_key_env: "SAFEHOOK_MASTER_KEY".to_string(),
            freshness_window_secs: 24 * 60 * 60,
            operation_timeout_ms: 5000,
        }
    }
}

impl EncryptionConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Freshness window; values beyond [`MAX_FRESHNESS_WINDOW_SECS`] are clamped
    pub fn freshness_window(&self) -> chrono::Duration {
        i64::try_from(self.freshness_window_secs.min(MAX_FRESHNESS_WINDOW_SECS))
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(|| chrono::Duration::days(1))
    }
}

/// Signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Bound on each secret-store fetch, in milliseconds
    pub timeout_ms: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self { timeout_ms: 3000 }
    }
}

impl SigningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Compliance gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Domains (and their subdomains) that need no external-domain review
    pub approved_domains: Vec<String>,

    /// Hostname fragments that mark a non-production target
    pub non_production_markers: Vec<String>,

    /// Allowed endpoint timeout range in seconds
    pub min_timeout_secs: u64,
    pub max_timeout_secs: u64,

    /// Longest per-endpoint retention period accepted, in days
    pub max_retention_days: u32,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            approved_domains: Vec::new(),
            non_production_markers: vec![
                "staging".to_string(),
                "stage".to_string(),
                "dev".to_string(),
                "test".to_string(),
                "sandbox".to_string(),
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "ngrok".to_string(),
            ],
            min_timeout_secs: 1,
            max_timeout_secs: 30,
            max_retention_days: 36_500,
        }
    }
}

/// Retention sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run the scheduled sweep
    pub enabled: bool,

    /// Seconds between sweeps
    pub interval_secs: u64,

    /// Floor for hard-deleting delivery rows, in days
    pub delivery_floor_days: u32,

    /// Floor for redacting audit entries, in days (about 7 years)
    pub audit_floor_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 24 * 60 * 60,
            delivery_floor_days: 365,
            audit_floor_days: 2555,
        }
    }
}

/// Upper bound the event bus accepts per call
pub const MAX_EVENT_BUS_BATCH: usize = 10;

/// Longest envelope freshness window accepted, in seconds (366 days)
pub const MAX_FRESHNESS_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Target bus name
    pub bus_name: String,

    /// Source attribute on published entries
    pub source: String,

    /// Entries per publish call
    pub batch_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            bus_name: "default".to_string(),
            source: "safehook.events".to_string(),
            batch_size: MAX_EVENT_BUS_BATCH,
        }
    }
}

/// Record persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory of the JSON file store; records stay in memory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}
