//! Domain records shared by the delivery pipeline, audit trail and
//! retention sweep.
//!
//! All types serialize with snake_case enum tags so stored records and
//! wire headers agree on spelling.

use crate::crypto::EncryptionEnvelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Sensitivity tier of a payload, ordered `None < Limited < Full`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityLevel {
    /// No sensitive content detected
    #[default]
    None,
    /// Some identifying or contact data
    Limited,
    /// Protected health information
    Full,
}

impl std::fmt::Display for SensitivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Limited => write!(f, "limited"),
            Self::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for SensitivityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "limited" => Ok(Self::Limited),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown sensitivity level: {}", other)),
        }
    }
}

/// Deployment environment of an endpoint or event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Staging,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

/// Compliance review state of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointComplianceStatus {
    Compliant,
    Pending,
    NonCompliant,
}

/// A subscriber endpoint and its data-handling policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: Uuid,
    pub tenant_id: String,
    pub url: String,
    pub environment: Environment,
    /// Highest sensitivity this endpoint may receive
    pub sensitivity_ceiling: SensitivityLevel,
    pub compliance_status: EndpointComplianceStatus,
    pub agreement_signed_at: Option<DateTime<Utc>>,
    pub agreement_expires_at: Option<DateTime<Utc>>,
    pub vendor_name: Option<String>,
    /// Require HTTPS transport whenever sensitive data flows
    pub encryption_required: bool,
    pub timeout_secs: u64,
    pub retention_days: Option<u32>,
    /// Event types this endpoint subscribes to (empty = all)
    #[serde(default)]
    pub event_types: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EndpointConfig {
    /// New active endpoint with conservative defaults (ceiling `none`,
    /// pending review, encryption required).
    pub fn new(tenant_id: impl Into<String>, url: impl Into<String>, environment: Environment) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            url: url.into(),
            environment,
            sensitivity_ceiling: SensitivityLevel::None,
            compliance_status: EndpointComplianceStatus::Pending,
            agreement_signed_at: None,
            agreement_expires_at: None,
            vendor_name: None,
            encryption_required: true,
            timeout_secs: 10,
            retention_days: None,
            event_types: Vec::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the agreement on file has an expiry in the past
    pub fn agreement_expired(&self, now: DateTime<Utc>) -> bool {
        self.agreement_expires_at.is_some_and(|expiry| expiry < now)
    }

    /// Whether this endpoint subscribes to the given event type
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type)
    }
}

/// Outcome state of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// One delivery of an event to an endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub tenant_id: String,
    pub event_type: String,
    /// Payload as transmitted (ciphertext substituted for sensitive fields)
    pub payload: Value,
    pub envelope: Option<EncryptionEnvelope>,
    pub environment: Environment,
    pub sensitivity: SensitivityLevel,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    /// Set once the retention sweep has tombstoned the payload
    pub redacted_at: Option<DateTime<Utc>>,
}

impl Delivery {
    /// Replace the stored payload with a tombstone, keeping metadata
    pub fn redact_payload(&mut self, at: DateTime<Utc>) {
        self.payload = serde_json::json!({
            "redacted": true,
            "redacted_at": at.to_rfc3339(),
        });
        self.envelope = None;
        self.response_body = None;
        self.redacted_at = Some(at);
    }

    pub fn is_redacted(&self) -> bool {
        self.redacted_at.is_some()
    }
}

/// Record of a single transmission attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    pub attempt_number: u32,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reference to an externally held signing secret; never the value itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningSecretRef {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    /// Key under which the secret store holds the value
    pub reference: String,
    pub algorithm: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Kind of action recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    PhiAccessed,
    BaaVerified,
    DataTransmitted,
    RetentionPolicyApplied,
    ConfigCreated,
    ConfigUpdated,
}

/// Risk attached to an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Risk of transmitting data of the given sensitivity
    pub fn for_sensitivity(level: SensitivityLevel) -> Self {
        match level {
            SensitivityLevel::None => Self::Low,
            SensitivityLevel::Limited => Self::Medium,
            SensitivityLevel::Full => Self::High,
        }
    }
}

/// Compliance verdict recorded with an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditComplianceStatus {
    Compliant,
    Violation,
    UnderReview,
}

/// Immutable compliance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub endpoint_id: Uuid,
    pub delivery_id: Option<Uuid>,
    pub kind: AuditEventKind,
    pub sensitivity: SensitivityLevel,
    /// Paths of sensitive fields (never their values)
    pub sensitive_fields: Vec<String>,
    pub entity_ids: Vec<String>,
    pub agreement_verified: bool,
    pub encryption_verified: bool,
    pub retention_applied: bool,
    pub risk_level: RiskLevel,
    pub compliance_status: AuditComplianceStatus,
    /// Free-form metadata (blockers, counts, digests)
    pub details: Value,
    pub created_at: DateTime<Utc>,
    pub redacted_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Start a low-risk, compliant entry for an endpoint
    pub fn new(endpoint: &EndpointConfig, kind: AuditEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: endpoint.tenant_id.clone(),
            endpoint_id: endpoint.id,
            delivery_id: None,
            kind,
            sensitivity: SensitivityLevel::None,
            sensitive_fields: Vec::new(),
            entity_ids: Vec::new(),
            agreement_verified: false,
            encryption_verified: false,
            retention_applied: false,
            risk_level: RiskLevel::Low,
            compliance_status: AuditComplianceStatus::Compliant,
            details: Value::Null,
            created_at: Utc::now(),
            redacted_at: None,
        }
    }

    pub fn with_delivery(mut self, delivery_id: Uuid) -> Self {
        self.delivery_id = Some(delivery_id);
        self
    }

    pub fn with_sensitivity(mut self, level: SensitivityLevel, fields: &[String]) -> Self {
        self.sensitivity = level;
        self.sensitive_fields = fields.to_vec();
        self
    }

    pub fn with_entities(mut self, entity_ids: Vec<String>) -> Self {
        self.entity_ids = entity_ids;
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Mark the entry as a violation; risk is raised to at least `High`
    pub fn violation(mut self) -> Self {
        self.compliance_status = AuditComplianceStatus::Violation;
        self.risk_level = self.risk_level.max(RiskLevel::High);
        self
    }

    /// Strip field paths, entity identifiers and metadata; the decision
    /// itself (kind, risk, verdict, timestamps) is kept.
    pub fn redact(&mut self, at: DateTime<Utc>) {
        self.sensitive_fields.clear();
        self.entity_ids.clear();
        self.details = Value::Null;
        self.redacted_at = Some(at);
    }
}

/// Application event handed to the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub id: Uuid,
    /// e.g. `patient.updated`, `claim.submitted`
    pub event_type: String,
    pub payload: Value,
    /// Identifiers of the entities the event concerns
    #[serde(default)]
    pub entity_ids: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

impl OutboundEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            entity_ids: Vec::new(),
            occurred_at: Utc::now(),
        }
    }
}
