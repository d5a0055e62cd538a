//! Persistence collaborator
//!
//! The pipeline only needs filtered select/insert/update/delete access to
//! its records; schema and migration mechanics live behind this trait.
//! Audit entries have no update operation: after insertion they can only
//! be redacted.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, Snapshot};

use crate::error::Result;
use crate::models::{
    AuditComplianceStatus, AuditEntry, Delivery, DeliveryAttempt, DeliveryStatus, EndpointConfig,
    Environment, SigningSecretRef,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Endpoint selection
#[derive(Debug, Clone, Default)]
pub struct EndpointFilter {
    pub tenant_id: Option<String>,
    pub environment: Option<Environment>,
    pub active: Option<bool>,
}

impl EndpointFilter {
    pub fn matches(&self, endpoint: &EndpointConfig) -> bool {
        self.tenant_id.as_ref().map_or(true, |t| &endpoint.tenant_id == t)
            && self.environment.map_or(true, |e| endpoint.environment == e)
            && self.active.map_or(true, |a| endpoint.active == a)
    }
}

/// Delivery selection
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub endpoint_id: Option<Uuid>,
    pub tenant_id: Option<String>,
    pub status: Option<DeliveryStatus>,
    /// Strictly older than
    pub created_before: Option<DateTime<Utc>>,
    pub redacted: Option<bool>,
}

impl DeliveryFilter {
    pub fn matches(&self, delivery: &Delivery) -> bool {
        self.endpoint_id.map_or(true, |id| delivery.endpoint_id == id)
            && self.tenant_id.as_ref().map_or(true, |t| &delivery.tenant_id == t)
            && self.status.map_or(true, |s| delivery.status == s)
            && self.created_before.map_or(true, |c| delivery.created_at < c)
            && self.redacted.map_or(true, |r| delivery.is_redacted() == r)
    }
}

/// Delivery-attempt selection
#[derive(Debug, Clone, Default)]
pub struct AttemptFilter {
    pub endpoint_id: Option<Uuid>,
    pub delivery_id: Option<Uuid>,
    pub created_before: Option<DateTime<Utc>>,
}

impl AttemptFilter {
    pub fn matches(&self, attempt: &DeliveryAttempt) -> bool {
        self.endpoint_id.map_or(true, |id| attempt.endpoint_id == id)
            && self.delivery_id.map_or(true, |id| attempt.delivery_id == id)
            && self.created_before.map_or(true, |c| attempt.created_at < c)
    }
}

/// Audit-entry selection
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub tenant_id: Option<String>,
    pub endpoint_id: Option<Uuid>,
    pub delivery_id: Option<Uuid>,
    pub compliance_status: Option<AuditComplianceStatus>,
    pub created_before: Option<DateTime<Utc>>,
    pub redacted: Option<bool>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.tenant_id.as_ref().map_or(true, |t| &entry.tenant_id == t)
            && self.endpoint_id.map_or(true, |id| entry.endpoint_id == id)
            && self.delivery_id.map_or(true, |id| entry.delivery_id == Some(id))
            && self.compliance_status.map_or(true, |s| entry.compliance_status == s)
            && self.created_before.map_or(true, |c| entry.created_at < c)
            && self.redacted.map_or(true, |r| entry.redacted_at.is_some() == r)
    }
}

/// Record store used by the pipeline, audit logger and retention sweep
#[async_trait]
pub trait Store: Send + Sync {
    // ---- Endpoints ----
    async fn insert_endpoint(&self, endpoint: EndpointConfig) -> Result<()>;
    async fn update_endpoint(&self, endpoint: EndpointConfig) -> Result<()>;
    async fn get_endpoint(&self, id: Uuid) -> Result<Option<EndpointConfig>>;
    async fn list_endpoints(&self, filter: &EndpointFilter) -> Result<Vec<EndpointConfig>>;
    /// Distinct tenants owning at least one endpoint
    async fn tenants(&self) -> Result<Vec<String>>;

    // ---- Deliveries ----
    async fn insert_delivery(&self, delivery: Delivery) -> Result<()>;
    async fn update_delivery(&self, delivery: Delivery) -> Result<()>;
    async fn get_delivery(&self, id: Uuid) -> Result<Option<Delivery>>;
    async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>>;
    /// Tombstone payloads of matching deliveries; returns the count
    async fn redact_delivery_payloads(&self, filter: &DeliveryFilter, at: DateTime<Utc>) -> Result<usize>;
    async fn delete_deliveries(&self, filter: &DeliveryFilter) -> Result<usize>;

    // ---- Delivery attempts ----
    async fn insert_attempt(&self, attempt: DeliveryAttempt) -> Result<()>;
    async fn list_attempts(&self, filter: &AttemptFilter) -> Result<Vec<DeliveryAttempt>>;
    async fn delete_attempts(&self, filter: &AttemptFilter) -> Result<usize>;

    // ---- Signing secret references ----
    async fn insert_signing_secret(&self, secret: SigningSecretRef) -> Result<()>;
    /// Deactivate every active secret of an endpoint; returns the count
    async fn deactivate_signing_secrets(&self, endpoint_id: Uuid) -> Result<usize>;
    async fn active_signing_secret(&self, endpoint_id: Uuid) -> Result<Option<SigningSecretRef>>;

    // ---- Audit ----
    async fn insert_audit(&self, entry: AuditEntry) -> Result<()>;
    async fn get_audit(&self, id: Uuid) -> Result<Option<AuditEntry>>;
    /// Matching entries, newest first
    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;
    async fn redact_audit_entries(&self, filter: &AuditFilter, at: DateTime<Utc>) -> Result<usize>;
}
