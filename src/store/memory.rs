//! In-memory record store

use super::{AttemptFilter, AuditFilter, DeliveryFilter, EndpointFilter, Store};
use crate::error::{Error, Result};
use crate::models::{AuditEntry, Delivery, DeliveryAttempt, EndpointConfig, SigningSecretRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Record store backed by vectors behind async locks
#[derive(Default)]
pub struct MemoryStore {
    endpoints: RwLock<Vec<EndpointConfig>>,
    deliveries: RwLock<Vec<Delivery>>,
    attempts: RwLock<Vec<DeliveryAttempt>>,
    secrets: RwLock<Vec<SigningSecretRef>>,
    audit: RwLock<Vec<AuditEntry>>,
}

/// Every record of a [`MemoryStore`], in insertion order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub deliveries: Vec<Delivery>,
    #[serde(default)]
    pub attempts: Vec<DeliveryAttempt>,
    #[serde(default)]
    pub signing_secrets: Vec<SigningSecretRef>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            endpoints: RwLock::new(snapshot.endpoints),
            deliveries: RwLock::new(snapshot.deliveries),
            attempts: RwLock::new(snapshot.attempts),
            secrets: RwLock::new(snapshot.signing_secrets),
            audit: RwLock::new(snapshot.audit),
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        Snapshot {
            endpoints: self.endpoints.read().await.clone(),
            deliveries: self.deliveries.read().await.clone(),
            attempts: self.attempts.read().await.clone(),
            signing_secrets: self.secrets.read().await.clone(),
            audit: self.audit.read().await.clone(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Endpoints
    // =========================================================================

    async fn insert_endpoint(&self, endpoint: EndpointConfig) -> Result<()> {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.iter().any(|e| e.id == endpoint.id) {
            return Err(Error::Store(format!("Endpoint {} already exists", endpoint.id)));
        }
        endpoints.push(endpoint);
        Ok(())
    }

    async fn update_endpoint(&self, endpoint: EndpointConfig) -> Result<()> {
        let mut endpoints = self.endpoints.write().await;
        let existing = endpoints
            .iter_mut()
            .find(|e| e.id == endpoint.id)
            .ok_or_else(|| Error::Store(format!("Endpoint {} not found", endpoint.id)))?;
        *existing = endpoint;
        Ok(())
    }

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<EndpointConfig>> {
        let endpoints = self.endpoints.read().await;
        Ok(endpoints.iter().find(|e| e.id == id).cloned())
    }

    async fn list_endpoints(&self, filter: &EndpointFilter) -> Result<Vec<EndpointConfig>> {
        let endpoints = self.endpoints.read().await;
        Ok(endpoints.iter().filter(|e| filter.matches(e)).cloned().collect())
    }

    async fn tenants(&self) -> Result<Vec<String>> {
        let endpoints = self.endpoints.read().await;
        let tenants: BTreeSet<String> = endpoints.iter().map(|e| e.tenant_id.clone()).collect();
        Ok(tenants.into_iter().collect())
    }

    // =========================================================================
    // Deliveries
    // =========================================================================

    async fn insert_delivery(&self, delivery: Delivery) -> Result<()> {
        self.deliveries.write().await.push(delivery);
        Ok(())
    }

    async fn update_delivery(&self, delivery: Delivery) -> Result<()> {
        let mut deliveries = self.deliveries.write().await;
        let existing = deliveries
            .iter_mut()
            .find(|d| d.id == delivery.id)
            .ok_or_else(|| Error::Store(format!("Delivery {} not found", delivery.id)))?;
        *existing = delivery;
        Ok(())
    }

    async fn get_delivery(&self, id: Uuid) -> Result<Option<Delivery>> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries.iter().find(|d| d.id == id).cloned())
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries.iter().filter(|d| filter.matches(d)).cloned().collect())
    }

    async fn redact_delivery_payloads(&self, filter: &DeliveryFilter, at: DateTime<Utc>) -> Result<usize> {
        let mut deliveries = self.deliveries.write().await;
        let mut count = 0;
        for delivery in deliveries.iter_mut().filter(|d| filter.matches(d)) {
            delivery.redact_payload(at);
            count += 1;
        }
        Ok(count)
    }

    async fn delete_deliveries(&self, filter: &DeliveryFilter) -> Result<usize> {
        let mut deliveries = self.deliveries.write().await;
        let before = deliveries.len();
        deliveries.retain(|d| !filter.matches(d));
        Ok(before - deliveries.len())
    }

    // =========================================================================
    // Delivery attempts
    // =========================================================================

    async fn insert_attempt(&self, attempt: DeliveryAttempt) -> Result<()> {
        self.attempts.write().await.push(attempt);
        Ok(())
    }

    async fn list_attempts(&self, filter: &AttemptFilter) -> Result<Vec<DeliveryAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts.iter().filter(|a| filter.matches(a)).cloned().collect())
    }

    async fn delete_attempts(&self, filter: &AttemptFilter) -> Result<usize> {
        let mut attempts = self.attempts.write().await;
        let before = attempts.len();
        attempts.retain(|a| !filter.matches(a));
        Ok(before - attempts.len())
    }

    // =========================================================================
    // Signing secret references
    // =========================================================================

    async fn insert_signing_secret(&self, secret: SigningSecretRef) -> Result<()> {
        self.secrets.write().await.push(secret);
        Ok(())
    }

    async fn deactivate_signing_secrets(&self, endpoint_id: Uuid) -> Result<usize> {
        let mut secrets = self.secrets.write().await;
        let mut count = 0;
        for secret in secrets
            .iter_mut()
            .filter(|s| s.endpoint_id == endpoint_id && s.active)
        {
            secret.active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn active_signing_secret(&self, endpoint_id: Uuid) -> Result<Option<SigningSecretRef>> {
        let secrets = self.secrets.read().await;
        Ok(secrets
            .iter()
            .filter(|s| s.endpoint_id == endpoint_id && s.active)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    // =========================================================================
    // Audit
    // =========================================================================

    async fn insert_audit(&self, entry: AuditEntry) -> Result<()> {
        self.audit.write().await.push(entry);
        Ok(())
    }

    async fn get_audit(&self, id: Uuid) -> Result<Option<AuditEntry>> {
        let audit = self.audit.read().await;
        Ok(audit.iter().find(|e| e.id == id).cloned())
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let audit = self.audit.read().await;
        // Appended in time order; newest first
        Ok(audit.iter().rev().filter(|e| filter.matches(e)).cloned().collect())
    }

    async fn redact_audit_entries(&self, filter: &AuditFilter, at: DateTime<Utc>) -> Result<usize> {
        let mut audit = self.audit.write().await;
        let mut count = 0;
        for entry in audit.iter_mut().filter(|e| filter.matches(e)) {
            entry.redact(at);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditEventKind, DeliveryStatus, Environment, SensitivityLevel};
    use chrono::Duration;
    use serde_json::json;

    fn delivery(endpoint: &EndpointConfig, age_days: i64) -> Delivery {
        Delivery {
            id: Uuid::new_v4(),
            endpoint_id: endpoint.id,
            tenant_id: endpoint.tenant_id.clone(),
            event_type: "patient.updated".to_string(),
            payload: json!({"patient_name": "ciphertext"}),
            envelope: None,
            environment: endpoint.environment,
            sensitivity: SensitivityLevel::Limited,
            status: DeliveryStatus::Delivered,
            attempt_count: 1,
            http_status: Some(200),
            response_body: Some("ok".to_string()),
            error: None,
            delivered_at: Some(Utc::now() - Duration::days(age_days)),
            latency_ms: Some(12),
            created_at: Utc::now() - Duration::days(age_days),
            redacted_at: None,
        }
    }

    #[tokio::test]
    async fn test_endpoint_crud() {
        let store = MemoryStore::new();
        let mut endpoint = EndpointConfig::new("t1", "https://a.example.com", Environment::Staging);
        store.insert_endpoint(endpoint.clone()).await.unwrap();
        assert!(store.insert_endpoint(endpoint.clone()).await.is_err());

        endpoint.active = false;
        store.update_endpoint(endpoint.clone()).await.unwrap();

        let active = store
            .list_endpoints(&EndpointFilter {
                active: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(active.is_empty());
        assert_eq!(store.tenants().await.unwrap(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_delivery_filters() {
        let store = MemoryStore::new();
        let endpoint = EndpointConfig::new("t1", "https://a.example.com", Environment::Staging);
        store.insert_delivery(delivery(&endpoint, 40)).await.unwrap();
        store.insert_delivery(delivery(&endpoint, 1)).await.unwrap();

        let old = DeliveryFilter {
            endpoint_id: Some(endpoint.id),
            created_before: Some(Utc::now() - Duration::days(30)),
            ..Default::default()
        };
        assert_eq!(store.list_deliveries(&old).await.unwrap().len(), 1);
        assert_eq!(store.redact_delivery_payloads(&old, Utc::now()).await.unwrap(), 1);

        let redacted = DeliveryFilter {
            redacted: Some(true),
            ..Default::default()
        };
        let rows = store.list_deliveries(&redacted).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload["redacted"], true);
        assert_eq!(rows[0].status, DeliveryStatus::Delivered);

        assert_eq!(store.delete_deliveries(&old).await.unwrap(), 1);
        assert_eq!(store.list_deliveries(&DeliveryFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_signing_secret_rotation() {
        let store = MemoryStore::new();
        let endpoint_id = Uuid::new_v4();
        let old = SigningSecretRef {
            id: Uuid::new_v4(),
            endpoint_id,
            reference: "webhooks/old".to_string(),
            algorithm: "hmac-sha256".to_string(),
            active: true,
            created_at: Utc::now() - Duration::days(1),
        };
        store.insert_signing_secret(old).await.unwrap();
        assert_eq!(store.deactivate_signing_secrets(endpoint_id).await.unwrap(), 1);
        assert!(store.active_signing_secret(endpoint_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audit_newest_first_and_redaction() {
        let store = MemoryStore::new();
        let endpoint = EndpointConfig::new("t1", "https://a.example.com", Environment::Staging);

        let mut first = AuditEntry::new(&endpoint, AuditEventKind::DataTransmitted)
            .with_sensitivity(SensitivityLevel::Full, &["ssn".to_string()]);
        first.created_at = Utc::now() - Duration::days(3000);
        let second = AuditEntry::new(&endpoint, AuditEventKind::ConfigUpdated);
        store.insert_audit(first.clone()).await.unwrap();
        store.insert_audit(second.clone()).await.unwrap();

        let all = store.list_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(all[0].id, second.id);

        let old = AuditFilter {
            created_before: Some(Utc::now() - Duration::days(2555)),
            ..Default::default()
        };
        assert_eq!(store.redact_audit_entries(&old, Utc::now()).await.unwrap(), 1);
        let redacted = store.get_audit(first.id).await.unwrap().unwrap();
        assert!(redacted.sensitive_fields.is_empty());
        assert!(redacted.redacted_at.is_some());
        assert_eq!(redacted.kind, AuditEventKind::DataTransmitted);
    }
}
