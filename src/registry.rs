//! Endpoint configuration lifecycle
//!
//! Endpoints are validated by the compliance gate on every write and are
//! soft-deactivated only; there is no delete, so the audit trail always
//! resolves to a configuration.

use crate::audit::AuditLogger;
use crate::compliance::{agreement_verified, ComplianceGate, ComplianceReport};
use crate::error::{Error, Result};
use crate::models::{AuditEntry, AuditEventKind, EndpointConfig, SigningSecretRef};
use crate::signing::SIGNATURE_METHOD;
use crate::store::{EndpointFilter, Store};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Administrative operations on endpoint configurations
pub struct EndpointRegistry {
    store: Arc<dyn Store>,
    gate: Arc<ComplianceGate>,
    audit: AuditLogger,
}

impl EndpointRegistry {
    pub fn new(store: Arc<dyn Store>, gate: Arc<ComplianceGate>, audit: AuditLogger) -> Self {
        Self { store, gate, audit }
    }

    /// Validate and store a new endpoint
    pub async fn create(&self, mut endpoint: EndpointConfig) -> Result<EndpointConfig> {
        let now = Utc::now();
        endpoint.created_at = now;
        endpoint.updated_at = now;

        let report = self.gate.validate_creation(&endpoint, now);
        self.reject_if_blocked(&endpoint, &report, AuditEventKind::ConfigCreated)
            .await?;

        self.store.insert_endpoint(endpoint.clone()).await?;
        self.record_accepted(&endpoint, &report, AuditEventKind::ConfigCreated, true)
            .await?;

        tracing::info!(
            endpoint_id = %endpoint.id,
            tenant_id = %endpoint.tenant_id,
            ceiling = %endpoint.sensitivity_ceiling,
            "Endpoint created"
        );
        Ok(endpoint)
    }

    /// Validate and replace an existing endpoint
    pub async fn update(&self, mut endpoint: EndpointConfig) -> Result<EndpointConfig> {
        let existing = self.require(endpoint.id).await?;
        let now = Utc::now();
        endpoint.created_at = existing.created_at;
        endpoint.updated_at = now;

        let report = self.gate.validate_creation(&endpoint, now);
        self.reject_if_blocked(&endpoint, &report, AuditEventKind::ConfigUpdated)
            .await?;

        let agreement_changed = existing.agreement_signed_at != endpoint.agreement_signed_at
            || existing.agreement_expires_at != endpoint.agreement_expires_at;

        self.store.update_endpoint(endpoint.clone()).await?;
        self.record_accepted(&endpoint, &report, AuditEventKind::ConfigUpdated, agreement_changed)
            .await?;

        tracing::info!(endpoint_id = %endpoint.id, "Endpoint updated");
        Ok(endpoint)
    }

    /// Soft-deactivate an endpoint
    pub async fn deactivate(&self, id: Uuid) -> Result<EndpointConfig> {
        let mut endpoint = self.require(id).await?;
        if !endpoint.active {
            return Ok(endpoint);
        }
        endpoint.active = false;
        endpoint.updated_at = Utc::now();
        self.store.update_endpoint(endpoint.clone()).await?;

        self.audit
            .record(
                AuditEntry::new(&endpoint, AuditEventKind::ConfigUpdated)
                    .with_details(serde_json::json!({"action": "deactivated"})),
            )
            .await?;

        tracing::info!(endpoint_id = %id, "Endpoint deactivated");
        Ok(endpoint)
    }

    /// Deactivate the endpoint's current signing secret and activate a new
    /// reference
    pub async fn rotate_signing_secret(
        &self,
        endpoint_id: Uuid,
        reference: impl Into<String>,
        algorithm: &str,
    ) -> Result<SigningSecretRef> {
        let endpoint = self.require(endpoint_id).await?;
        if algorithm != SIGNATURE_METHOD {
            return Err(Error::Config(format!(
                "Unsupported signing algorithm '{}'",
                algorithm
            )));
        }

        let deactivated = self.store.deactivate_signing_secrets(endpoint_id).await?;
        let secret = SigningSecretRef {
            id: Uuid::new_v4(),
            endpoint_id,
            reference: reference.into(),
            algorithm: algorithm.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        self.store.insert_signing_secret(secret.clone()).await?;

        self.audit
            .record(
                AuditEntry::new(&endpoint, AuditEventKind::ConfigUpdated).with_details(
                    serde_json::json!({
                        "action": "signing_secret_rotated",
                        "secret_id": secret.id,
                        "deactivated": deactivated,
                    }),
                ),
            )
            .await?;

        tracing::info!(endpoint_id = %endpoint_id, deactivated, "Signing secret rotated");
        Ok(secret)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<EndpointConfig>> {
        self.store.get_endpoint(id).await
    }

    pub async fn list(&self, filter: &EndpointFilter) -> Result<Vec<EndpointConfig>> {
        self.store.list_endpoints(filter).await
    }

    async fn require(&self, id: Uuid) -> Result<EndpointConfig> {
        self.store
            .get_endpoint(id)
            .await?
            .ok_or_else(|| Error::Config(format!("Endpoint {} not found", id)))
    }

    async fn reject_if_blocked(
        &self,
        endpoint: &EndpointConfig,
        report: &ComplianceReport,
        kind: AuditEventKind,
    ) -> Result<()> {
        if report.compliant {
            return Ok(());
        }
        let entry = AuditEntry::new(endpoint, kind)
            .with_risk(report.risk_level)
            .with_details(serde_json::json!({
                "blockers": report.blockers,
                "warnings": report.warnings,
            }))
            .violation();
        self.audit.record(entry).await?;
        Err(Error::Config(report.blockers.join("; ")))
    }

    async fn record_accepted(
        &self,
        endpoint: &EndpointConfig,
        report: &ComplianceReport,
        kind: AuditEventKind,
        check_agreement: bool,
    ) -> Result<()> {
        let verified = agreement_verified(endpoint, Utc::now());
        let mut entry = AuditEntry::new(endpoint, kind)
            .with_risk(report.risk_level)
            .with_details(serde_json::json!({"warnings": report.warnings}));
        entry.agreement_verified = verified;
        self.audit.record(entry).await?;

        if check_agreement && verified {
            let mut entry = AuditEntry::new(endpoint, AuditEventKind::BaaVerified).with_details(
                serde_json::json!({
                    "signed_at": endpoint.agreement_signed_at,
                    "expires_at": endpoint.agreement_expires_at,
                    "vendor": endpoint.vendor_name,
                }),
            );
            entry.agreement_verified = true;
            self.audit.record(entry).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComplianceConfig;
    use crate::models::{
        AuditComplianceStatus, EndpointComplianceStatus, Environment, RiskLevel, SensitivityLevel,
    };
    use crate::store::{AuditFilter, MemoryStore};
    use chrono::Duration;

    fn registry() -> (EndpointRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditLogger::new(store.clone());
        let gate = Arc::new(ComplianceGate::new(audit.clone(), ComplianceConfig::default()));
        (EndpointRegistry::new(store.clone(), gate, audit), store)
    }

    fn endpoint_with_agreement() -> EndpointConfig {
        let mut endpoint = EndpointConfig::new("t1", "https://hooks.partner.com", Environment::Production);
        endpoint.sensitivity_ceiling = SensitivityLevel::Full;
        endpoint.compliance_status = EndpointComplianceStatus::Compliant;
        endpoint.agreement_signed_at = Some(Utc::now() - Duration::days(1));
        endpoint.agreement_expires_at = Some(Utc::now() + Duration::days(364));
        endpoint
    }

    #[tokio::test]
    async fn test_create_records_config_and_agreement() {
        let (registry, store) = registry();
        let endpoint = registry.create(endpoint_with_agreement()).await.unwrap();
        assert!(store.get_endpoint(endpoint.id).await.unwrap().is_some());

        let entries = store.list_audit(&AuditFilter::default()).await.unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&AuditEventKind::ConfigCreated));
        assert!(kinds.contains(&AuditEventKind::BaaVerified));
    }

    #[tokio::test]
    async fn test_create_rejects_http_and_audits() {
        let (registry, store) = registry();
        let mut endpoint = endpoint_with_agreement();
        endpoint.url = "http://hooks.partner.com".to_string();

        let err = registry.create(endpoint.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(store.get_endpoint(endpoint.id).await.unwrap().is_none());

        let entries = store.list_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].compliance_status, AuditComplianceStatus::Violation);
        assert_eq!(entries[0].risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_update_and_deactivate() {
        let (registry, store) = registry();
        let mut endpoint = registry.create(endpoint_with_agreement()).await.unwrap();

        endpoint.timeout_secs = 20;
        let updated = registry.update(endpoint.clone()).await.unwrap();
        assert_eq!(updated.created_at, endpoint.created_at);

        let deactivated = registry.deactivate(endpoint.id).await.unwrap();
        assert!(!deactivated.active);
        // Soft-deactivated rows remain
        assert!(store.get_endpoint(endpoint.id).await.unwrap().is_some());

        let updates = store
            .list_audit(&AuditFilter::default())
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == AuditEventKind::ConfigUpdated)
            .count();
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn test_update_unknown_endpoint() {
        let (registry, _) = registry();
        let err = registry.update(endpoint_with_agreement()).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_rotate_signing_secret() {
        let (registry, store) = registry();
        let endpoint = registry.create(endpoint_with_agreement()).await.unwrap();

        let first = registry
            .rotate_signing_secret(endpoint.id, "hooks/v1", SIGNATURE_METHOD)
            .await
            .unwrap();
        let second = registry
            .rotate_signing_secret(endpoint.id, "hooks/v2", SIGNATURE_METHOD)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let active = store.active_signing_secret(endpoint.id).await.unwrap().unwrap();
        assert_eq!(active.reference, "hooks/v2");

        assert!(registry
            .rotate_signing_secret(endpoint.id, "hooks/v3", "md5")
            .await
            .is_err());
    }
}
