//! Per-endpoint delivery pipeline
//!
//! environment segregation → compliance check → field encryption → signing
//! → pending row → transmission → outcome → attempt row → audit.
//!
//! Every path that stops a delivery records an audit entry before
//! returning. Once a delivery row exists the rest of the pipeline runs on
//! its own task, so a dropped caller cannot leave the row `pending`.

use super::executor::{DeliveryExecutor, DeliveryHeaders, ExecutionOutcome};
use crate::audit::AuditLogger;
use crate::compliance::{agreement_verified, ComplianceGate};
use crate::crypto::{EncryptionEnvelope, EnvelopeEncryptionManager};
use crate::error::{Error, Result};
use crate::models::{
    AuditComplianceStatus, AuditEntry, AuditEventKind, Delivery, DeliveryAttempt, DeliveryStatus,
    EndpointConfig, Environment, OutboundEvent, RiskLevel, SensitivityLevel,
};
use crate::privacy::ClassificationResult;
use crate::signing::Signer;
use crate::store::Store;
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Payload after field encryption, ready for the wire
struct ProtectedPayload {
    payload: Value,
    envelope: Option<EncryptionEnvelope>,
    envelope_header: Option<String>,
}

/// Runs one delivery of one event to one endpoint
#[derive(Clone)]
pub struct DeliveryPipeline {
    store: Arc<dyn Store>,
    gate: Arc<ComplianceGate>,
    encryption: Arc<EnvelopeEncryptionManager>,
    signer: Arc<Signer>,
    executor: Arc<DeliveryExecutor>,
    audit: AuditLogger,
    grace_period: Duration,
}

impl DeliveryPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        gate: Arc<ComplianceGate>,
        encryption: Arc<EnvelopeEncryptionManager>,
        signer: Arc<Signer>,
        executor: Arc<DeliveryExecutor>,
        audit: AuditLogger,
        grace_period: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            encryption,
            signer,
            executor,
            audit,
            grace_period,
        }
    }

    /// First attempt of a delivery
    pub async fn deliver(
        &self,
        endpoint: &EndpointConfig,
        event: &OutboundEvent,
        classification: &ClassificationResult,
        environment: Environment,
    ) -> Result<Delivery> {
        self.deliver_attempt(endpoint, event, classification, environment, 1)
            .await
    }

    /// Deliver with an externally owned attempt number
    pub async fn deliver_attempt(
        &self,
        endpoint: &EndpointConfig,
        event: &OutboundEvent,
        classification: &ClassificationResult,
        environment: Environment,
        attempt_number: u32,
    ) -> Result<Delivery> {
        let segregation = self.gate.validate_environment_segregation(endpoint, environment);
        if !segregation.compliant {
            let entry = self
                .violation_entry(endpoint, event, classification, segregation.risk_level)
                .with_details(serde_json::json!({
                    "stage": "environment_segregation",
                    "event_id": event.id,
                    "blockers": segregation.blockers,
                }));
            self.audit.record(entry).await?;
            return Err(Error::ComplianceViolation(segregation.blockers));
        }

        let report = self
            .gate
            .check_delivery(endpoint, classification, &event.entity_ids)
            .await?;
        let warnings = report.warnings.clone();
        report.into_result()?;

        let protected = self.protect(endpoint, event, classification).await?;

        let body = serde_json::to_string(&protected.payload)?;
        let timestamp = Utc::now().timestamp();
        let signature = self.signer.sign(endpoint.id, timestamp, &body).await;

        let delivery = Delivery {
            id: Uuid::new_v4(),
            endpoint_id: endpoint.id,
            tenant_id: endpoint.tenant_id.clone(),
            event_type: event.event_type.clone(),
            payload: protected.payload,
            envelope: protected.envelope,
            environment,
            sensitivity: classification.level,
            status: DeliveryStatus::Pending,
            attempt_count: attempt_number,
            http_status: None,
            response_body: None,
            error: None,
            delivered_at: None,
            latency_ms: None,
            created_at: Utc::now(),
            redacted_at: None,
        };
        self.store.insert_delivery(delivery.clone()).await?;

        let headers = DeliveryHeaders {
            delivery_id: delivery.id,
            endpoint_id: endpoint.id,
            timestamp,
            sensitivity: classification.level,
            signature,
            envelope: protected.envelope_header,
        };

        let this = self.clone();
        let endpoint = endpoint.clone();
        let entity_ids = event.entity_ids.clone();
        let fields = classification.fields.clone();
        tokio::spawn(async move {
            this.transmit(endpoint, delivery, headers, body, fields, entity_ids, warnings)
                .await
        })
        .await
        .map_err(|e| Error::Internal(format!("Delivery task failed: {}", e)))?
    }

    /// Encrypt sensitive fields; any failure is audited and fatal
    async fn protect(
        &self,
        endpoint: &EndpointConfig,
        event: &OutboundEvent,
        classification: &ClassificationResult,
    ) -> Result<ProtectedPayload> {
        if classification.level == SensitivityLevel::None {
            return Ok(ProtectedPayload {
                payload: event.payload.clone(),
                envelope: None,
                envelope_header: None,
            });
        }

        let result = async {
            let (payload, envelope) = self
                .encryption
                .encrypt(&event.payload, &classification.fields)
                .await?;
            ensure_covered(&envelope, &classification.fields)?;
            let header = envelope.to_header_value()?;
            Ok::<_, Error>(ProtectedPayload {
                payload,
                envelope: Some(envelope),
                envelope_header: Some(header),
            })
        }
        .await;

        match result {
            Ok(protected) => Ok(protected),
            Err(e) => {
                tracing::error!(
                    endpoint_id = %endpoint.id,
                    event_id = %event.id,
                    error = %e,
                    "Field encryption failed; delivery aborted"
                );
                let entry = self
                    .violation_entry(endpoint, event, classification, RiskLevel::Critical)
                    .with_details(serde_json::json!({
                        "stage": "encryption",
                        "event_id": event.id,
                        "error": e.to_string(),
                    }));
                self.audit.record(entry).await?;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn transmit(
        &self,
        endpoint: EndpointConfig,
        mut delivery: Delivery,
        headers: DeliveryHeaders,
        body: String,
        fields: Vec<String>,
        entity_ids: Vec<String>,
        warnings: Vec<String>,
    ) -> Result<Delivery> {
        let request_timeout = Duration::from_secs(endpoint.timeout_secs);
        let deadline = request_timeout + self.grace_period;
        let digest = format!("{:x}", Sha256::digest(body.as_bytes()));

        let outcome = tokio::time::timeout(
            deadline,
            self.executor
                .execute(&endpoint.url, &headers, body, request_timeout),
        )
        .await
        .unwrap_or_else(|_| ExecutionOutcome {
            success: false,
            http_status: None,
            response_body: None,
            error: Some(format!("Delivery abandoned after {:?}", deadline)),
            latency_ms: deadline.as_millis() as u64,
        });

        delivery.status = if outcome.success {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Failed
        };
        delivery.http_status = outcome.http_status;
        delivery.response_body = outcome.response_body.clone();
        delivery.error = outcome.error.clone();
        delivery.latency_ms = Some(outcome.latency_ms);
        if outcome.success {
            delivery.delivered_at = Some(Utc::now());
        }
        if let Err(e) = self.store.update_delivery(delivery.clone()).await {
            tracing::error!(
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                transmitted = outcome.success,
                error = %e,
                "Failed to persist delivery outcome; row left pending"
            );
            let mut entry = AuditEntry::new(&endpoint, AuditEventKind::DataTransmitted)
                .with_delivery(delivery.id)
                .with_sensitivity(delivery.sensitivity, &fields)
                .with_entities(entity_ids)
                .with_risk(RiskLevel::High)
                .with_details(serde_json::json!({
                    "stage": "outcome_persistence",
                    "event_type": delivery.event_type,
                    "transmitted": outcome.success,
                    "http_status": outcome.http_status,
                    "payload_sha256": digest,
                    "error": e.to_string(),
                }));
            entry.encryption_verified = delivery.envelope.is_some();
            entry.compliance_status = AuditComplianceStatus::UnderReview;
            if let Err(audit_err) = self.audit.record(entry).await {
                tracing::error!(
                    delivery_id = %delivery.id,
                    error = %audit_err,
                    "Failed to audit lost delivery outcome"
                );
            }
            return Err(e);
        }

        self.store
            .insert_attempt(DeliveryAttempt {
                id: Uuid::new_v4(),
                delivery_id: delivery.id,
                endpoint_id: endpoint.id,
                attempt_number: delivery.attempt_count,
                http_status: outcome.http_status,
                error: outcome.error.clone(),
                created_at: Utc::now(),
            })
            .await?;

        let mut entry = AuditEntry::new(&endpoint, AuditEventKind::DataTransmitted)
            .with_delivery(delivery.id)
            .with_sensitivity(delivery.sensitivity, &fields)
            .with_entities(entity_ids)
            .with_risk(RiskLevel::for_sensitivity(delivery.sensitivity))
            .with_details(serde_json::json!({
                "event_type": delivery.event_type,
                "http_status": outcome.http_status,
                "latency_ms": outcome.latency_ms,
                "signature_status": headers.signature.status,
                "payload_sha256": digest,
                "warnings": warnings,
                "error": outcome.error,
            }));
        entry.agreement_verified = agreement_verified(&endpoint, Utc::now());
        entry.encryption_verified = delivery.envelope.is_some();
        if !outcome.success {
            entry.compliance_status = AuditComplianceStatus::UnderReview;
        }
        self.audit.record(entry).await?;

        Ok(delivery)
    }

    fn violation_entry(
        &self,
        endpoint: &EndpointConfig,
        event: &OutboundEvent,
        classification: &ClassificationResult,
        risk: RiskLevel,
    ) -> AuditEntry {
        let kind = if classification.is_sensitive() {
            AuditEventKind::PhiAccessed
        } else {
            AuditEventKind::DataTransmitted
        };
        let mut entry = AuditEntry::new(endpoint, kind)
            .with_sensitivity(classification.level, &classification.fields)
            .with_entities(event.entity_ids.clone())
            .with_risk(risk)
            .violation();
        entry.agreement_verified = agreement_verified(endpoint, Utc::now());
        entry
    }
}

/// Every classified path must be encrypted before anything leaves the process
fn ensure_covered(envelope: &EncryptionEnvelope, fields: &[String]) -> Result<()> {
    let missing = envelope.uncovered(fields);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Encryption(format!(
            "Sensitive fields left unencrypted: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{ComplianceConfig, EncryptionConfig};
    use crate::crypto::{DataKey, GeneratedDataKey, KeyManagementService, LocalKms};
    use crate::delivery::transport::{OutboundRequest, Transport, TransportResponse};
    use crate::models::EndpointComplianceStatus;
    use crate::privacy::Classifier;
    use crate::signing::StaticSecretStore;
    use crate::store::{AttemptFilter, AuditFilter, DeliveryFilter, EndpointFilter, MemoryStore};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use tokio::sync::Mutex;

    /// Transport that records requests and answers with a fixed status
    pub(crate) struct StubTransport {
        pub status: u16,
        pub delay: Duration,
        pub requests: Mutex<Vec<OutboundRequest>>,
    }

    impl StubTransport {
        pub(crate) fn new(status: u16) -> Self {
            Self {
                status,
                delay: Duration::ZERO,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn post(&self, request: &OutboundRequest) -> Result<TransportResponse> {
            self.requests.lock().await.push(request.clone());
            tokio::time::sleep(self.delay).await;
            Ok(TransportResponse {
                status: self.status,
                body: "received".to_string(),
            })
        }
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

    /// Memory store whose delivery updates always fail
    struct ReadOnlyDeliveries(MemoryStore);

    #[async_trait]
    impl Store for ReadOnlyDeliveries {
        async fn insert_endpoint(&self, endpoint: EndpointConfig) -> Result<()> {
            self.0.insert_endpoint(endpoint).await
        }
        async fn update_endpoint(&self, endpoint: EndpointConfig) -> Result<()> {
            self.0.update_endpoint(endpoint).await
        }
        async fn get_endpoint(&self, id: Uuid) -> Result<Option<EndpointConfig>> {
            self.0.get_endpoint(id).await
        }
        async fn list_endpoints(&self, filter: &EndpointFilter) -> Result<Vec<EndpointConfig>> {
            self.0.list_endpoints(filter).await
        }
        async fn tenants(&self) -> Result<Vec<String>> {
            self.0.tenants().await
        }
        async fn insert_delivery(&self, delivery: Delivery) -> Result<()> {
            self.0.insert_delivery(delivery).await
        }
        async fn update_delivery(&self, _delivery: Delivery) -> Result<()> {
            Err(Error::Store("disk full".to_string()))
        }
        async fn get_delivery(&self, id: Uuid) -> Result<Option<Delivery>> {
            self.0.get_delivery(id).await
        }
        async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>> {
            self.0.list_deliveries(filter).await
        }
        async fn redact_delivery_payloads(
            &self,
            filter: &DeliveryFilter,
            at: chrono::DateTime<Utc>,
        ) -> Result<usize> {
            self.0.redact_delivery_payloads(filter, at).await
        }
        async fn delete_deliveries(&self, filter: &DeliveryFilter) -> Result<usize> {
            self.0.delete_deliveries(filter).await
        }
        async fn insert_attempt(&self, attempt: DeliveryAttempt) -> Result<()> {
            self.0.insert_attempt(attempt).await
        }
        async fn list_attempts(&self, filter: &AttemptFilter) -> Result<Vec<DeliveryAttempt>> {
            self.0.list_attempts(filter).await
        }
        async fn delete_attempts(&self, filter: &AttemptFilter) -> Result<usize> {
            self.0.delete_attempts(filter).await
        }
        async fn insert_signing_secret(&self, secret: crate::models::SigningSecretRef) -> Result<()> {
            self.0.insert_signing_secret(secret).await
        }
        async fn deactivate_signing_secrets(&self, endpoint_id: Uuid) -> Result<usize> {
            self.0.deactivate_signing_secrets(endpoint_id).await
        }
        async fn active_signing_secret(
            &self,
            endpoint_id: Uuid,
        ) -> Result<Option<crate::models::SigningSecretRef>> {
            self.0.active_signing_secret(endpoint_id).await
        }
        async fn insert_audit(&self, entry: AuditEntry) -> Result<()> {
            self.0.insert_audit(entry).await
        }
        async fn get_audit(&self, id: Uuid) -> Result<Option<AuditEntry>> {
            self.0.get_audit(id).await
        }
        async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
            self.0.list_audit(filter).await
        }
        async fn redact_audit_entries(
            &self,
            filter: &AuditFilter,
            at: chrono::DateTime<Utc>,
        ) -> Result<usize> {
            self.0.redact_audit_entries(filter, at).await
        }
    }

    pub(crate) struct Harness {
        pub store: Arc<MemoryStore>,
        pub transport: Arc<StubTransport>,
        pub secrets: Arc<StaticSecretStore>,
        pub encryption: Arc<EnvelopeEncryptionManager>,
        pub pipeline: DeliveryPipeline,
    }

    pub(crate) fn harness_with(transport: StubTransport, kms: Arc<dyn KeyManagementService>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(transport);
        let secrets = Arc::new(StaticSecretStore::new());
        let audit = AuditLogger::new(store.clone());
        let encryption = Arc::new(EnvelopeEncryptionManager::new(kms, &EncryptionConfig::default()));
        let pipeline = DeliveryPipeline::new(
            store.clone(),
            Arc::new(ComplianceGate::new(audit.clone(), ComplianceConfig::default())),
            encryption.clone(),
            Arc::new(Signer::new(store.clone(), secrets.clone(), Duration::from_secs(1))),
            Arc::new(DeliveryExecutor::new(transport.clone(), 1000)),
            audit,
            Duration::from_millis(50),
        );
        Harness {
            store,
            transport,
            secrets,
            encryption,
            pipeline,
        }
    }

    pub(crate) fn local_kms() -> Arc<dyn KeyManagementService> {
        Arc::new(LocalKms::ephemeral(EncryptionConfig::default().master_key_id))
    }

    pub(crate) fn harness(status: u16) -> Harness {
        harness_with(StubTransport::new(status), local_kms())
    }

    pub(crate) fn compliant_endpoint(ceiling: SensitivityLevel) -> EndpointConfig {
        let mut endpoint =
            EndpointConfig::new("tenant-a", "https://hooks.partner.com/events", Environment::Production);
        endpoint.sensitivity_ceiling = ceiling;
        endpoint.compliance_status = EndpointComplianceStatus::Compliant;
        endpoint.agreement_signed_at = Some(Utc::now() - ChronoDuration::days(30));
        endpoint.agreement_expires_at = Some(Utc::now() + ChronoDuration::days(335));
        endpoint.vendor_name = Some("Partner Health".to_string());
        endpoint
    }

    fn classify(payload: &Value) -> ClassificationResult {
        Classifier::with_default_rules().unwrap().classify(payload)
    }

    #[tokio::test]
    async fn test_end_to_end_full_sensitivity() {
        let h = harness(200);
        let endpoint = compliant_endpoint(SensitivityLevel::Full);
        h.store
            .insert_signing_secret(crate::models::SigningSecretRef {
                id: Uuid::new_v4(),
                endpoint_id: endpoint.id,
                reference: "hooks/partner".to_string(),
                algorithm: "hmac-sha256".to_string(),
                active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        h.secrets.insert("hooks/partner", "whsec").await;

        let event = OutboundEvent::new(
            "patient.updated",
            json!({"patient_name": "Jane Doe", "note": "f/u visit"}),
        );
        let classification = classify(&event.payload);
        assert_eq!(classification.level, SensitivityLevel::Full);

        let delivery = h
            .pipeline
            .deliver(&endpoint, &event, &classification, Environment::Production)
            .await
            .unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Delivered);

        // Only patient_name is encrypted
        let envelope = delivery.envelope.clone().unwrap();
        assert_eq!(envelope.field_paths(), vec!["patient_name".to_string()]);
        assert_ne!(delivery.payload["patient_name"], "Jane Doe");
        assert_eq!(delivery.payload["note"], "f/u visit");
        let restored = h.encryption.decrypt(&envelope, &delivery.payload).await.unwrap();
        assert_eq!(restored, event.payload);

        // Signed body on the wire matches the stored payload
        let requests = h.transport.requests.lock().await;
        let header = |name: &str| {
            requests[0]
                .headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(header("X-Webhook-Signature-Status").as_deref(), Some("signed"));
        assert_eq!(header("X-Data-Sensitivity").as_deref(), Some("full"));
        let timestamp: i64 = header("X-Webhook-Timestamp").unwrap().parse().unwrap();
        assert!(crate::signing::verify_signature(
            b"whsec",
            timestamp,
            &requests[0].body,
            &header("X-Webhook-Signature").unwrap()
        ));
        assert!(header("X-Encryption-Envelope").is_some());

        let stored = h.store.get_delivery(delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);

        let audit = h.store.list_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].risk_level, RiskLevel::High);
        assert_eq!(audit[0].compliance_status, AuditComplianceStatus::Compliant);
        assert!(audit[0].encryption_verified);
        assert!(audit[0].agreement_verified);

        let attempts = h.store.list_attempts(&AttemptFilter::default()).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_number, 1);
    }

    #[tokio::test]
    async fn test_keys_with_separators_are_encrypted() {
        let h = harness(200);
        let endpoint = compliant_endpoint(SensitivityLevel::Full);
        let event = OutboundEvent::new(
            "patient.updated",
            json!({"patient.name": "Jane Doe", "meta": {"ssn.value": "123-45-6789"}}),
        );
        let classification = classify(&event.payload);
        assert_eq!(classification.level, SensitivityLevel::Full);
        assert_eq!(classification.fields.len(), 2);

        let delivery = h
            .pipeline
            .deliver(&endpoint, &event, &classification, Environment::Production)
            .await
            .unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Delivered);

        let envelope = delivery.envelope.clone().unwrap();
        assert_eq!(envelope.fields.len(), 2);
        assert!(envelope.uncovered(&classification.fields).is_empty());

        let requests = h.transport.requests.lock().await;
        assert!(!requests[0].body.contains("Jane Doe"));
        assert!(!requests[0].body.contains("123-45-6789"));

        let restored = h.encryption.decrypt(&envelope, &delivery.payload).await.unwrap();
        assert_eq!(restored, event.payload);
    }

    #[tokio::test]
    async fn test_nested_and_array_fields_all_encrypted() {
        let h = harness(200);
        let endpoint = compliant_endpoint(SensitivityLevel::Full);
        let event = OutboundEvent::new(
            "claim.submitted",
            json!({
                "contacts": [{"phone": "555-123-4567", "label": "home"}],
                "claim": {"subscriber": {"dateOfBirth": "1980-01-01", "plan": "gold"}},
                "status": "open"
            }),
        );
        let classification = classify(&event.payload);
        assert!(classification.fields.contains(&"contacts[0].phone".to_string()));
        assert!(classification
            .fields
            .contains(&"claim.subscriber.dateOfBirth".to_string()));

        let delivery = h
            .pipeline
            .deliver(&endpoint, &event, &classification, Environment::Production)
            .await
            .unwrap();
        let envelope = delivery.envelope.clone().unwrap();
        assert!(envelope.uncovered(&classification.fields).is_empty());

        // Every classified path was replaced by ciphertext
        for field in &classification.fields {
            let path = crate::payload::FieldPath::parse(field).unwrap();
            let original = crate::payload::get(&event.payload, &path).unwrap();
            let stored = crate::payload::get(&delivery.payload, &path).unwrap();
            assert_ne!(stored, original, "{} was not encrypted", field);
        }
        // Unflagged siblings stay readable
        assert_eq!(delivery.payload["contacts"][0]["label"], "home");
        assert_eq!(delivery.payload["claim"]["subscriber"]["plan"], "gold");

        let stored = h.store.get_delivery(delivery.id).await.unwrap().unwrap();
        let restored = h
            .encryption
            .decrypt(stored.envelope.as_ref().unwrap(), &stored.payload)
            .await
            .unwrap();
        assert_eq!(restored, event.payload);
    }

    #[test]
    fn test_uncovered_classified_field_is_encryption_error() {
        let envelope = EncryptionEnvelope {
            key_id: "alias/test".to_string(),
            wrapped_key: "AAAA".to_string(),
            algorithm: crate::crypto::ENVELOPE_ALGORITHM.to_string(),
            fields: Default::default(),
            encrypted_at: Utc::now(),
        };
        let err = ensure_covered(&envelope, &["patient\\.name".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Encryption(_)));
        assert!(ensure_covered(&envelope, &[]).is_ok());
    }

    #[tokio::test]
    async fn test_blocked_delivery_never_transmits() {
        let h = harness(200);
        let endpoint = compliant_endpoint(SensitivityLevel::Limited);
        let event = OutboundEvent::new("patient.updated", json!({"ssn": "123-45-6789"}));
        let classification = classify(&event.payload);

        let err = h
            .pipeline
            .deliver(&endpoint, &event, &classification, Environment::Production)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ComplianceViolation(_)));
        assert!(h.transport.requests.lock().await.is_empty());
        assert!(h
            .store
            .list_deliveries(&DeliveryFilter::default())
            .await
            .unwrap()
            .is_empty());

        let audit = h.store.list_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].compliance_status, AuditComplianceStatus::Violation);
    }

    #[tokio::test]
    async fn test_cross_environment_is_audited_violation() {
        let h = harness(200);
        let endpoint = compliant_endpoint(SensitivityLevel::Full);
        let event = OutboundEvent::new("claim.submitted", json!({"claim_status": "open"}));
        let classification = classify(&event.payload);

        let err = h
            .pipeline
            .deliver(&endpoint, &event, &classification, Environment::Staging)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cross-environment"));
        let audit = h.store.list_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].risk_level >= RiskLevel::High);
    }

    #[tokio::test]
    async fn test_encryption_failure_is_fatal_and_audited() {
        let h = harness_with(StubTransport::new(200), Arc::new(FailingKms));
        let endpoint = compliant_endpoint(SensitivityLevel::Full);
        let event = OutboundEvent::new("patient.updated", json!({"patient_name": "Jane Doe"}));
        let classification = classify(&event.payload);

        let err = h
            .pipeline
            .deliver(&endpoint, &event, &classification, Environment::Production)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyManagement(_)));
        // Plaintext never left the process
        assert!(h.transport.requests.lock().await.is_empty());

        let audit = h.store.list_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].risk_level, RiskLevel::Critical);
        assert_eq!(audit[0].compliance_status, AuditComplianceStatus::Violation);
    }

    #[tokio::test]
    async fn test_non_sensitive_payload_sent_in_clear_unsigned() {
        let h = harness_with(StubTransport::new(200), Arc::new(FailingKms));
        let endpoint = compliant_endpoint(SensitivityLevel::None);
        let event = OutboundEvent::new("claim.submitted", json!({"claim_status": "open"}));
        let classification = classify(&event.payload);

        let delivery = h
            .pipeline
            .deliver(&endpoint, &event, &classification, Environment::Production)
            .await
            .unwrap();
        assert!(delivery.envelope.is_none());
        assert_eq!(delivery.payload, event.payload);

        let requests = h.transport.requests.lock().await;
        assert!(requests[0]
            .headers
            .iter()
            .any(|(n, v)| n == "X-Webhook-Signature-Status" && v == "unsigned"));
    }

    #[tokio::test]
    async fn test_failed_transmission_recorded_failed() {
        let h = harness(503);
        let endpoint = compliant_endpoint(SensitivityLevel::Limited);
        let event = OutboundEvent::new("patient.updated", json!({"email": "a@b.co"}));
        let classification = classify(&event.payload);

        let delivery = h
            .pipeline
            .deliver(&endpoint, &event, &classification, Environment::Production)
            .await
            .unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.http_status, Some(503));
        assert_eq!(delivery.attempt_count, 1);

        let audit = h.store.list_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audit[0].compliance_status, AuditComplianceStatus::UnderReview);
        assert_eq!(audit[0].risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn test_slow_endpoint_recorded_failed_not_pending() {
        let mut transport = StubTransport::new(200);
        transport.delay = Duration::from_secs(10);
        let h = harness_with(transport, local_kms());
        let mut endpoint = compliant_endpoint(SensitivityLevel::None);
        endpoint.timeout_secs = 1;
        let event = OutboundEvent::new("claim.submitted", json!({"claim_status": "open"}));
        let classification = classify(&event.payload);

        let delivery = h
            .pipeline
            .deliver_attempt(&endpoint, &event, &classification, Environment::Production, 3)
            .await
            .unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempt_count, 3);

        let pending = h
            .store
            .list_deliveries(&DeliveryFilter {
                status: Some(DeliveryStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(pending.is_empty());
        assert_eq!(h.store.list_audit(&AuditFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lost_outcome_is_logged_and_audited() {
        let store = Arc::new(ReadOnlyDeliveries(MemoryStore::new()));
        let transport = Arc::new(StubTransport::new(200));
        let audit = AuditLogger::new(store.clone());
        let pipeline = DeliveryPipeline::new(
            store.clone(),
            Arc::new(ComplianceGate::new(audit.clone(), ComplianceConfig::default())),
            Arc::new(EnvelopeEncryptionManager::new(local_kms(), &EncryptionConfig::default())),
            Arc::new(Signer::new(store.clone(), Arc::new(StaticSecretStore::new()), Duration::from_secs(1))),
            Arc::new(DeliveryExecutor::new(transport.clone(), 1000)),
            audit,
            Duration::from_millis(50),
        );

        let endpoint = compliant_endpoint(SensitivityLevel::None);
        let event = OutboundEvent::new("claim.submitted", json!({"claim_status": "open"}));
        let classification = classify(&event.payload);

        let err = pipeline
            .deliver(&endpoint, &event, &classification, Environment::Production)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(transport.requests.lock().await.len(), 1);

        // The row stays pending but the transmission is on the audit trail
        let rows = store.list_deliveries(&DeliveryFilter::default()).await.unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Pending);
        let audit = store.list_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].delivery_id, Some(rows[0].id));
        assert_eq!(audit[0].compliance_status, AuditComplianceStatus::UnderReview);
        assert_eq!(audit[0].details["stage"], "outcome_persistence");
        assert_eq!(audit[0].details["transmitted"], true);
    }
}
