//! Component wiring
//!
//! Collaborators (store, key management, secret store, transport, event
//! bus) are built once at startup and passed in explicitly; every component
//! receives the handles it needs through its constructor.

use crate::audit::{audit_router, AuditLogger, AuditState};
use crate::compliance::ComplianceGate;
use crate::config::SafeHookConfig;
use crate::crypto::{EnvelopeEncryptionManager, KeyManagementService, LocalKms};
use crate::delivery::{DeliveryExecutor, DeliveryPipeline, ReqwestTransport, Transport};
use crate::error::Result;
use crate::privacy::Classifier;
use crate::registry::EndpointRegistry;
use crate::retention::{RetentionManager, RetentionScheduler};
use crate::router::{EventBus, EventRouter, InMemoryEventBus};
use crate::signing::{EnvSecretStore, SecretStore, Signer};
use crate::store::{FileStore, MemoryStore, Store};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;

/// External collaborators
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub kms: Arc<dyn KeyManagementService>,
    pub secrets: Arc<dyn SecretStore>,
    pub transport: Arc<dyn Transport>,
    pub bus: Arc<dyn EventBus>,
}

impl Collaborators {
    /// In-process collaborators: file store under `store.data_dir` (memory
    /// store when unset), local KMS keyed from the environment (ephemeral if
    /// unset), env secrets, HTTP transport and an in-memory bus.
    pub async fn local(config: &SafeHookConfig) -> Result<Self> {
        let store: Arc<dyn Store> = match &config.store.data_dir {
            Some(dir) => Arc::new(FileStore::open(dir).await?),
            None => {
                tracing::warn!("No data directory configured; records are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };


        let kms = match LocalKms::from_env(
            config.encryption.master_key_id.clone(),
            &config.encryption.master_key_env,
        ) {
            Ok(kms) => kms,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "No master key configured; using an ephemeral key (envelopes will not survive restart)"
                );
                LocalKms::ephemeral(config.encryption.master_key_id.clone())
            }
        };

        Ok(Self {
            store,
            kms: Arc::new(kms),
            secrets: Arc::new(EnvSecretStore::default()),
            transport: Arc::new(ReqwestTransport::new(&config.delivery.user_agent)?),
            bus: Arc::new(InMemoryEventBus::new()),
        })
    }
}

/// Fully wired service
pub struct SafeHook {
    pub config: SafeHookConfig,
    pub store: Arc<dyn Store>,
    pub classifier: Arc<Classifier>,
    pub audit: AuditLogger,
    pub gate: Arc<ComplianceGate>,
    pub encryption: Arc<EnvelopeEncryptionManager>,
    pub pipeline: DeliveryPipeline,
    pub router: Arc<EventRouter>,
    pub registry: Arc<EndpointRegistry>,
    pub retention: Arc<RetentionManager>,
}

impl SafeHook {
    pub fn new(config: SafeHookConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            store,
            kms,
            secrets,
            transport,
            bus,
        } = collaborators;

        let classifier = Arc::new(Classifier::with_default_rules()?);
        let audit = AuditLogger::new(store.clone());
        let gate = Arc::new(ComplianceGate::new(audit.clone(), config.compliance.clone()));
        let encryption = Arc::new(EnvelopeEncryptionManager::new(kms, &config.encryption));
        let signer = Arc::new(Signer::new(store.clone(), secrets, config.signing.timeout()));
        let executor = Arc::new(DeliveryExecutor::new(
            transport,
            config.delivery.response_body_limit,
        ));

        let pipeline = DeliveryPipeline::new(
            store.clone(),
            gate.clone(),
            encryption.clone(),
            signer,
            executor,
            audit.clone(),
            config.delivery.grace_period(),
        );
        let router = Arc::new(EventRouter::new(
            store.clone(),
            classifier.clone(),
            pipeline.clone(),
            bus,
            config.event_bus.clone(),
            config.delivery.max_concurrency,
        ));
        let registry = Arc::new(EndpointRegistry::new(store.clone(), gate.clone(), audit.clone()));
        let retention = Arc::new(RetentionManager::new(
            store.clone(),
            audit.clone(),
            config.retention.clone(),
        ));

        Ok(Self {
            config,
            store,
            classifier,
            audit,
            gate,
            encryption,
            pipeline,
            router,
            registry,
            retention,
        })
    }

    /// Read-only audit API
    pub fn api_router(&self) -> Router {
        audit_router(AuditState {
            logger: self.audit.clone(),
        })
    }

    /// Start the periodic retention sweep if enabled
    pub fn start_retention(&self) -> Option<RetentionScheduler> {
        if !self.config.retention.enabled {
            tracing::info!("Retention sweep disabled");
            return None;
        }
        Some(RetentionScheduler::spawn(
            self.retention.clone(),
            Duration::from_secs(self.config.retention.interval_secs.max(1)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EndpointComplianceStatus, Environment, EndpointConfig, OutboundEvent, SensitivityLevel};
    use crate::store::AuditFilter;
    use serde_json::json;

    #[tokio::test]
    async fn test_local_wiring_routes_and_audits() {
        let config = SafeHookConfig::default();
        let collaborators = Collaborators::local(&config).await.unwrap();
        let service = SafeHook::new(config, collaborators).unwrap();

        let mut endpoint = EndpointConfig::new("t1", "https://hooks.partner.com", Environment::Production);
        endpoint.sensitivity_ceiling = SensitivityLevel::Limited;
        endpoint.compliance_status = EndpointComplianceStatus::Compliant;
        service.registry.create(endpoint).await.unwrap();

        // Full-sensitivity event is blocked before any network call
        let event = OutboundEvent::new("patient.updated", json!({"ssn": "123-45-6789"}));
        let report = service
            .router
            .route("t1", Environment::Production, &event)
            .await
            .unwrap();
        assert_eq!(report.blocked.len(), 1);

        let stats = service.audit.stats(&AuditFilter::default()).await.unwrap();
        assert_eq!(stats.by_status.violation, 1);
    }

    #[tokio::test]
    async fn test_data_dir_persists_across_services() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = SafeHookConfig::default();
        config.store.data_dir = Some(dir.path().to_path_buf());

        let first = SafeHook::new(config.clone(), Collaborators::local(&config).await.unwrap()).unwrap();
        let mut endpoint = EndpointConfig::new("t1", "https://hooks.partner.com", Environment::Production);
        endpoint.sensitivity_ceiling = SensitivityLevel::Limited;
        endpoint.compliance_status = EndpointComplianceStatus::Compliant;
        first.registry.create(endpoint.clone()).await.unwrap();

        // A later process sees the endpoint and its creation audit entry
        let second = SafeHook::new(config.clone(), Collaborators::local(&config).await.unwrap()).unwrap();
        assert!(second.store.get_endpoint(endpoint.id).await.unwrap().is_some());
        let stats = second.audit.stats(&AuditFilter::default()).await.unwrap();
        assert_eq!(stats.total, 1);
        let report = second.retention.sweep_all().await.unwrap();
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = SafeHookConfig::default();
        config.delivery.max_concurrency = 0;
        let collaborators = Collaborators::local(&SafeHookConfig::default()).await.unwrap();
        assert!(SafeHook::new(config, collaborators).is_err());
    }
}
