//! Retention sweep
//!
//! For every endpoint with a retention period, in order:
//! 1. delete delivery attempts older than `retention_days`
//! 2. tombstone stored payloads older than `retention_days` (sensitive
//!    endpoints only; status and timestamps stay)
//! 3. hard-delete deliveries older than `max(2 × retention_days, floor)`
//! 4. redact audit entries older than `max(3 × retention_days, floor)`
//!
//! Tenants are swept independently; one tenant's failure is reported and
//! the sweep moves on.

mod scheduler;

pub use scheduler::RetentionScheduler;

use crate::audit::AuditLogger;
use crate::config::RetentionConfig;
use crate::error::{Error, Result};
use crate::models::{AuditEntry, AuditEventKind, EndpointConfig, SensitivityLevel};
use crate::store::{AttemptFilter, AuditFilter, DeliveryFilter, EndpointFilter, Store};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// What the sweep did for one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRetention {
    pub endpoint_id: Uuid,
    pub retention_days: u32,
    pub attempts_deleted: usize,
    pub payloads_redacted: usize,
    pub deliveries_deleted: usize,
    pub audit_entries_redacted: usize,
}

/// What the sweep did for one tenant
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRetention {
    pub tenant_id: String,
    pub endpoints: Vec<EndpointRetention>,
}

/// Result of sweeping several tenants
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub succeeded: Vec<TenantRetention>,
    /// (tenant, error message)
    pub failed: Vec<(String, String)>,
}

/// Applies per-endpoint retention policies
pub struct RetentionManager {
    store: Arc<dyn Store>,
    audit: AuditLogger,
    config: RetentionConfig,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn Store>, audit: AuditLogger, config: RetentionConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Sweep every endpoint of one tenant
    pub async fn apply_for_tenant(&self, tenant_id: &str) -> Result<TenantRetention> {
        self.apply_for_tenant_at(tenant_id, Utc::now()).await
    }

    /// [`apply_for_tenant`](Self::apply_for_tenant) against an explicit clock
    pub async fn apply_for_tenant_at(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<TenantRetention> {
        let endpoints = self
            .store
            .list_endpoints(&EndpointFilter {
                tenant_id: Some(tenant_id.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Retention(format!("tenant {}: {}", tenant_id, e)))?;

        let mut report = TenantRetention {
            tenant_id: tenant_id.to_string(),
            endpoints: Vec::new(),
        };
        for endpoint in endpoints.iter().filter(|e| e.retention_days.is_some()) {
            let outcome = self
                .apply_for_endpoint(endpoint, now)
                .await
                .map_err(|e| {
                    Error::Retention(format!("tenant {} endpoint {}: {}", tenant_id, endpoint.id, e))
                })?;
            report.endpoints.push(outcome);
        }
        Ok(report)
    }

    async fn apply_for_endpoint(&self, endpoint: &EndpointConfig, now: DateTime<Utc>) -> Result<EndpointRetention> {
        let Some(days) = endpoint.retention_days else {
            return Ok(EndpointRetention {
                endpoint_id: endpoint.id,
                ..Default::default()
            });
        };
        let cutoff = cutoff_at(now, days)?;
        let delete_cutoff = cutoff_at(now, days.saturating_mul(2).max(self.config.delivery_floor_days))?;
        let audit_cutoff = cutoff_at(now, days.saturating_mul(3).max(self.config.audit_floor_days))?;

        let attempts_deleted = self
            .store
            .delete_attempts(&AttemptFilter {
                endpoint_id: Some(endpoint.id),
                created_before: Some(cutoff),
                ..Default::default()
            })
            .await?;

        let payloads_redacted = if endpoint.sensitivity_ceiling != SensitivityLevel::None {
            self.store
                .redact_delivery_payloads(
                    &DeliveryFilter {
                        endpoint_id: Some(endpoint.id),
                        created_before: Some(cutoff),
                        redacted: Some(false),
                        ..Default::default()
                    },
                    now,
                )
                .await?
        } else {
            0
        };

        let deliveries_deleted = self
            .store
            .delete_deliveries(&DeliveryFilter {
                endpoint_id: Some(endpoint.id),
                created_before: Some(delete_cutoff),
                ..Default::default()
            })
            .await?;

        let audit_entries_redacted = self
            .store
            .redact_audit_entries(
                &AuditFilter {
                    endpoint_id: Some(endpoint.id),
                    created_before: Some(audit_cutoff),
                    redacted: Some(false),
                    ..Default::default()
                },
                now,
            )
            .await?;

        let outcome = EndpointRetention {
            endpoint_id: endpoint.id,
            retention_days: days,
            attempts_deleted,
            payloads_redacted,
            deliveries_deleted,
            audit_entries_redacted,
        };

        let mut entry = AuditEntry::new(endpoint, AuditEventKind::RetentionPolicyApplied)
            .with_details(crate::error::to_json(&outcome));
        entry.retention_applied = true;
        self.audit.record(entry).await?;

        tracing::info!(
            endpoint_id = %endpoint.id,
            attempts_deleted,
            payloads_redacted,
            deliveries_deleted,
            audit_entries_redacted,
            "Retention policy applied"
        );
        Ok(outcome)
    }

    /// Sweep the given tenants sequentially, isolating failures
    pub async fn sweep(&self, tenants: &[String]) -> SweepReport {
        let mut report = SweepReport::default();
        for tenant in tenants {
            match self.apply_for_tenant(tenant).await {
                Ok(result) => report.succeeded.push(result),
                Err(e) => {
                    tracing::error!(tenant_id = %tenant, error = %e, "Retention sweep failed for tenant");
                    report.failed.push((tenant.clone(), e.to_string()));
                }
            }
        }
        report
    }

    /// Sweep every tenant known to the store
    pub async fn sweep_all(&self) -> Result<SweepReport> {
        let tenants = self.store.tenants().await?;
        Ok(self.sweep(&tenants).await)
    }
}

/// `now - days`, or a retention error when that instant is not representable
fn cutoff_at(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    Duration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| Error::Retention(format!("retention of {} days is out of range", days)))
}
