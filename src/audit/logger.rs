//! Append-only compliance audit trail

use crate::error::Result;
use crate::models::{AuditComplianceStatus, AuditEntry, RiskLevel};
use crate::store::{AuditFilter, Store};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Records one entry per significant decision and serves read queries.
///
/// The logger has no update path; long-horizon redaction is performed by
/// the retention sweep directly against the store.
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn Store>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append an entry
    pub async fn record(&self, entry: AuditEntry) -> Result<Uuid> {
        let id = entry.id;
        match entry.compliance_status {
            AuditComplianceStatus::Violation => tracing::warn!(
                audit_id = %id,
                endpoint_id = %entry.endpoint_id,
                kind = ?entry.kind,
                risk = ?entry.risk_level,
                sensitivity = %entry.sensitivity,
                "Compliance violation recorded"
            ),
            _ => tracing::info!(
                audit_id = %id,
                endpoint_id = %entry.endpoint_id,
                kind = ?entry.kind,
                risk = ?entry.risk_level,
                "Audit entry recorded"
            ),
        }
        self.store.insert_audit(entry).await?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<AuditEntry>> {
        self.store.get_audit(id).await
    }

    /// Matching entries, newest first, truncated to `limit`
    pub async fn entries(&self, filter: &AuditFilter, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut entries = self.store.list_audit(filter).await?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// Totals by risk level and compliance status
    pub async fn stats(&self, filter: &AuditFilter) -> Result<AuditStats> {
        let entries = self.store.list_audit(filter).await?;
        let mut stats = AuditStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            match entry.risk_level {
                RiskLevel::Low => stats.by_risk.low += 1,
                RiskLevel::Medium => stats.by_risk.medium += 1,
                RiskLevel::High => stats.by_risk.high += 1,
                RiskLevel::Critical => stats.by_risk.critical += 1,
            }
            match entry.compliance_status {
                AuditComplianceStatus::Compliant => stats.by_status.compliant += 1,
                AuditComplianceStatus::Violation => stats.by_status.violation += 1,
                AuditComplianceStatus::UnderReview => stats.by_status.under_review += 1,
            }
            if entry.redacted_at.is_some() {
                stats.redacted += 1;
            }
        }
        Ok(stats)
    }
}

/// Audit trail summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total: usize,
    pub redacted: usize,
    pub by_risk: RiskCounts,
    pub by_status: StatusCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RiskCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub compliant: usize,
    pub violation: usize,
    pub under_review: usize,
}
