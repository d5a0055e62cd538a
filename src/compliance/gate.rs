//! Pre-transmission compliance policy
//!
//! Three checks, all evaluated against an [`EndpointConfig`]:
//! - creation: is this endpoint configuration acceptable at all
//! - delivery: may this endpoint receive data of a given sensitivity now
//! - environment segregation: does the event's environment match the endpoint
//!
//! The evaluations are pure. [`ComplianceGate::check_delivery`] additionally
//! records exactly one violation entry whenever it finds a blocker.

use crate::audit::AuditLogger;
use crate::config::ComplianceConfig;
use crate::error::{Error, Result};
use crate::models::{
    AuditEntry, AuditEventKind, EndpointComplianceStatus, EndpointConfig, Environment, RiskLevel,
    SensitivityLevel,
};
use crate::privacy::ClassificationResult;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Outcome of a compliance evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub compliant: bool,
    /// Findings that stop the operation
    pub blockers: Vec<String>,
    /// Findings that are recorded but do not stop it
    pub warnings: Vec<String>,
    pub risk_level: RiskLevel,
}

impl ComplianceReport {
    fn new(blockers: Vec<String>, warnings: Vec<String>, risk_level: RiskLevel) -> Self {
        Self {
            compliant: blockers.is_empty(),
            blockers,
            warnings,
            risk_level,
        }
    }

    /// Convert blockers into a `ComplianceViolation` error
    pub fn into_result(self) -> Result<Self> {
        if self.compliant {
            Ok(self)
        } else {
            Err(Error::ComplianceViolation(self.blockers))
        }
    }
}

/// Risk escalation as blockers accumulate
fn escalate(blockers: usize, warnings: usize) -> RiskLevel {
    match blockers {
        0 if warnings == 0 => RiskLevel::Low,
        0 => RiskLevel::Medium,
        1 => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

/// Compliance gate
pub struct ComplianceGate {
    audit: AuditLogger,
    config: ComplianceConfig,
}

impl ComplianceGate {
    pub fn new(audit: AuditLogger, config: ComplianceConfig) -> Self {
        Self { audit, config }
    }

    pub fn config(&self) -> &ComplianceConfig {
        &self.config
    }

    /// Validate an endpoint configuration before it is stored
    pub fn validate_creation(&self, endpoint: &EndpointConfig, now: DateTime<Utc>) -> ComplianceReport {
        let mut blockers = Vec::new();
        let mut warnings = Vec::new();

        match Url::parse(&endpoint.url) {
            Ok(url) => {
                if url.scheme() != "https" {
                    blockers.push(format!("endpoint URL must use https, got '{}'", url.scheme()));
                }
                match url.host_str() {
                    Some(host) if !self.is_approved_domain(host) => {
                        warnings.push(format!("external domain '{}' is not on the approved list", host));
                    }
                    Some(_) => {}
                    None => blockers.push("endpoint URL has no host".to_string()),
                }
            }
            Err(e) => blockers.push(format!("invalid endpoint URL: {}", e)),
        }

        if endpoint.sensitivity_ceiling != SensitivityLevel::None
            && endpoint.compliance_status == EndpointComplianceStatus::NonCompliant
        {
            blockers.push(format!(
                "sensitivity ceiling '{}' is not allowed for a non-compliant endpoint",
                endpoint.sensitivity_ceiling
            ));
        }

        if endpoint.agreement_expired(now) {
            blockers.push("data-handling agreement has expired".to_string());
        } else if endpoint.sensitivity_ceiling != SensitivityLevel::None
            && endpoint.agreement_signed_at.is_none()
        {
            warnings.push("no signed data-handling agreement on file".to_string());
        }

        if endpoint.timeout_secs < self.config.min_timeout_secs
            || endpoint.timeout_secs > self.config.max_timeout_secs
        {
            blockers.push(format!(
                "timeout {}s outside allowed range {}..={}s",
                endpoint.timeout_secs, self.config.min_timeout_secs, self.config.max_timeout_secs
            ));
        }

        if let Some(days) = endpoint.retention_days {
            if days > self.config.max_retention_days {
                blockers.push(format!(
                    "retention of {} days exceeds the maximum of {} days",
                    days, self.config.max_retention_days
                ));
            }
        }

        let risk = escalate(blockers.len(), warnings.len());
        ComplianceReport::new(blockers, warnings, risk)
    }

    /// Evaluate whether `endpoint` may receive data of `level`. Pure.
    pub fn evaluate_delivery(
        &self,
        endpoint: &EndpointConfig,
        level: SensitivityLevel,
        now: DateTime<Utc>,
    ) -> ComplianceReport {
        let mut blockers = Vec::new();
        let mut warnings = Vec::new();

        if !endpoint.active {
            blockers.push("endpoint is inactive".to_string());
        }
        if level > endpoint.sensitivity_ceiling {
            blockers.push(format!(
                "event sensitivity '{}' exceeds endpoint ceiling '{}'",
                level, endpoint.sensitivity_ceiling
            ));
        }
        match endpoint.compliance_status {
            EndpointComplianceStatus::NonCompliant => {
                blockers.push("endpoint is marked non-compliant".to_string())
            }
            EndpointComplianceStatus::Pending => {
                warnings.push("endpoint compliance review is pending".to_string())
            }
            EndpointComplianceStatus::Compliant => {}
        }
        if endpoint.agreement_expired(now) {
            blockers.push("data-handling agreement has expired".to_string());
        }
        if level != SensitivityLevel::None && endpoint.encryption_required && !is_https(&endpoint.url) {
            blockers.push("sensitive data requires an https endpoint".to_string());
        }
        if level == SensitivityLevel::Full && endpoint.vendor_name.is_none() {
            warnings.push("no vendor name recorded for a full-sensitivity recipient".to_string());
        }

        let risk = if blockers.is_empty() {
            RiskLevel::for_sensitivity(level)
        } else if level == SensitivityLevel::Full || blockers.len() > 1 {
            RiskLevel::Critical
        } else {
            RiskLevel::High
        };
        ComplianceReport::new(blockers, warnings, risk)
    }

    /// Gate a delivery. A report with blockers is returned as-is after one
    /// violation entry has been recorded; the caller must not proceed.
    pub async fn check_delivery(
        &self,
        endpoint: &EndpointConfig,
        classification: &ClassificationResult,
        entity_ids: &[String],
    ) -> Result<ComplianceReport> {
        let now = Utc::now();
        let report = self.evaluate_delivery(endpoint, classification.level, now);

        if !report.compliant {
            let kind = if classification.is_sensitive() {
                AuditEventKind::PhiAccessed
            } else {
                AuditEventKind::DataTransmitted
            };
            let mut entry = AuditEntry::new(endpoint, kind)
                .with_sensitivity(classification.level, &classification.fields)
                .with_entities(entity_ids.to_vec())
                .with_risk(report.risk_level)
                .with_details(serde_json::json!({
                    "stage": "check_delivery",
                    "blockers": report.blockers,
                    "warnings": report.warnings,
                }))
                .violation();
            entry.agreement_verified = agreement_verified(endpoint, now);
            self.audit.record(entry).await?;
        } else if !report.warnings.is_empty() {
            tracing::debug!(
                endpoint_id = %endpoint.id,
                warnings = ?report.warnings,
                "Delivery allowed with warnings"
            );
        }

        Ok(report)
    }

    /// Block cross-environment delivery and production endpoints whose
    /// host looks non-production. Pure.
    pub fn validate_environment_segregation(
        &self,
        endpoint: &EndpointConfig,
        requested: Environment,
    ) -> ComplianceReport {
        let mut blockers = Vec::new();

        if endpoint.environment != requested {
            blockers.push(format!(
                "cross-environment delivery: endpoint is {}, event is {}",
                endpoint.environment, requested
            ));
        }

        if endpoint.environment == Environment::Production {
            if let Some(host) = host_of(&endpoint.url) {
                if let Some(marker) = self.non_production_marker(&host) {
                    blockers.push(format!(
                        "production endpoint host '{}' looks non-production ('{}')",
                        host, marker
                    ));
                }
            }
        }

        let risk = escalate(blockers.len(), 0);
        ComplianceReport::new(blockers, Vec::new(), risk)
    }

    fn is_approved_domain(&self, host: &str) -> bool {
        // An empty list means no domain review is configured
        self.config.approved_domains.is_empty()
            || self
                .config
                .approved_domains
                .iter()
                .any(|d| host == d || host.ends_with(&format!(".{}", d)))
    }

    fn non_production_marker(&self, host: &str) -> Option<&str> {
        let host = host.to_ascii_lowercase();
        self.config
            .non_production_markers
            .iter()
            .map(String::as_str)
            .find(|marker| host == *marker || host.split(['.', '-']).any(|label| label == *marker))
    }
}

/// Whether an unexpired agreement is on file
pub fn agreement_verified(endpoint: &EndpointConfig, now: DateTime<Utc>) -> bool {
    endpoint.agreement_signed_at.is_some() && !endpoint.agreement_expired(now)
}

fn is_https(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| u.scheme() == "https")
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}
