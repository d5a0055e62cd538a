//! Single-attempt delivery executor
//!
//! Builds the compliance headers, issues one POST under a hard timeout and
//! captures the outcome. Retrying is the caller's business.

use super::transport::{OutboundRequest, Transport};
use crate::error::Error;
use crate::models::SensitivityLevel;
use crate::signing::SignatureOutcome;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const HEADER_WEBHOOK_ID: &str = "X-Webhook-Id";
pub const HEADER_ENDPOINT_ID: &str = "X-Webhook-Endpoint";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_SENSITIVITY: &str = "X-Data-Sensitivity";
pub const HEADER_SIGNATURE_METHOD: &str = "X-Webhook-Signature-Method";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
pub const HEADER_SIGNATURE_STATUS: &str = "X-Webhook-Signature-Status";
pub const HEADER_ENCRYPTION_ENVELOPE: &str = "X-Encryption-Envelope";

/// Compliance metadata sent with every delivery
#[derive(Debug, Clone)]
pub struct DeliveryHeaders {
    pub delivery_id: Uuid,
    pub endpoint_id: Uuid,
    /// Unix seconds; the same value that was signed
    pub timestamp: i64,
    pub sensitivity: SensitivityLevel,
    pub signature: SignatureOutcome,
    /// Base64 envelope summary, present when fields were encrypted
    pub envelope: Option<String>,
}

impl DeliveryHeaders {
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (HEADER_WEBHOOK_ID.to_string(), self.delivery_id.to_string()),
            (HEADER_ENDPOINT_ID.to_string(), self.endpoint_id.to_string()),
            (HEADER_TIMESTAMP.to_string(), self.timestamp.to_string()),
            (HEADER_SENSITIVITY.to_string(), self.sensitivity.to_string()),
            (HEADER_SIGNATURE_METHOD.to_string(), self.signature.method.clone()),
            (HEADER_SIGNATURE_STATUS.to_string(), self.signature.status.to_string()),
        ];
        if let Some(value) = &self.signature.value {
            headers.push((HEADER_SIGNATURE.to_string(), value.clone()));
        }
        if let Some(envelope) = &self.envelope {
            headers.push((HEADER_ENCRYPTION_ENVELOPE.to_string(), envelope.clone()));
        }
        headers
    }
}

/// What happened on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub http_status: Option<u16>,
    /// Truncated response body
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// Performs exactly one transmission per call
pub struct DeliveryExecutor {
    transport: Arc<dyn Transport>,
    response_body_limit: usize,
}

impl DeliveryExecutor {
    pub fn new(transport: Arc<dyn Transport>, response_body_limit: usize) -> Self {
        Self {
            transport,
            response_body_limit,
        }
    }

    /// POST `body` to `url`. Network errors, timeouts and non-2xx statuses
    /// are all reported as unsuccessful outcomes rather than errors.
    pub async fn execute(
        &self,
        url: &str,
        headers: &DeliveryHeaders,
        body: String,
        timeout: Duration,
    ) -> ExecutionOutcome {
        let request = OutboundRequest {
            url: url.to_string(),
            headers: headers.to_pairs(),
            body,
            timeout,
            max_response_bytes: self.response_body_limit,
        };

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.transport.post(&request))
            .await
            .unwrap_or_else(|_| Err(Error::Timeout(format!("request exceeded {:?}", timeout))));
        let latency_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(response) => {
                let success = (200..300).contains(&response.status);
                ExecutionOutcome {
                    success,
                    http_status: Some(response.status),
                    response_body: Some(truncate_body(&response.body, self.response_body_limit)),
                    error: (!success).then(|| format!("Endpoint returned HTTP {}", response.status)),
                    latency_ms,
                }
            }
            Err(e) => ExecutionOutcome {
                success: false,
                http_status: None,
                response_body: None,
                error: Some(e.to_string()),
                latency_ms,
            },
        };

        if outcome.success {
            tracing::info!(
                delivery_id = %headers.delivery_id,
                endpoint_id = %headers.endpoint_id,
                status = ?outcome.http_status,
                latency_ms,
                "Delivery succeeded"
            );
        } else {
            tracing::warn!(
                delivery_id = %headers.delivery_id,
                endpoint_id = %headers.endpoint_id,
                status = ?outcome.http_status,
                error = ?outcome.error,
                latency_ms,
                "Delivery failed"
            );
        }
        outcome
    }
}

/// Cut `body` to at most `limit` bytes on a char boundary
pub fn truncate_body(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
