//! HTTP handlers for the audit API
//!
//! Read-only access to the compliance trail:
//! - GET /api/v1/audit/entries      : list entries (newest first, filterable)
//! - GET /api/v1/audit/entries/:id  : get a single entry
//! - GET /api/v1/audit/stats        : totals by risk and compliance status
//! - GET /health

use super::AuditLogger;
use crate::error::to_json;
use crate::models::AuditComplianceStatus;
use crate::store::AuditFilter;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Shared state for audit handlers
#[derive(Clone)]
pub struct AuditState {
    pub logger: AuditLogger,
}

/// Create the audit router
pub fn audit_router(state: AuditState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/audit/entries", get(list_entries))
        .route("/api/v1/audit/entries/:id", get(get_entry))
        .route("/api/v1/audit/stats", get(get_stats))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListEntriesQuery {
    endpoint: Option<Uuid>,
    tenant: Option<String>,
    status: Option<AuditComplianceStatus>,
    limit: Option<usize>,
}

fn error_body(code: &str, message: String) -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": {"code": code, "message": message}}))
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/v1/audit/entries
async fn list_entries(
    State(state): State<AuditState>,
    Query(params): Query<ListEntriesQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let filter = AuditFilter {
        tenant_id: params.tenant,
        endpoint_id: params.endpoint,
        compliance_status: params.status,
        ..Default::default()
    };

    match state.logger.entries(&filter, limit).await {
        Ok(entries) => (StatusCode::OK, Json(to_json(&entries))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("STORE_ERROR", e.to_string()),
        ),
    }
}

/// GET /api/v1/audit/entries/:id
async fn get_entry(State(state): State<AuditState>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return (
            StatusCode::NOT_FOUND,
            error_body("NOT_FOUND", format!("Audit entry {} not found", id)),
        );
    };

    match state.logger.get(uuid).await {
        Ok(Some(entry)) => (StatusCode::OK, Json(to_json(&entry))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_body("NOT_FOUND", format!("Audit entry {} not found", id)),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("STORE_ERROR", e.to_string()),
        ),
    }
}

/// GET /api/v1/audit/stats
async fn get_stats(State(state): State<AuditState>) -> impl IntoResponse {
    match state.logger.stats(&AuditFilter::default()).await {
        Ok(stats) => (StatusCode::OK, Json(to_json(&stats))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("STORE_ERROR", e.to_string()),
        ),
    }
}
