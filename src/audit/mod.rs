//! Compliance audit trail and its read-only HTTP API

pub mod handler;
mod logger;

pub use handler::{audit_router, AuditState};
pub use logger::{AuditLogger, AuditStats, RiskCounts, StatusCounts};
