//! Compliance gating of endpoint configurations and deliveries

mod gate;

pub use gate::{agreement_verified, ComplianceGate, ComplianceReport};
