//! SafeHook - Compliance-gated, field-encrypted event delivery
//!
//! SafeHook delivers application events (patient, claim and authorization
//! lifecycle changes) to subscriber webhooks while keeping protected health
//! information under control.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Event Router                             │
//! │   classify once ─► select endpoints ─► N pipelines (bounded)      │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ per endpoint
//! ┌───────────────────────────────▼──────────────────────────────────┐
//! │                        Delivery Pipeline                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────┐  ┌────────────┐  │
//! │  │ Compliance   │─►│ Envelope     │─►│ Signer │─►│ Executor   │  │
//! │  │ Gate         │  │ Encryption   │  │ (HMAC) │  │ (1 attempt)│  │
//! │  └──────┬───────┘  └──────┬───────┘  └────────┘  └─────┬──────┘  │
//! │         └─────────────────┴──────────┬─────────────────┘         │
//! │                                      ▼                            │
//! │                              Audit Logger                         │
//! └──────────────────────────────────────┬───────────────────────────┘
//!                                        │
//!                    ┌───────────────────▼──────────────────┐
//!                    │  Store (endpoints, deliveries,       │
//!                    │  attempts, secrets, audit)           │
//!                    └───────────────────▲──────────────────┘
//!                                        │ scheduled
//!                              Retention Manager
//! ```
//!
//! ## Modules
//!
//! - [`privacy`]: Sensitivity classification of payloads
//! - [`crypto`]: Field-level envelope encryption and key management
//! - [`signing`]: HMAC signatures with externally held secrets
//! - [`compliance`]: Endpoint and delivery compliance gate
//! - [`delivery`]: Transport, executor and delivery pipeline
//! - [`audit`]: Append-only audit trail and its HTTP API
//! - [`retention`]: Scheduled purge and redaction
//! - [`router`]: Event fan-out and event-bus publication
//! - [`registry`]: Endpoint configuration lifecycle
//! - [`store`]: Persistence collaborator
//! - [`config`]: Configuration management

pub mod audit;
pub mod compliance;
pub mod config;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod models;
pub mod payload;
pub mod privacy;
pub mod registry;
pub mod retention;
pub mod router;
pub mod service;
pub mod signing;
pub mod store;

pub use config::SafeHookConfig;
pub use error::{Error, Result};
pub use service::{Collaborators, SafeHook};
