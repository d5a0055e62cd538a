//! Store with file-based JSON persistence
//!
//! Directory layout:
//! ```text
//! <data_dir>/
//! └── store.json
//! ```
//!
//! Every call reloads the file so that separate processes (the CLI and a
//! running server) see each other's writes. Writes go to a temporary file
//! that is renamed over `store.json`. Writers in different processes are
//! not coordinated; only one process may mutate a directory at a time.

use super::memory::{MemoryStore, Snapshot};
use super::{AttemptFilter, AuditFilter, DeliveryFilter, EndpointFilter, Store};
use crate::error::{Error, Result};
use crate::models::{AuditEntry, Delivery, DeliveryAttempt, EndpointConfig, SigningSecretRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

const STORE_FILE: &str = "store.json";

/// Record store persisted as one JSON document
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (or create) a store under `dir`, failing on an unreadable file
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Store(format!("Failed to create {}: {}", dir.display(), e)))?;

        let store = Self {
            path: dir.join(STORE_FILE),
            lock: Mutex::new(()),
        };
        let records = store.load().await?.snapshot().await;
        tracing::info!(
            path = %store.path.display(),
            endpoints = records.endpoints.len(),
            deliveries = records.deliveries.len(),
            audit = records.audit.len(),
            "Opened file store"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<MemoryStore> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(MemoryStore::new()),
            Err(e) => {
                return Err(Error::Store(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let snapshot: Snapshot = serde_json::from_str(&data)
            .map_err(|e| Error::Store(format!("Corrupt store file {}: {}", self.path.display(), e)))?;
        Ok(MemoryStore::from_snapshot(snapshot))
    }

    async fn save(&self, store: &MemoryStore) -> Result<()> {
        let json = serde_json::to_string_pretty(&store.snapshot().await)
            .map_err(|e| Error::Store(format!("Failed to serialize store: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Store(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Store(format!("Failed to replace {}: {}", self.path.display(), e)))
    }

    /// Persist only when something changed
    async fn save_if(&self, store: &MemoryStore, changed: usize) -> Result<usize> {
        if changed > 0 {
            self.save(store).await?;
        }
        Ok(changed)
    }
}

#[async_trait]
impl Store for FileStore {
    // ---- Endpoints ----

    async fn insert_endpoint(&self, endpoint: EndpointConfig) -> Result<()> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        store.insert_endpoint(endpoint).await?;
        self.save(&store).await
    }

    async fn update_endpoint(&self, endpoint: EndpointConfig) -> Result<()> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        store.update_endpoint(endpoint).await?;
        self.save(&store).await
    }

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<EndpointConfig>> {
        let _guard = self.lock.lock().await;
        self.load().await?.get_endpoint(id).await
    }

    async fn list_endpoints(&self, filter: &EndpointFilter) -> Result<Vec<EndpointConfig>> {
        let _guard = self.lock.lock().await;
        self.load().await?.list_endpoints(filter).await
    }

    async fn tenants(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.load().await?.tenants().await
    }

    // ---- Deliveries ----

    async fn insert_delivery(&self, delivery: Delivery) -> Result<()> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        store.insert_delivery(delivery).await?;
        self.save(&store).await
    }

    async fn update_delivery(&self, delivery: Delivery) -> Result<()> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        store.update_delivery(delivery).await?;
        self.save(&store).await
    }

    async fn get_delivery(&self, id: Uuid) -> Result<Option<Delivery>> {
        let _guard = self.lock.lock().await;
        self.load().await?.get_delivery(id).await
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>> {
        let _guard = self.lock.lock().await;
        self.load().await?.list_deliveries(filter).await
    }

    async fn redact_delivery_payloads(&self, filter: &DeliveryFilter, at: DateTime<Utc>) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        let changed = store.redact_delivery_payloads(filter, at).await?;
        self.save_if(&store, changed).await
    }

    async fn delete_deliveries(&self, filter: &DeliveryFilter) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        let changed = store.delete_deliveries(filter).await?;
        self.save_if(&store, changed).await
    }

    // ---- Delivery attempts ----

    async fn insert_attempt(&self, attempt: DeliveryAttempt) -> Result<()> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        store.insert_attempt(attempt).await?;
        self.save(&store).await
    }

    async fn list_attempts(&self, filter: &AttemptFilter) -> Result<Vec<DeliveryAttempt>> {
        let _guard = self.lock.lock().await;
        self.load().await?.list_attempts(filter).await
    }

    async fn delete_attempts(&self, filter: &AttemptFilter) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        let changed = store.delete_attempts(filter).await?;
        self.save_if(&store, changed).await
    }

    // ---- Signing secret references ----

    async fn insert_signing_secret(&self, secret: SigningSecretRef) -> Result<()> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        store.insert_signing_secret(secret).await?;
        self.save(&store).await
    }

    async fn deactivate_signing_secrets(&self, endpoint_id: Uuid) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        let changed = store.deactivate_signing_secrets(endpoint_id).await?;
        self.save_if(&store, changed).await
    }

    async fn active_signing_secret(&self, endpoint_id: Uuid) -> Result<Option<SigningSecretRef>> {
        let _guard = self.lock.lock().await;
        self.load().await?.active_signing_secret(endpoint_id).await
    }

    // ---- Audit ----

    async fn insert_audit(&self, entry: AuditEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        store.insert_audit(entry).await?;
        self.save(&store).await
    }

    async fn get_audit(&self, id: Uuid) -> Result<Option<AuditEntry>> {
        let _guard = self.lock.lock().await;
        self.load().await?.get_audit(id).await
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let _guard = self.lock.lock().await;
        self.load().await?.list_audit(filter).await
    }

    async fn redact_audit_entries(&self, filter: &AuditFilter, at: DateTime<Utc>) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let store = self.load().await?;
        let changed = store.redact_audit_entries(filter, at).await?;
        self.save_if(&store, changed).await
    }
}
