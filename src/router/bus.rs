//! Event-bus collaborator

use crate::config::MAX_EVENT_BUS_BATCH;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One entry in a bus publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEntry {
    pub source: String,
    /// Type tag, e.g. `patient.updated`
    pub detail_type: String,
    /// JSON-encoded detail
    pub detail: String,
    pub event_bus_name: String,
}

/// Event bus accepting batches of at most [`MAX_EVENT_BUS_BATCH`] entries
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn put_entries(&self, entries: Vec<BusEntry>) -> Result<()>;
}

/// Event bus that keeps every accepted batch in memory
#[derive(Default)]
pub struct InMemoryEventBus {
    batches: RwLock<Vec<Vec<BusEntry>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn batches(&self) -> Vec<Vec<BusEntry>> {
        self.batches.read().await.clone()
    }

    pub async fn entry_count(&self) -> usize {
        self.batches.read().await.iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn put_entries(&self, entries: Vec<BusEntry>) -> Result<()> {
        if entries.len() > MAX_EVENT_BUS_BATCH {
            return Err(Error::EventBus(format!(
                "Batch of {} exceeds limit of {}",
                entries.len(),
                MAX_EVENT_BUS_BATCH
            )));
        }
        self.batches.write().await.push(entries);
        Ok(())
    }
}
