//! Event fan-out
//!
//! `route` classifies an event once and runs one delivery pipeline per
//! eligible endpoint, bounded by `delivery.max_concurrency`. `publish`
//! hands events to the event bus in chunks the bus accepts.

mod bus;

pub use bus::{BusEntry, EventBus, InMemoryEventBus};

use crate::config::{EventBusConfig, MAX_EVENT_BUS_BATCH};
use crate::delivery::DeliveryPipeline;
use crate::error::{Error, Result};
use crate::models::{DeliveryStatus, Environment, OutboundEvent, SensitivityLevel};
use crate::privacy::Classifier;
use crate::store::{EndpointFilter, Store};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of routing one event
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingReport {
    pub event_id: Uuid,
    pub sensitivity: SensitivityLevel,
    pub sensitive_fields: Vec<String>,
    /// Delivery ids that reached their endpoint
    pub delivered: Vec<Uuid>,
    /// Delivery ids whose transmission failed
    pub failed: Vec<Uuid>,
    /// Endpoints the compliance gate refused
    pub blocked: Vec<EndpointFailure>,
    /// Endpoints where the pipeline errored before transmission
    pub errored: Vec<EndpointFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointFailure {
    pub endpoint_id: Uuid,
    pub reasons: Vec<String>,
}

/// Routes events to subscriber endpoints
pub struct EventRouter {
    store: Arc<dyn Store>,
    classifier: Arc<Classifier>,
    pipeline: DeliveryPipeline,
    bus: Arc<dyn EventBus>,
    bus_config: EventBusConfig,
    max_concurrency: usize,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn Store>,
        classifier: Arc<Classifier>,
        pipeline: DeliveryPipeline,
        bus: Arc<dyn EventBus>,
        bus_config: EventBusConfig,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            classifier,
            pipeline,
            bus,
            bus_config,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Deliver `event` to every active endpoint of `tenant_id` in
    /// `environment` that subscribes to its type
    pub async fn route(
        &self,
        tenant_id: &str,
        environment: Environment,
        event: &OutboundEvent,
    ) -> Result<RoutingReport> {
        let classification = self.classifier.classify(&event.payload);

        let endpoints: Vec<_> = self
            .store
            .list_endpoints(&EndpointFilter {
                tenant_id: Some(tenant_id.to_string()),
                environment: Some(environment),
                active: Some(true),
            })
            .await?
            .into_iter()
            .filter(|e| e.subscribes_to(&event.event_type))
            .collect();

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            tenant_id,
            sensitivity = %classification.level,
            endpoints = endpoints.len(),
            "Routing event"
        );

        let results: Vec<_> = stream::iter(endpoints)
            .map(|endpoint| {
                let classification = &classification;
                async move {
                    let result = self
                        .pipeline
                        .deliver(&endpoint, event, classification, environment)
                        .await;
                    (endpoint.id, result)
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = RoutingReport {
            event_id: event.id,
            sensitivity: classification.level,
            sensitive_fields: classification.fields.clone(),
            ..Default::default()
        };
        for (endpoint_id, result) in results {
            match result {
                Ok(delivery) if delivery.status == DeliveryStatus::Delivered => {
                    report.delivered.push(delivery.id)
                }
                Ok(delivery) => report.failed.push(delivery.id),
                Err(Error::ComplianceViolation(reasons)) => {
                    report.blocked.push(EndpointFailure { endpoint_id, reasons })
                }
                Err(e) => {
                    tracing::error!(endpoint_id = %endpoint_id, error = %e, "Delivery pipeline error");
                    report.errored.push(EndpointFailure {
                        endpoint_id,
                        reasons: vec![e.to_string()],
                    });
                }
            }
        }
        Ok(report)
    }

    /// Publish events to the bus in chunks of at most `event_bus.batch_size`
    /// entries; chunks are sent concurrently. Returns the number published.
    pub async fn publish(&self, events: &[OutboundEvent]) -> Result<usize> {
        let entries = events
            .iter()
            .map(|event| -> Result<BusEntry> {
                Ok(BusEntry {
                    source: self.bus_config.source.clone(),
                    detail_type: event.event_type.clone(),
                    detail: serde_json::to_string(event)?,
                    event_bus_name: self.bus_config.bus_name.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let chunk_size = self.bus_config.batch_size.clamp(1, MAX_EVENT_BUS_BATCH);
        let chunks: Vec<Vec<BusEntry>> = entries.chunks(chunk_size).map(<[BusEntry]>::to_vec).collect();
        let batches = chunks.len();

        let results = futures::future::join_all(chunks.into_iter().map(|chunk| self.bus.put_entries(chunk))).await;
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if !failures.is_empty() {
            return Err(Error::EventBus(format!(
                "{} of {} batches failed: {}",
                failures.len(),
                batches,
                failures.join("; ")
            )));
        }

        tracing::debug!(entries = entries.len(), batches, "Published events");
        Ok(entries.len())
    }
}
