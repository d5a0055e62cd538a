//! Outbound delivery: transport, single-attempt executor and the
//! compliance-gated pipeline around them

mod executor;
mod pipeline;
mod transport;

pub use executor::{
    truncate_body, DeliveryExecutor, DeliveryHeaders, ExecutionOutcome, HEADER_ENCRYPTION_ENVELOPE,
    HEADER_ENDPOINT_ID, HEADER_SENSITIVITY, HEADER_SIGNATURE, HEADER_SIGNATURE_METHOD,
    HEADER_SIGNATURE_STATUS, HEADER_TIMESTAMP, HEADER_WEBHOOK_ID,
};
pub use pipeline::DeliveryPipeline;
pub use transport::{OutboundRequest, ReqwestTransport, Transport, TransportResponse};

#[cfg(test)]
pub(crate) use pipeline::tests as test_support;
