//! Outbound HTTP transport

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// A single outbound POST
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Serialized JSON body, byte-identical to what was signed
    pub body: String,
    pub timeout: Duration,
    /// Response bytes kept; the rest of the body is never read
    pub max_response_bytes: usize,
}

/// Response to an outbound POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Sends one request; never retries
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: &OutboundRequest) -> Result<TransportResponse>;
}

/// `reqwest`-backed transport
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: &OutboundRequest) -> Result<TransportResponse> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("request exceeded {:?}", request.timeout))
            } else {
                Error::Transmission(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let mut buf: Vec<u8> = Vec::new();
        while buf.len() < request.max_response_bytes {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| Error::Transmission(format!("Failed to read response body: {}", e)))?;
            match chunk {
                Some(bytes) => buf.extend_from_slice(&bytes),
                None => break,
            }
        }
        buf.truncate(request.max_response_bytes);
        let body = String::from_utf8_lossy(&buf).into_owned();
        Ok(TransportResponse { status, body })
    }
}
