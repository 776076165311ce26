//! HTTP transport for MEGA API requests.
//!
//! Everything that goes over the wire passes through the [`Transport`] trait so
//! that the API client can be driven by a scripted transport in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{MegaError, Result};

/// Status and raw body of a completed POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// A `200 OK` response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// A `200 OK` response carrying serialized JSON.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::ok(value.to_string())
    }
}

/// A POST-only HTTP transport.
///
/// Non-success statuses are returned as responses, not errors; interpreting
/// them is up to the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &str, body: Vec<u8>, content_type: &str)
    -> Result<TransportResponse>;
}

/// HTTP client for making requests to MEGA servers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create a client with a per-request timeout and an optional proxy.
    pub fn with_options(timeout: Option<Duration>, proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| MegaError::Custom(format!("Invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| MegaError::Custom(format!("Failed to build client: {}", e)))?;

        Ok(Self { client })
    }

    /// Create a new HTTP client with a proxy.
    pub fn with_proxy(proxy: &str) -> Result<Self> {
        Self::with_options(None, Some(proxy))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn map_reqwest_error(err: reqwest::Error) -> MegaError {
    if err.is_timeout() {
        MegaError::Timeout
    } else {
        err.into()
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<TransportResponse> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}
