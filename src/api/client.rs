//! MEGA API client with request/response handling.
//!
//! Commands posted to the same URL while the caller's task is running are
//! merged into one JSON array body. Every POST takes a slot of the shared
//! [`RateLimiter`] and is repeated on transient failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::types::{FolderInfo, NodeInfo, RawAttributeUrl, RawFolderListing};
use crate::base64::base64url_decode;
use crate::config::MegaConfig;
use crate::error::{MegaError, Result};
use crate::http::{HttpClient, Transport};
use crate::sync::{Batch, BatchHandler, Coalescer, Deferral, RateLimiter};

/// Run `f` until it succeeds, repeating up to `count` times after transient
/// failures with a fixed `delay` in between.
///
/// Non-transient errors are returned at once.
pub async fn repeat_if_error<T, F, Fut>(count: u32, delay: Duration, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            debug!(attempt, "repeating request");
        }
        match f().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < count => {
                attempt += 1;
                warn!(
                    %error,
                    "request failed, will be repeated, try {} of {}", attempt, count
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Turn a whole-response value into the per-command array.
fn interpret_response(response: Value) -> Result<Vec<Value>> {
    match response {
        Value::Array(entries) => Ok(entries),
        Value::Number(code) => match code.as_i64() {
            Some(code) if code < 0 => Err(MegaError::from_code(code)),
            _ => Err(MegaError::InvalidResponse),
        },
        _ => Err(MegaError::InvalidResponse),
    }
}

/// Result of one command inside a response array.
fn interpret_entry(entry: Option<Value>) -> Result<Value> {
    let entry = entry.ok_or(MegaError::InvalidResponse)?;
    match entry.as_i64() {
        Some(code) if code < 0 => Err(MegaError::from_code(code)),
        _ => Ok(entry),
    }
}

/// Sends POSTs under the API rate limit with retries.
struct Requester {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    repeat_count: u32,
    repeat_delay: Duration,
}

impl Requester {
    async fn request_safe(&self, url: &str, payloads: &[Value]) -> Result<Vec<Value>> {
        let body = serde_json::to_vec(payloads)?;
        let _permit = self.limiter.acquire().await;
        repeat_if_error(self.repeat_count, self.repeat_delay, || {
            self.request_unsafe(url, body.clone())
        })
        .await
    }

    async fn request_unsafe(&self, url: &str, body: Vec<u8>) -> Result<Vec<Value>> {
        debug!(url, bytes = body.len(), "api request");
        let response = self.transport.post(url, body, "application/json").await?;

        if response.status == 500 {
            return Err(MegaError::HttpError(500));
        } else if response.status != 200 {
            warn!(status = response.status, "unexpected api response status");
        }
        debug!(bytes = response.body.len(), "api response");

        let value: Value = serde_json::from_slice(&response.body)?;
        interpret_response(value)
    }

    async fn request_bytes(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let body = &body;
        let bytes = repeat_if_error(self.repeat_count, self.repeat_delay, || async move {
            debug!(url, ids = body.len() / 8, "downloading file attributes");
            let response = self
                .transport
                .post(url, body.clone(), "application/octet-stream")
                .await?;
            if !(200..300).contains(&response.status) {
                return Err(MegaError::HttpError(response.status));
            }
            Ok(response.body)
        })
        .await?;

        debug!(bytes = bytes.len(), "downloaded file attributes");
        Ok(bytes)
    }
}

#[async_trait]
impl BatchHandler<String, Value, Value> for Requester {
    async fn handle(&self, mut batch: Batch<String, Value, Value>) -> Result<()> {
        let url = batch.key().clone();
        let entries = batch.pull();
        let payloads: Vec<Value> = entries.iter().map(|e| e.value().clone()).collect();
        debug!(count = payloads.len(), "grouped api request");

        match self.request_safe(&url, &payloads).await {
            Ok(responses) => {
                let mut responses = responses.into_iter();
                for entry in entries {
                    entry.settle(interpret_entry(responses.next()));
                }
            }
            Err(error) => {
                for entry in entries {
                    entry.reject(error.clone());
                }
            }
        }
        Ok(())
    }
}

/// MEGA API client.
///
/// Cloning yields another handle sharing the rate limiter and the request
/// grouping.
#[derive(Clone)]
pub struct ApiClient {
    requester: Arc<Requester>,
    grouped: Coalescer<String, Value, Value>,
    gateway: String,
    group_by_default: bool,
    ssl: u8,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("gateway", &self.gateway)
            .field("grouped", &self.group_by_default)
            .field("limiter", &self.requester.limiter)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client over the default HTTP transport.
    pub fn with_config(config: &MegaConfig) -> Result<Self> {
        let http = HttpClient::with_options(config.request_timeout(), config.proxy.as_deref())?;
        Ok(Self::with_transport(config, Arc::new(http)))
    }

    /// Create a client over any transport.
    pub fn with_transport(config: &MegaConfig, transport: Arc<dyn Transport>) -> Self {
        let requester = Arc::new(Requester {
            transport,
            limiter: RateLimiter::new(config.api_concurrency, config.api_window()),
            repeat_count: config.error_repeat_count,
            repeat_delay: config.error_repeat_delay(),
        });

        Self {
            grouped: Coalescer::new(requester.clone(), Deferral::Yield),
            requester,
            gateway: config.api_gateway.clone(),
            group_by_default: config.grouped,
            ssl: config.ssl,
        }
    }

    /// The limiter every API POST goes through.
    pub fn limiter(&self) -> &RateLimiter {
        &self.requester.limiter
    }

    fn url(&self, params: &[(&str, &str)]) -> Result<String> {
        if params.is_empty() {
            return Ok(self.gateway.clone());
        }
        let mut url = reqwest::Url::parse(&self.gateway)
            .map_err(|e| MegaError::Custom(format!("Invalid API gateway: {}", e)))?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url.to_string())
    }

    /// Send one command, grouped according to the configuration.
    pub async fn request(&self, payload: Value, params: &[(&str, &str)]) -> Result<Value> {
        self.call(payload, params, self.group_by_default).await
    }

    /// Send one command.
    ///
    /// Grouped commands share a POST with every other command for the same
    /// URL submitted before the current task yields.
    pub async fn call(
        &self,
        payload: Value,
        params: &[(&str, &str)],
        grouped: bool,
    ) -> Result<Value> {
        let url = self.url(params)?;

        if grouped {
            return self.grouped.submit(url, payload).await;
        }

        let responses = self.requester.request_safe(&url, &[payload]).await?;
        interpret_entry(responses.into_iter().next())
    }

    /// List the nodes of a shared folder.
    pub async fn request_folder_info(&self, share_id: &str) -> Result<FolderInfo> {
        let response = self
            .request(json!({"a": "f", "r": 1, "c": 1, "ca": 1}), &[("n", share_id)])
            .await?;
        let listing: RawFolderListing = serde_json::from_value(response)?;
        debug!(nodes = listing.f.len(), sn = ?listing.sn, "folder listing");

        let first = listing.f.first().ok_or(MegaError::InvalidResponse)?;
        let root_id = match first.key_owner() {
            Some(owner) => {
                if owner != first.id {
                    warn!(
                        root_id = owner,
                        first_id = %first.id,
                        "share root id does not equal the id of the first node"
                    );
                }
                owner.to_string()
            }
            None => {
                warn!(first_id = %first.id, "first node has no key, using its id as root id");
                first.id.clone()
            }
        };

        Ok(FolderInfo {
            nodes: listing.f,
            root_id,
        })
    }

    /// Get the metadata and download URL of a shared file.
    pub async fn request_node_info(&self, share_id: &str) -> Result<NodeInfo> {
        let response = self
            .request(
                json!({"a": "g", "p": share_id, "g": 1, "ssl": self.ssl}),
                &[],
            )
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Get the download URL of the bunch holding a file attribute.
    pub async fn request_file_attribute_download_url(
        &self,
        id: &str,
        kind: u32,
    ) -> Result<String> {
        debug!(id, kind, "requesting file attribute download url");
        let response = self
            .request(
                json!({"a": "ufa", "fah": id, "ssl": self.ssl, "r": 1}),
                &[],
            )
            .await?;
        let RawAttributeUrl { p } = serde_json::from_value(response)?;
        Ok(format!("{}/{}", p, kind))
    }

    /// Download the encrypted bytes of file attributes.
    ///
    /// `ids` are MEGA base64 attribute ids; the response is a sequence of
    /// frames (see [`AttributeFrames`](crate::attributes::AttributeFrames)).
    pub async fn request_file_attribute_bytes(
        &self,
        url: &str,
        ids: &[String],
    ) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(ids.len() * 8);
        for id in ids {
            body.extend_from_slice(&base64url_decode(id)?);
        }
        self.requester.request_bytes(url, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::TransportResponse;
    use crate::http::mock::MockTransport;

    fn test_config() -> MegaConfig {
        MegaConfig {
            api_gateway: "https://api.example.test/cs".to_string(),
            api_window_ms: 0,
            error_repeat_count: 2,
            error_repeat_delay_ms: 10,
            ..MegaConfig::default()
        }
    }

    fn client(mock: Arc<MockTransport>) -> ApiClient {
        ApiClient::with_transport(&test_config(), mock)
    }

    #[tokio::test]
    async fn test_grouped_calls_share_one_post() {
        let mock = Arc::new(MockTransport::new(|req| {
            let payloads = req.json();
            let answers: Vec<Value> = payloads
                .as_array()
                .unwrap()
                .iter()
                .map(|p| json!({"echo": p["p"]}))
                .collect();
            Ok(TransportResponse::json(&Value::Array(answers)))
        }));
        let api = client(mock.clone());

        let a = api.call(json!({"a": "g", "p": "one"}), &[], true);
        let b = api.call(json!({"a": "g", "p": "two"}), &[], true);
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.unwrap(), json!({"echo": "one"}));
        assert_eq!(b.unwrap(), json!({"echo": "two"}));

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://api.example.test/cs");
        assert_eq!(requests[0].json().as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ungrouped_call_sends_single_payload() {
        let mock = Arc::new(MockTransport::scripted(vec![Ok(TransportResponse::ok(
            r#"[{"ok":1}]"#,
        ))]));
        let api = client(mock.clone());

        let value = api
            .call(json!({"a": "f"}), &[("n", "abc")], false)
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": 1}));

        let requests = mock.requests();
        assert_eq!(requests[0].url, "https://api.example.test/cs?n=abc");
        assert_eq!(requests[0].json(), json!([{"a": "f"}]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_again_is_retried_then_surfaced() {
        let mock = Arc::new(MockTransport::new(|_| Ok(TransportResponse::ok("-3"))));
        let api = client(mock.clone());

        let err = api.call(json!({"a": "g"}), &[], true).await.unwrap_err();
        assert_eq!(err.api_code(), Some(-3));
        // First attempt plus two repeats
        assert_eq!(mock.requests().len(), 3);
        assert_eq!(api.limiter().active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let mock = Arc::new(MockTransport::new(|_| Ok(TransportResponse::ok("-9"))));
        let api = client(mock.clone());

        let err = api.call(json!({"a": "g"}), &[], false).await.unwrap_err();
        assert_eq!(err.api_code(), Some(-9));
        assert_eq!(err.to_string(), "API error: -9 - Resource does not exist");
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_busy_then_success() {
        let mock = Arc::new(MockTransport::scripted(vec![
            Ok(TransportResponse {
                status: 500,
                body: Vec::new(),
            }),
            Ok(TransportResponse::ok("")),
            Ok(TransportResponse::ok("[7]")),
        ]));
        let api = client(mock.clone());

        assert_eq!(api.call(json!({}), &[], true).await.unwrap(), json!(7));
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_entry_errors_are_per_command() {
        let mock = Arc::new(MockTransport::new(|_| {
            Ok(TransportResponse::ok(r#"[{"p":"x"},-16]"#))
        }));
        let api = client(mock.clone());

        let a = api.call(json!({"n": 1}), &[], true);
        let b = api.call(json!({"n": 2}), &[], true);
        let c = api.call(json!({"n": 3}), &[], true);
        let (a, b, c) = tokio::join!(a, b, c);

        assert_eq!(a.unwrap(), json!({"p": "x"}));
        assert_eq!(b.unwrap_err().api_code(), Some(-16));
        assert!(matches!(c, Err(MegaError::InvalidResponse)));
    }

    #[tokio::test]
    async fn test_folder_info_root_id() {
        let mock = Arc::new(MockTransport::new(|_| {
            Ok(TransportResponse::json(&json!([{
                "f": [
                    {"h": "2t1yTLhZ", "p": "", "u": "u1", "t": 1, "a": "x", "k": "2t1yTLhZ:AAAA", "ts": 1},
                    {"h": "child001", "p": "2t1yTLhZ", "u": "u1", "t": 0, "a": "y", "k": "2t1yTLhZ:BBBB", "ts": 2, "s": 5}
                ],
                "sn": "McPlUF51ioE",
                "noc": "1"
            }])))
        }));
        let api = client(mock.clone());

        let info = api.request_folder_info("2t1yTLhZ").await.unwrap();
        assert_eq!(info.root_id, "2t1yTLhZ");
        assert_eq!(info.nodes.len(), 2);
        assert_eq!(info.nodes[1].size, 5);

        let request = &mock.requests()[0];
        assert_eq!(request.url, "https://api.example.test/cs?n=2t1yTLhZ");
        assert_eq!(request.json(), json!([{"a": "f", "r": 1, "c": 1, "ca": 1}]));
    }

    #[tokio::test]
    async fn test_folder_info_root_id_from_key_prefix() {
        let mock = Arc::new(MockTransport::new(|_| {
            Ok(TransportResponse::json(&json!([{
                "f": [{"h": "firstId1", "p": "", "t": 1, "a": "x", "k": "rootId01:AAAA"}]
            }])))
        }));
        let api = client(mock);

        let info = api.request_folder_info("share").await.unwrap();
        assert_eq!(info.root_id, "rootId01");
    }

    #[tokio::test]
    async fn test_empty_listing_is_invalid() {
        let mock = Arc::new(MockTransport::new(|_| {
            Ok(TransportResponse::json(&json!([{"f": []}])))
        }));
        let api = client(mock);

        assert!(matches!(
            api.request_folder_info("share").await,
            Err(MegaError::InvalidResponse)
        ));
    }

    #[tokio::test]
    async fn test_node_info_and_attribute_url() {
        let mock = Arc::new(MockTransport::new(|req| {
            let payload = &req.json()[0];
            let answer = match payload["a"].as_str().unwrap() {
                "g" => json!({"s": 10, "at": "enc", "g": "https://dl.test/x", "tl": 0}),
                "ufa" => json!({"p": "https://fa.test/.abc"}),
                _ => json!(-2),
            };
            Ok(TransportResponse::json(&json!([answer])))
        }));
        let api = client(mock.clone());

        let info = api.request_node_info("fileId").await.unwrap();
        assert_eq!(info.size, 10);
        assert_eq!(info.download_url.as_deref(), Some("https://dl.test/x"));

        let url = api
            .request_file_attribute_download_url("sqbpWSbonCU", 1)
            .await
            .unwrap();
        assert_eq!(url, "https://fa.test/.abc/1");

        let requests = mock.requests();
        assert_eq!(
            requests[0].json(),
            json!([{"a": "g", "p": "fileId", "g": 1, "ssl": 2}])
        );
        assert_eq!(
            requests[1].json(),
            json!([{"a": "ufa", "fah": "sqbpWSbonCU", "ssl": 2, "r": 1}])
        );
    }

    #[tokio::test]
    async fn test_attribute_bytes_body() {
        let mock = Arc::new(MockTransport::new(|_| Ok(TransportResponse::ok(vec![1, 2, 3]))));
        let api = client(mock.clone());

        let ids = vec!["AQIDBAUGBwg".to_string(), "CAcGBQQDAgE".to_string()];
        let bytes = api
            .request_file_attribute_bytes("https://fa.test/.abc/0", &ids)
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);

        let request = &mock.requests()[0];
        assert_eq!(request.body, vec![1, 2, 3, 4, 5, 6, 7, 8, 8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_if_error_counts() {
        let mut calls = 0;
        let result: Result<()> = repeat_if_error(3, Duration::from_millis(5), || {
            calls += 1;
            async { Err(MegaError::Timeout) }
        })
        .await;
        assert!(matches!(result, Err(MegaError::Timeout)));
        assert_eq!(calls, 4);
    }
}
