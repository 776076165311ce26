//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default MEGA API gateway.
pub const DEFAULT_API_GATEWAY: &str = "https://g.api.mega.co.nz/cs";

/// Tunables for [`MegaClient`](crate::MegaClient).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use megashare::MegaConfig;
/// let config = MegaConfig::from_json(r#"{"error_repeat_count": 2}"#).unwrap();
/// assert_eq!(config.error_repeat_count, 2);
/// assert_eq!(config.api_concurrency, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MegaConfig {
    /// API endpoint every command is posted to.
    pub api_gateway: String,
    /// Merge concurrent API commands into one POST.
    pub grouped: bool,
    /// Value of the `ssl` flag sent with download-URL commands.
    pub ssl: u8,
    /// API calls allowed per window.
    pub api_concurrency: usize,
    /// Minimum interval between two calls reusing the same slot.
    pub api_window_ms: u64,
    /// Repeats after the first failed attempt.
    pub error_repeat_count: u32,
    /// Fixed delay between repeats.
    pub error_repeat_delay_ms: u64,
    /// Per-request HTTP timeout; `0` disables it.
    pub request_timeout_ms: u64,
    /// Optional HTTP(S) proxy for every request.
    pub proxy: Option<String>,
    /// Show `█` placeholders instead of `None` for names that can't be decrypted.
    pub redacted_names: bool,
    /// Fail attribute downloads that have no key instead of returning ciphertext.
    pub strict_attributes: bool,
    /// Reuse a bunch's download URL once it has been resolved.
    pub attribute_url_cached: bool,
    /// Merge concurrent attribute downloads from one URL into one POST.
    pub attribute_bytes_grouped: bool,
    /// Max attribute ids per download POST.
    pub attribute_part_size: usize,
    /// Max concurrent attribute download POSTs per batch.
    pub attribute_part_concurrency: usize,
}

impl Default for MegaConfig {
    fn default() -> Self {
        Self {
            api_gateway: DEFAULT_API_GATEWAY.to_string(),
            grouped: true,
            ssl: 2,
            api_concurrency: 16,
            api_window_ms: 1000,
            error_repeat_count: 5,
            error_repeat_delay_ms: 5000,
            request_timeout_ms: 20_000,
            proxy: None,
            redacted_names: false,
            strict_attributes: false,
            attribute_url_cached: true,
            attribute_bytes_grouped: true,
            attribute_part_size: 16,
            attribute_part_concurrency: 16,
        }
    }
}

impl MegaConfig {
    /// Parse a (possibly partial) JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn api_window(&self) -> Duration {
        Duration::from_millis(self.api_window_ms)
    }

    pub fn error_repeat_delay(&self) -> Duration {
        Duration::from_millis(self.error_repeat_delay_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}
