//! Downloading and decrypting file attributes.
//!
//! Download URLs are requested once per bunch: concurrent requests for the
//! same bunch wait on the first one. Bytes requested from the same URL are
//! fetched together, split in parts of `attribute_part_size` ids that are
//! downloaded concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info};

use super::frame::AttributeFrames;
use super::{FileAttribute, FileAttributes};
use crate::api::ApiClient;
use crate::config::MegaConfig;
use crate::crypto::aes::aes128_cbc_decrypt_zero_padded;
use crate::error::{MegaError, Result};
use crate::sync::{Batch, BatchHandler, Coalescer, Deferral, Entry, RateLimiter};

/// Resolves bunch download URLs, keyed by bunch id.
struct UrlRequests {
    api: ApiClient,
}

#[async_trait]
impl BatchHandler<u64, FileAttribute, String> for UrlRequests {
    fn ready_result(&self, _bunch: &u64, attribute: &FileAttribute) -> Option<String> {
        attribute.bunch.download_url()
    }

    async fn handle(&self, mut batch: Batch<u64, FileAttribute, String>) -> Result<()> {
        let attribute = batch.first().clone();
        let url = match attribute.bunch.download_url() {
            Some(url) => url,
            None => {
                let url = self
                    .api
                    .request_file_attribute_download_url(&attribute.id, attribute.kind)
                    .await?;
                attribute.bunch.store_download_url(url)
            }
        };

        for entry in batch.pull() {
            entry.resolve(url.clone());
        }
        Ok(())
    }
}

/// Downloads attribute bytes, keyed by download URL.
struct BytesRequests {
    api: ApiClient,
    part_size: usize,
    part_concurrency: usize,
}

impl BytesRequests {
    async fn handle_part(&self, url: &str, entries: Vec<Entry<String, Vec<u8>>>) {
        // Different nodes may share one attribute
        let mut ids: Vec<String> = Vec::new();
        let mut waiting: HashMap<String, Vec<Entry<String, Vec<u8>>>> = HashMap::new();
        for entry in entries {
            let id = entry.value().clone();
            if !waiting.contains_key(&id) {
                ids.push(id.clone());
            }
            waiting.entry(id).or_default().push(entry);
        }

        let response = match self.api.request_file_attribute_bytes(url, &ids).await {
            Ok(response) => response,
            Err(error) => {
                for entry in waiting.into_values().flatten() {
                    entry.reject(error.clone());
                }
                return;
            }
        };

        let mut failure = MegaError::InvalidResponse;
        for frame in AttributeFrames::new(&response, ids.len()) {
            match frame {
                Ok(frame) => {
                    debug!(id = %frame.id, bytes = frame.data.len(), "file attribute received");
                    for entry in waiting.remove(&frame.id).into_iter().flatten() {
                        entry.resolve(frame.data.clone());
                    }
                }
                Err(error) => {
                    failure = error;
                    break;
                }
            }
        }

        for entry in waiting.into_values().flatten() {
            entry.reject(failure.clone());
        }
    }
}

#[async_trait]
impl BatchHandler<String, String, Vec<u8>> for BytesRequests {
    async fn handle(&self, mut batch: Batch<String, String, Vec<u8>>) -> Result<()> {
        let url = batch.key().clone();
        debug!(url = %url, part_size = self.part_size, "grouped file attribute download");

        let limiter = RateLimiter::new(self.part_concurrency, Duration::ZERO);
        join_all(batch.parts(self.part_size).map(|part| {
            let limiter = &limiter;
            let url = url.as_str();
            async move {
                let _permit = limiter.acquire().await;
                self.handle_part(url, part).await;
            }
        }))
        .await;
        Ok(())
    }
}

/// Fetches thumbnails and previews.
#[derive(Debug, Clone)]
pub struct AttributeFetcher {
    api: ApiClient,
    urls: Coalescer<u64, FileAttribute, String>,
    bytes: Coalescer<String, String, Vec<u8>>,
    url_cached: bool,
    bytes_grouped: bool,
    strict: bool,
}

impl AttributeFetcher {
    pub fn new(api: ApiClient, config: &MegaConfig) -> Self {
        let urls = Arc::new(UrlRequests { api: api.clone() });
        let bytes = Arc::new(BytesRequests {
            api: api.clone(),
            part_size: config.attribute_part_size,
            part_concurrency: config.attribute_part_concurrency,
        });

        Self {
            api,
            urls: Coalescer::new(urls, Deferral::Immediate),
            bytes: Coalescer::new(bytes, Deferral::Yield),
            url_cached: config.attribute_url_cached,
            bytes_grouped: config.attribute_bytes_grouped,
            strict: config.strict_attributes,
        }
    }

    /// Download URL of the attribute's bunch.
    ///
    /// With `cached`, a URL already resolved for the bunch is reused.
    /// Otherwise a new URL is requested and replaces the stored one.
    pub async fn download_url(&self, attribute: &FileAttribute, cached: bool) -> Result<String> {
        if !attribute.has_bytes() {
            return Err(MegaError::NoAttributeBytes(attribute.kind));
        }

        if cached {
            return self
                .urls
                .submit(attribute.bunch.id(), attribute.clone())
                .await;
        }

        let url = self
            .api
            .request_file_attribute_download_url(&attribute.id, attribute.kind)
            .await?;
        attribute.bunch.replace_download_url(url.clone());
        Ok(url)
    }

    /// Encrypted bytes of an attribute.
    ///
    /// `url` defaults to the bunch download URL. With `grouped`, the request
    /// shares a POST with every other attribute requested from the same URL.
    pub async fn encrypted_bytes(
        &self,
        attribute: &FileAttribute,
        url: Option<&str>,
        grouped: bool,
    ) -> Result<Vec<u8>> {
        let url = match url {
            Some(url) => url.to_string(),
            None => self.download_url(attribute, self.url_cached).await?,
        };

        if grouped {
            return self.bytes.submit(url, attribute.id.clone()).await;
        }

        let response = self
            .api
            .request_file_attribute_bytes(&url, std::slice::from_ref(&attribute.id))
            .await?;
        let frame = AttributeFrames::new(&response, 1)
            .next()
            .unwrap_or(Err(MegaError::InvalidResponse))?;
        Ok(frame.data)
    }

    /// Decrypted bytes of the attribute of `kind`.
    ///
    /// Without a node key the ciphertext is returned, or
    /// [`MegaError::MissingKey`] in strict mode.
    pub async fn bytes(&self, attributes: &FileAttributes, kind: u32) -> Result<Vec<u8>> {
        let attribute = attributes
            .by_kind(kind)
            .ok_or(MegaError::MissingAttribute(kind))?;
        if attributes.node_key().is_none() && self.strict {
            return Err(MegaError::MissingKey);
        }

        let encrypted = self
            .encrypted_bytes(attribute, None, self.bytes_grouped)
            .await?;

        match attributes.node_key() {
            Some(key) => {
                debug!(id = %attribute.id, bytes = encrypted.len(), "decrypting file attribute");
                aes128_cbc_decrypt_zero_padded(&encrypted, key)
            }
            None => {
                info!(id = %attribute.id, "no key for the file attribute, skipping decryption");
                Ok(encrypted)
            }
        }
    }
}
