//! File attributes: thumbnails and previews attached to media files.
//!
//! A media node carries a descriptor such as
//! `924:1*sqbpWSbonCU/925:0*lH0B2ump-G8`, one `bunch:kind*id` entry per
//! attribute. Attributes of the same bunch share a download URL, so it is
//! resolved once per bunch.

pub mod fetch;
pub mod frame;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{MegaError, Result};

pub use fetch::AttributeFetcher;
pub use frame::{AttributeFrames, Frame};

/// Kind of the 128x128 thumbnail.
pub const THUMBNAIL: u32 = 0;
/// Kind of the larger preview image.
pub const PREVIEW: u32 = 1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Server group of attributes sharing one download URL.
#[derive(Debug)]
pub struct Bunch {
    id: u64,
    download_url: Mutex<Option<String>>,
}

impl Bunch {
    fn new(id: u64) -> Self {
        Self {
            id,
            download_url: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The memoized download URL, if one has been resolved.
    pub fn download_url(&self) -> Option<String> {
        lock(&self.download_url).clone()
    }

    pub fn has_download_url(&self) -> bool {
        lock(&self.download_url).is_some()
    }

    /// Keep `url` unless a URL is already stored; returns the stored one.
    pub(crate) fn store_download_url(&self, url: String) -> String {
        lock(&self.download_url).get_or_insert(url).clone()
    }

    pub(crate) fn replace_download_url(&self, url: String) {
        *lock(&self.download_url) = Some(url);
    }
}

impl fmt::Display for Bunch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// One attribute of a media node.
#[derive(Debug, Clone)]
pub struct FileAttribute {
    /// MEGA base64 id (8 bytes)
    pub id: String,
    /// `0` thumbnail, `1` preview; `8` and `9` carry no bytes
    pub kind: u32,
    pub bunch: Arc<Bunch>,
}

impl FileAttribute {
    /// Whether the attribute can be downloaded.
    pub fn has_bytes(&self) -> bool {
        self.kind == THUMBNAIL || self.kind == PREVIEW
    }
}

impl fmt::Display for FileAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}*{}", self.bunch, self.kind, self.id)
    }
}

/// The attributes of one node together with the node's content key.
#[derive(Debug, Clone)]
pub struct FileAttributes {
    attributes: Vec<FileAttribute>,
    node_key: Option<[u8; 16]>,
}

impl FileAttributes {
    fn parse(descriptor: &str, node_key: Option<[u8; 16]>, cache: &AttributeCache) -> Result<Self> {
        let attributes = descriptor
            .split('/')
            .map(|chunk| {
                let invalid =
                    || MegaError::Custom(format!("Invalid file attribute descriptor: {}", chunk));
                let (bunch, rest) = chunk.split_once(':').ok_or_else(invalid)?;
                let (kind, id) = rest.split_once('*').ok_or_else(invalid)?;
                if id.is_empty() {
                    return Err(invalid());
                }
                Ok(FileAttribute {
                    id: id.to_string(),
                    kind: kind.parse().map_err(|_| invalid())?,
                    bunch: cache.bunch(bunch.parse().map_err(|_| invalid())?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            attributes,
            node_key,
        })
    }

    /// The first attribute of a kind.
    pub fn by_kind(&self, kind: u32) -> Option<&FileAttribute> {
        self.attributes.iter().find(|a| a.kind == kind)
    }

    pub fn thumbnail(&self) -> Option<&FileAttribute> {
        self.by_kind(THUMBNAIL)
    }

    pub fn preview(&self) -> Option<&FileAttribute> {
        self.by_kind(PREVIEW)
    }

    /// Content key used to decrypt the attribute bytes.
    pub fn node_key(&self) -> Option<&[u8; 16]> {
        self.node_key.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileAttribute> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attribute) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", attribute)?;
        }
        Ok(())
    }
}

/// Bunches and parsed descriptors shared by every node of a client.
///
/// Both maps only grow; the first value stored for a key is kept.
#[derive(Debug, Default)]
pub struct AttributeCache {
    bunches: Mutex<HashMap<u64, Arc<Bunch>>>,
    descriptors: Mutex<HashMap<String, Arc<FileAttributes>>>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bunch with this id, created on first use.
    pub fn bunch(&self, id: u64) -> Arc<Bunch> {
        lock(&self.bunches)
            .entry(id)
            .or_insert_with(|| Arc::new(Bunch::new(id)))
            .clone()
    }

    /// The parsed attributes of a descriptor.
    ///
    /// Nodes with equal descriptors share one value, keyed with the key of the
    /// node seen first.
    pub fn attributes(
        &self,
        descriptor: &str,
        node_key: Option<[u8; 16]>,
    ) -> Result<Arc<FileAttributes>> {
        if let Some(existing) = lock(&self.descriptors).get(descriptor) {
            return Ok(existing.clone());
        }

        let parsed = Arc::new(FileAttributes::parse(descriptor, node_key, self)?);
        Ok(lock(&self.descriptors)
            .entry(descriptor.to_string())
            .or_insert(parsed)
            .clone())
    }

    pub fn bunch_count(&self) -> usize {
        lock(&self.bunches).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = "924:1*sqbpWSbonCU/925:0*lH0B2ump-G8";

    #[test]
    fn test_parse_descriptor() {
        let cache = AttributeCache::new();
        let attributes = cache.attributes(DESCRIPTOR, Some([7; 16])).unwrap();

        assert_eq!(attributes.len(), 2);
        let preview = attributes.preview().unwrap();
        assert_eq!(preview.id, "sqbpWSbonCU");
        assert_eq!(preview.bunch.id(), 924);
        let thumbnail = attributes.thumbnail().unwrap();
        assert_eq!(thumbnail.id, "lH0B2ump-G8");
        assert_eq!(thumbnail.bunch.id(), 925);
        assert!(attributes.by_kind(8).is_none());
        assert_eq!(attributes.node_key(), Some(&[7; 16]));
        assert_eq!(attributes.to_string(), DESCRIPTOR);
    }

    #[test]
    fn test_reserved_kinds_have_no_bytes() {
        let cache = AttributeCache::new();
        let attributes = cache.attributes("1:8*AAAAAAAAAAA/1:9*AAAAAAAAAAE", None).unwrap();
        assert!(attributes.iter().all(|a| !a.has_bytes()));
        assert!(attributes.thumbnail().is_none());
    }

    #[test]
    fn test_first_write_wins() {
        let cache = AttributeCache::new();
        let first = cache.attributes(DESCRIPTOR, Some([1; 16])).unwrap();
        let second = cache.attributes(DESCRIPTOR, Some([2; 16])).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.node_key(), Some(&[1; 16]));
    }

    #[test]
    fn test_bunches_are_shared() {
        let cache = AttributeCache::new();
        let a = cache.attributes("924:0*sqbpWSbonCU", None).unwrap();
        let b = cache.attributes("924:1*lH0B2ump-G8", None).unwrap();
        assert!(Arc::ptr_eq(
            &a.thumbnail().unwrap().bunch,
            &b.preview().unwrap().bunch
        ));
        assert_eq!(cache.bunch_count(), 1);
    }

    #[test]
    fn test_bunch_url_memo() {
        let bunch = Bunch::new(1);
        assert!(!bunch.has_download_url());
        assert_eq!(bunch.store_download_url("a".into()), "a");
        assert_eq!(bunch.store_download_url("b".into()), "a");
        bunch.replace_download_url("c".into());
        assert_eq!(bunch.download_url().as_deref(), Some("c"));
    }

    #[test]
    fn test_invalid_descriptor() {
        let cache = AttributeCache::new();
        for descriptor in ["", "924", "924:1", "x:1*id", "924:y*id", "924:1*"] {
            assert!(cache.attributes(descriptor, None).is_err(), "{descriptor}");
        }
    }
}
