//! Node types of a share.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::api::{NodeInfo, RawNode};
use crate::attributes::{AttributeCache, FileAttributes};
use crate::base64::base64url_decode;
use crate::crypto::{
    KeyParts, aes_key, decrypt_node_attributes, parse_fingerprint, redacted_name, unwrap_key,
};
use crate::error::{MegaError, Result};

/// Kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Top folder of a folder share
    RootFolder,
    Folder,
    File,
    /// File with thumbnail/preview attributes
    MediaFile,
    /// File shared by a file link
    SharedFile,
    SharedMediaFile,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::RootFolder => "rootFolder",
            NodeKind::Folder => "folder",
            NodeKind::File => "file",
            NodeKind::MediaFile => "mediaFile",
            NodeKind::SharedFile => "sharedFile",
            NodeKind::SharedMediaFile => "sharedMediaFile",
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, NodeKind::RootFolder | NodeKind::Folder)
    }

    pub fn is_media(&self) -> bool {
        matches!(self, NodeKind::MediaFile | NodeKind::SharedMediaFile)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by the nodes of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBase {
    pub id: String,
    pub parent_id: String,
    pub owner_id: String,
    /// Seconds since the Unix epoch
    pub creation_date: i64,
}

impl NodeBase {
    fn from_raw(raw: &RawNode) -> Self {
        Self {
            id: raw.id.clone(),
            parent_id: raw.parent_id.clone(),
            owner_id: raw.owner_id.clone(),
            creation_date: raw.creation_date,
        }
    }
}

/// Attribute descriptor of a media file, parsed on first use.
#[derive(Debug, Clone)]
pub struct MediaAttributes {
    descriptor: String,
    parsed: OnceLock<Arc<FileAttributes>>,
}

impl MediaAttributes {
    fn new(descriptor: &str) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            parsed: OnceLock::new(),
        }
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn resolve(&self, cache: &AttributeCache, key: Option<[u8; 16]>) -> Result<Arc<FileAttributes>> {
        if let Some(parsed) = self.parsed.get() {
            return Ok(parsed.clone());
        }
        let parsed = cache.attributes(&self.descriptor, key)?;
        Ok(self.parsed.get_or_init(|| parsed).clone())
    }
}

/// Unwrap a node key with the share key; `None` when either is missing.
fn unwrap_node_key(raw: &RawNode, share_key: Option<&[u8; 16]>) -> Result<Option<Vec<u8>>> {
    match (share_key, raw.wrapped_key()) {
        (Some(share_key), Some(wrapped)) => {
            Ok(Some(unwrap_key(&base64url_decode(wrapped)?, share_key)?))
        }
        _ => Ok(None),
    }
}

fn placeholder(encoded: &str, has_fingerprint: bool, redacted: bool) -> Option<String> {
    redacted.then(|| redacted_name(encoded.len(), has_fingerprint))
}

/// Decrypted name and modification time of a file.
fn decrypt_file_attributes(encoded: &str, key: &[u8; 16]) -> Result<(String, Option<u64>)> {
    let attributes = decrypt_node_attributes(encoded, key)?;
    let modification_date = attributes
        .fingerprint
        .as_deref()
        .map(parse_fingerprint)
        .transpose()?
        .map(|fp| fp.modification_date);
    Ok((attributes.name, modification_date))
}

/// A folder of a folder share.
#[derive(Debug, Clone)]
pub struct FolderNode {
    pub base: NodeBase,
    /// `None` (or a `█` placeholder) when the folder has no key
    pub name: Option<String>,
    pub(crate) key: Option<[u8; 16]>,
    pub(crate) parent: Option<usize>,
    pub(crate) folders: Vec<usize>,
    pub(crate) files: Vec<usize>,
    pub(crate) size: u64,
}

impl FolderNode {
    pub(crate) fn from_raw(
        raw: &RawNode,
        share_key: Option<&[u8; 16]>,
        redacted: bool,
    ) -> Result<Self> {
        let (key, name) = match unwrap_node_key(raw, share_key)? {
            Some(key) => {
                let key = aes_key(&key)?;
                (Some(key), Some(decrypt_node_attributes(&raw.attributes, &key)?.name))
            }
            None => (None, placeholder(&raw.attributes, false, redacted)),
        };

        Ok(Self {
            base: NodeBase::from_raw(raw),
            name,
            key,
            parent: None,
            folders: Vec::new(),
            files: Vec::new(),
            size: 0,
        })
    }

    /// Folder key.
    pub fn key(&self) -> Option<&[u8; 16]> {
        self.key.as_ref()
    }

    /// Total size of the files beneath the folder.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A file of a folder share.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub base: NodeBase,
    /// `None` (or a `█` placeholder) when the file has no key
    pub name: Option<String>,
    pub size: u64,
    /// Seconds since the Unix epoch, from the fingerprint
    pub modification_date: Option<u64>,
    unwrapped_key: Option<[u8; 32]>,
    key_parts: OnceLock<Option<KeyParts>>,
    pub(crate) parent: usize,
    pub(crate) media: Option<MediaAttributes>,
}

impl FileNode {
    pub(crate) fn from_raw(
        raw: &RawNode,
        parent: usize,
        share_key: Option<&[u8; 16]>,
        redacted: bool,
    ) -> Result<Self> {
        let unwrapped_key = match unwrap_node_key(raw, share_key)? {
            Some(key) => Some(<[u8; 32]>::try_from(key.as_slice()).map_err(|_| {
                MegaError::CryptoError(format!(
                    "Invalid file key length: expected 32, got {}",
                    key.len()
                ))
            })?),
            None => None,
        };

        let mut node = Self {
            base: NodeBase::from_raw(raw),
            name: None,
            size: raw.size,
            modification_date: None,
            unwrapped_key,
            key_parts: OnceLock::new(),
            parent,
            media: raw.file_attributes().map(MediaAttributes::new),
        };

        match node.key() {
            Some(key) => {
                let (name, modification_date) = decrypt_file_attributes(&raw.attributes, &key)?;
                node.name = Some(name);
                node.modification_date = modification_date;
            }
            None => node.name = placeholder(&raw.attributes, true, redacted),
        }
        Ok(node)
    }

    /// Parts of the unwrapped file key.
    pub fn key_parts(&self) -> Option<&KeyParts> {
        self.key_parts
            .get_or_init(|| self.unwrapped_key.as_ref().map(KeyParts::from_unwrapped))
            .as_ref()
    }

    /// Content key.
    pub fn key(&self) -> Option<[u8; 16]> {
        self.key_parts().map(|parts| parts.key)
    }
}

/// The file of a file share.
#[derive(Debug, Clone)]
pub struct SharedFileNode {
    /// Share handle; every new link of a file gets a new one
    pub id: String,
    pub name: Option<String>,
    pub size: u64,
    pub modification_date: Option<u64>,
    /// Direct download URL of the encrypted content
    pub download_url: Option<String>,
    /// Seconds until the bandwidth quota resets
    pub time_left: Option<u64>,
    key_parts: Option<KeyParts>,
    pub(crate) media: Option<MediaAttributes>,
}

impl SharedFileNode {
    pub(crate) fn from_info(
        id: &str,
        share_key: Option<&[u8]>,
        info: &NodeInfo,
        redacted: bool,
    ) -> Result<Self> {
        let key_parts = share_key.map(KeyParts::from_slice).transpose()?;

        let (name, modification_date) = match &key_parts {
            Some(parts) => {
                let (name, modification_date) = decrypt_file_attributes(&info.attributes, &parts.key)?;
                (Some(name), modification_date)
            }
            None => (placeholder(&info.attributes, false, redacted), None),
        };

        Ok(Self {
            id: id.to_string(),
            name,
            size: info.size,
            modification_date,
            download_url: info.download_url.clone(),
            time_left: info.time_left,
            key_parts,
            media: info.file_attributes().map(MediaAttributes::new),
        })
    }

    pub fn key_parts(&self) -> Option<&KeyParts> {
        self.key_parts.as_ref()
    }

    pub fn key(&self) -> Option<[u8; 16]> {
        self.key_parts.map(|parts| parts.key)
    }
}

/// A node of a share.
#[derive(Debug, Clone)]
pub enum Node {
    RootFolder(FolderNode),
    Folder(FolderNode),
    File(FileNode),
    MediaFile(FileNode),
    SharedFile(SharedFileNode),
    SharedMediaFile(SharedFileNode),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::RootFolder(_) => NodeKind::RootFolder,
            Node::Folder(_) => NodeKind::Folder,
            Node::File(_) => NodeKind::File,
            Node::MediaFile(_) => NodeKind::MediaFile,
            Node::SharedFile(_) => NodeKind::SharedFile,
            Node::SharedMediaFile(_) => NodeKind::SharedMediaFile,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Node::RootFolder(f) | Node::Folder(f) => &f.base.id,
            Node::File(f) | Node::MediaFile(f) => &f.base.id,
            Node::SharedFile(f) | Node::SharedMediaFile(f) => &f.id,
        }
    }

    fn base(&self) -> Option<&NodeBase> {
        match self {
            Node::RootFolder(f) | Node::Folder(f) => Some(&f.base),
            Node::File(f) | Node::MediaFile(f) => Some(&f.base),
            Node::SharedFile(_) | Node::SharedMediaFile(_) => None,
        }
    }

    /// Id of the parent folder; empty for a shared file.
    pub fn parent_id(&self) -> &str {
        self.base().map_or("", |b| b.parent_id.as_str())
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.base().map(|b| b.owner_id.as_str())
    }

    pub fn creation_date(&self) -> Option<i64> {
        self.base().map(|b| b.creation_date)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Node::RootFolder(f) | Node::Folder(f) => f.name.as_deref(),
            Node::File(f) | Node::MediaFile(f) => f.name.as_deref(),
            Node::SharedFile(f) | Node::SharedMediaFile(f) => f.name.as_deref(),
        }
    }

    /// File size, or the total size of the files beneath a folder.
    pub fn size(&self) -> u64 {
        match self {
            Node::RootFolder(f) | Node::Folder(f) => f.size,
            Node::File(f) | Node::MediaFile(f) => f.size,
            Node::SharedFile(f) | Node::SharedMediaFile(f) => f.size,
        }
    }

    pub fn modification_date(&self) -> Option<u64> {
        match self {
            Node::RootFolder(_) | Node::Folder(_) => None,
            Node::File(f) | Node::MediaFile(f) => f.modification_date,
            Node::SharedFile(f) | Node::SharedMediaFile(f) => f.modification_date,
        }
    }

    /// Folder key, or the content key of a file.
    pub fn key(&self) -> Option<[u8; 16]> {
        match self {
            Node::RootFolder(f) | Node::Folder(f) => f.key,
            Node::File(f) | Node::MediaFile(f) => f.key(),
            Node::SharedFile(f) | Node::SharedMediaFile(f) => f.key(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind().is_folder()
    }

    pub fn is_file(&self) -> bool {
        !self.is_folder()
    }

    pub fn is_media(&self) -> bool {
        self.kind().is_media()
    }

    pub fn as_folder(&self) -> Option<&FolderNode> {
        match self {
            Node::RootFolder(f) | Node::Folder(f) => Some(f),
            _ => None,
        }
    }

    fn media(&self) -> Option<&MediaAttributes> {
        match self {
            Node::MediaFile(f) => f.media.as_ref(),
            Node::SharedMediaFile(f) => f.media.as_ref(),
            _ => None,
        }
    }

    /// Raw attribute descriptor of a media file.
    pub fn file_attributes_descriptor(&self) -> Option<&str> {
        self.media().map(MediaAttributes::descriptor)
    }

    /// Parsed attributes of a media file, memoized on the node.
    pub fn file_attributes(&self, cache: &AttributeCache) -> Result<Option<Arc<FileAttributes>>> {
        self.media()
            .map(|media| media.resolve(cache, self.key()))
            .transpose()
    }
}
