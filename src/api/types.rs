//! Wire types of the share-access commands.

use serde::Deserialize;

/// Node type as reported by the server (`t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    /// Regular file
    File = 0,
    /// Folder/directory
    Folder = 1,
}

impl NodeType {
    /// Create from integer type value.
    ///
    /// Other server types (root, inbox, trash, contacts) never appear in a
    /// folder share.
    pub fn from_i64(t: i64) -> Option<Self> {
        match t {
            0 => Some(NodeType::File),
            1 => Some(NodeType::Folder),
            _ => None,
        }
    }
}

/// One record of the `f` (folder listing) command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawNode {
    #[serde(rename = "h")]
    pub id: String,
    #[serde(rename = "p", default)]
    pub parent_id: String,
    #[serde(rename = "u", default)]
    pub owner_id: String,
    #[serde(rename = "t")]
    pub node_type: i64,
    /// Encrypted attributes
    #[serde(rename = "a", default)]
    pub attributes: String,
    /// `<share root id>:<wrapped key>`, sometimes empty
    #[serde(rename = "k", default)]
    pub key: String,
    #[serde(rename = "ts", default)]
    pub creation_date: i64,
    #[serde(rename = "s", default)]
    pub size: u64,
    /// File attribute descriptor (images and videos only)
    #[serde(rename = "fa", default)]
    pub file_attributes: Option<String>,
}

impl RawNode {
    pub fn kind(&self) -> Option<NodeType> {
        NodeType::from_i64(self.node_type)
    }

    /// The id before `:` in `k`.
    pub fn key_owner(&self) -> Option<&str> {
        self.key
            .split_once(':')
            .map(|(owner, _)| owner)
            .filter(|owner| !owner.is_empty())
    }

    /// The MEGA base64 wrapped key after `:` in `k`, if any.
    pub fn wrapped_key(&self) -> Option<&str> {
        let (_, rest) = self.key.split_once(':')?;
        rest.split('/').next().filter(|key| !key.is_empty())
    }

    /// The descriptor string, if the node has file attributes.
    pub fn file_attributes(&self) -> Option<&str> {
        self.file_attributes.as_deref().filter(|fa| !fa.is_empty())
    }
}

/// Body of the `f` command response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawFolderListing {
    pub f: Vec<RawNode>,
    #[serde(default)]
    pub sn: Option<String>,
}

/// Result of [`ApiClient::request_folder_info`](super::ApiClient::request_folder_info).
#[derive(Debug, Clone)]
pub struct FolderInfo {
    /// Nodes in server order: every folder precedes its content
    pub nodes: Vec<RawNode>,
    /// Id of the share root folder
    pub root_id: String,
}

/// Result of the `g` command for a shared file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "s", default)]
    pub size: u64,
    /// Encrypted attributes
    #[serde(rename = "at", default)]
    pub attributes: String,
    /// Direct download URL of the encrypted content
    #[serde(rename = "g", default)]
    pub download_url: Option<String>,
    /// Seconds to wait until the bandwidth quota resets, `0` if not exceeded
    #[serde(rename = "tl", default)]
    pub time_left: Option<u64>,
    #[serde(default)]
    pub efq: Option<i64>,
    #[serde(default)]
    pub msd: Option<i64>,
    #[serde(rename = "fa", default)]
    pub file_attributes: Option<String>,
}

impl NodeInfo {
    pub fn file_attributes(&self) -> Option<&str> {
        self.file_attributes.as_deref().filter(|fa| !fa.is_empty())
    }
}

/// Body of the `ufa` command response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawAttributeUrl {
    pub p: String,
}
