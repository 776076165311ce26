//! Share access without authentication.
//!
//! [`MegaClient`] resolves share links into decrypted nodes and downloads the
//! thumbnails and previews of media files.

use std::sync::Arc;

use tracing::debug;

use crate::api::ApiClient;
use crate::attributes::{AttributeCache, AttributeFetcher, FileAttributes, PREVIEW, THUMBNAIL};
use crate::config::MegaConfig;
use crate::crypto::decode_share_key;
use crate::error::{MegaError, Result};
use crate::fs::{FolderNodes, Node, SharedFileNode};
use crate::http::Transport;
use crate::share::Share;

/// What a share link points to.
#[derive(Debug, Clone)]
pub enum ShareContent {
    Folder(FolderNodes),
    File(Node),
}

/// Client for MEGA share links.
///
/// Cloning yields another handle sharing the rate limits, request grouping
/// and attribute caches.
///
/// # Example
/// ```no_run
/// use megashare::MegaClient;
///
/// # async fn example() -> megashare::Result<()> {
/// let client = MegaClient::new()?;
///
/// for node in client.nodes("https://mega.nz/folder/ABC123#key").await? {
///     println!("{} {:?} ({} bytes)", node.kind(), node.name(), node.size());
///     if node.is_media() {
///         let thumbnail = client.thumbnail(&node).await?;
///         println!("  thumbnail: {} bytes", thumbnail.len());
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MegaClient {
    config: Arc<MegaConfig>,
    api: ApiClient,
    cache: Arc<AttributeCache>,
    fetcher: AttributeFetcher,
}

impl MegaClient {
    /// Create a client with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(MegaConfig::default())
    }

    pub fn with_config(config: MegaConfig) -> Result<Self> {
        let api = ApiClient::with_config(&config)?;
        Ok(Self::with_api(config, api))
    }

    /// Create a client over any transport.
    pub fn with_transport(config: MegaConfig, transport: Arc<dyn Transport>) -> Self {
        let api = ApiClient::with_transport(&config, transport);
        Self::with_api(config, api)
    }

    fn with_api(config: MegaConfig, api: ApiClient) -> Self {
        Self {
            fetcher: AttributeFetcher::new(api.clone(), &config),
            config: Arc::new(config),
            api,
            cache: Arc::new(AttributeCache::new()),
        }
    }

    pub fn config(&self) -> &MegaConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn attribute_cache(&self) -> &AttributeCache {
        &self.cache
    }

    pub fn fetcher(&self) -> &AttributeFetcher {
        &self.fetcher
    }

    /// Resolve a link into its folder tree or its shared file.
    pub async fn of(&self, url: &str) -> Result<ShareContent> {
        let share = Share::from_url(url)?;
        if share.is_folder {
            Ok(ShareContent::Folder(self.folder_nodes(&share).await?))
        } else {
            Ok(ShareContent::File(self.shared_node(&share).await?))
        }
    }

    /// The node a link points to.
    ///
    /// For a folder link this is the selected node if there is one, otherwise
    /// the shared folder.
    pub async fn node(&self, url: &str) -> Result<Node> {
        match self.of(url).await? {
            ShareContent::Folder(tree) => tree
                .selected()
                .or_else(|| tree.root())
                .cloned()
                .ok_or(MegaError::InvalidResponse),
            ShareContent::File(node) => Ok(node),
        }
    }

    /// Every node of a folder link, or the file of a file link.
    pub async fn nodes(&self, url: &str) -> Result<Vec<Node>> {
        match self.of(url).await? {
            ShareContent::Folder(tree) => Ok(tree.into_nodes()),
            ShareContent::File(node) => Ok(vec![node]),
        }
    }

    /// Fetch the file of a file share.
    pub async fn shared_node(&self, share: &Share) -> Result<Node> {
        let info = self.api.request_node_info(&share.id).await?;
        let key = if share.has_key() {
            Some(decode_share_key(&share.decryption_key)?)
        } else {
            None
        };

        let node = SharedFileNode::from_info(
            &share.id,
            key.as_deref(),
            &info,
            self.config.redacted_names,
        )?;
        debug!(id = %share.id, size = node.size, "shared file resolved");
        Ok(if node.media.is_some() {
            Node::SharedMediaFile(node)
        } else {
            Node::SharedFile(node)
        })
    }

    /// Fetch and decrypt the tree of a folder share.
    pub async fn folder_nodes(&self, share: &Share) -> Result<FolderNodes> {
        let info = self.api.request_folder_info(&share.id).await?;
        FolderNodes::build(info, share, self.config.redacted_names)
    }

    /// Parsed file attributes of a media node; `None` for other nodes.
    pub fn file_attributes(&self, node: &Node) -> Result<Option<Arc<FileAttributes>>> {
        node.file_attributes(&self.cache)
    }

    pub async fn thumbnail(&self, node: &Node) -> Result<Vec<u8>> {
        self.attribute_bytes(node, THUMBNAIL).await
    }

    pub async fn preview(&self, node: &Node) -> Result<Vec<u8>> {
        self.attribute_bytes(node, PREVIEW).await
    }

    /// Download and decrypt the file attribute of `kind`.
    pub async fn attribute_bytes(&self, node: &Node, kind: u32) -> Result<Vec<u8>> {
        let attributes = self
            .file_attributes(node)?
            .ok_or(MegaError::MissingAttribute(kind))?;
        self.fetcher.bytes(&attributes, kind).await
    }

    /// Whether the node has thumbnails or previews.
    pub fn is_media_node(node: &Node) -> bool {
        node.is_media()
    }
}
