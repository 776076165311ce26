//! Folder tree reconstruction from a folder listing.
//!
//! The server lists every folder before its content, so the tree is built in
//! one pass: each record is attached to a parent folder seen earlier.

use std::collections::HashMap;

use tracing::debug;

use super::node::{FileNode, FolderNode, Node};
use crate::api::{FolderInfo, NodeType};
use crate::crypto::{aes_key, decode_share_key};
use crate::error::{MegaError, Result};
use crate::share::Share;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Folder(usize),
    File(usize),
}

/// Decrypted tree of a folder share.
///
/// Iteration yields the folders in listing order, then the files.
#[derive(Debug, Clone)]
pub struct FolderNodes {
    folders: Vec<Node>,
    files: Vec<Node>,
    index: HashMap<String, Slot>,
    root: Option<usize>,
    selected: Option<Slot>,
}

impl FolderNodes {
    /// Build the tree of `share` from its listing.
    ///
    /// Records that are neither files nor folders are skipped. A record whose
    /// parent was not listed before it fails with [`MegaError::OrphanNode`].
    pub fn build(info: FolderInfo, share: &Share, redacted_names: bool) -> Result<Self> {
        let share_key = if share.has_key() {
            Some(aes_key(&decode_share_key(&share.decryption_key)?)?)
        } else {
            None
        };
        let share_key = share_key.as_ref();

        let mut tree = Self {
            folders: Vec::new(),
            files: Vec::new(),
            index: HashMap::with_capacity(info.nodes.len()),
            root: None,
            selected: None,
        };

        for raw in &info.nodes {
            let Some(kind) = raw.kind() else {
                debug!(id = %raw.id, node_type = raw.node_type, "skipping node");
                continue;
            };

            match kind {
                NodeType::Folder => {
                    let parent = if raw.id == info.root_id {
                        None
                    } else {
                        Some(tree.parent_of(&raw.id, &raw.parent_id)?)
                    };
                    let mut folder = FolderNode::from_raw(raw, share_key, redacted_names)?;
                    folder.parent = parent;

                    let slot = tree.folders.len();
                    match parent {
                        Some(parent) => {
                            tree.folder_mut(parent).folders.push(slot);
                            tree.folders.push(Node::Folder(folder));
                        }
                        None => {
                            tree.root = Some(slot);
                            tree.folders.push(Node::RootFolder(folder));
                        }
                    }
                    tree.index.insert(raw.id.clone(), Slot::Folder(slot));
                }
                NodeType::File => {
                    let parent = tree.parent_of(&raw.id, &raw.parent_id)?;
                    let file = FileNode::from_raw(raw, parent, share_key, redacted_names)?;

                    let slot = tree.files.len();
                    tree.folder_mut(parent).files.push(slot);
                    tree.add_size(parent, file.size);
                    tree.files.push(if file.media.is_some() {
                        Node::MediaFile(file)
                    } else {
                        Node::File(file)
                    });
                    tree.index.insert(raw.id.clone(), Slot::File(slot));
                }
            }
        }

        tree.selected = share
            .selected_id()
            .and_then(|id| tree.index.get(id).copied());
        debug!(
            folders = tree.folders.len(),
            files = tree.files.len(),
            "folder tree built"
        );
        Ok(tree)
    }

    fn parent_of(&self, id: &str, parent_id: &str) -> Result<usize> {
        match self.index.get(parent_id) {
            Some(Slot::Folder(parent)) => Ok(*parent),
            _ => Err(MegaError::OrphanNode {
                id: id.to_string(),
                parent_id: parent_id.to_string(),
            }),
        }
    }

    fn folder_mut(&mut self, slot: usize) -> &mut FolderNode {
        match &mut self.folders[slot] {
            Node::RootFolder(folder) | Node::Folder(folder) => folder,
            _ => unreachable!("folder slots only hold folders"),
        }
    }

    /// Add a file size to a folder and all of its ancestors.
    fn add_size(&mut self, mut slot: usize, size: u64) {
        loop {
            let folder = self.folder_mut(slot);
            folder.size += size;
            match folder.parent {
                Some(parent) => slot = parent,
                None => break,
            }
        }
    }

    fn node(&self, slot: Slot) -> &Node {
        match slot {
            Slot::Folder(i) => &self.folders[i],
            Slot::File(i) => &self.files[i],
        }
    }

    /// The shared folder itself.
    pub fn root(&self) -> Option<&Node> {
        self.root.map(|i| &self.folders[i])
    }

    /// The node selected by the link, if it is in the tree.
    pub fn selected(&self) -> Option<&Node> {
        self.selected.map(|slot| self.node(slot))
    }

    pub fn folders(&self) -> impl Iterator<Item = &Node> {
        self.folders.iter()
    }

    pub fn files(&self) -> impl Iterator<Item = &Node> {
        self.files.iter()
    }

    /// Files with thumbnails or previews.
    pub fn media(&self) -> impl Iterator<Item = &Node> {
        self.files.iter().filter(|node| node.is_media())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.folders.iter().chain(self.files.iter())
    }

    pub fn len(&self) -> usize {
        self.folders.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&slot| self.node(slot))
    }

    /// Sub-folders, then files, of a folder.
    pub fn children<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Node> + 'a {
        let (folders, files) = match node.as_folder() {
            Some(folder) => (folder.folders.as_slice(), folder.files.as_slice()),
            None => (&[][..], &[][..]),
        };
        folders
            .iter()
            .map(|&i| &self.folders[i])
            .chain(files.iter().map(|&i| &self.files[i]))
    }

    pub fn parent(&self, node: &Node) -> Option<&Node> {
        let slot = match node {
            Node::RootFolder(folder) | Node::Folder(folder) => folder.parent?,
            Node::File(file) | Node::MediaFile(file) => file.parent,
            Node::SharedFile(_) | Node::SharedMediaFile(_) => return None,
        };
        Some(&self.folders[slot])
    }

    /// Folders containing `node`, nearest first.
    pub fn ancestors<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Node> + 'a {
        std::iter::successors(self.parent(node), |folder| self.parent(folder))
    }

    /// `/`-separated names from the root down to `node`.
    ///
    /// `None` when a name on the way is not available.
    pub fn path(&self, node: &Node) -> Option<String> {
        let mut names = vec![node.name()?];
        for ancestor in self.ancestors(node) {
            names.push(ancestor.name()?);
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    /// Total size of the files of the share.
    pub fn size(&self) -> u64 {
        self.root().map_or(0, Node::size)
    }

    pub(crate) fn into_nodes(self) -> Vec<Node> {
        let mut nodes = self.folders;
        nodes.extend(self.files);
        nodes
    }
}

impl<'a> IntoIterator for &'a FolderNodes {
    type Item = &'a Node;
    type IntoIter = std::iter::Chain<std::slice::Iter<'a, Node>, std::slice::Iter<'a, Node>>;

    fn into_iter(self) -> Self::IntoIter {
        self.folders.iter().chain(self.files.iter())
    }
}
