//! Node graph of a share.

pub mod builder;
pub mod node;

pub use builder::FolderNodes;
pub use node::{FileNode, FolderNode, MediaAttributes, Node, NodeBase, NodeKind, SharedFileNode};
