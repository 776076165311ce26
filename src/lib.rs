//! # megashare
//!
//! Read-only client for MEGA share links.
//!
//! ## Features
//!
//! - **Share links**: Parse modern (`/folder/…#key`, `/file/…#key`) and legacy
//!   (`#F!…!key`, `#!…!key`) links, including a selected file or subfolder.
//! - **Folder shares**: Fetch the listing, decrypt names and keys, and browse
//!   the tree (children, parents, paths, folder sizes).
//! - **File shares**: Resolve a single shared file with its size, name and
//!   direct download URL.
//! - **Thumbnails & previews**: Download and decrypt file attributes of media
//!   files. Requests for the same bunch are grouped into one download.
//! - **Gentle on the API**: Commands are grouped into batched POSTs, a
//!   concurrency and rate limit applies to every request, and transient errors
//!   are retried.
//!
//! Shares without a key still list: names are `None` (or `█` placeholders
//! with [`MegaConfig::redacted_names`]).
//!
//! ## Example
//!
//! ```no_run
//! use megashare::{MegaClient, ShareContent};
//!
//! # async fn example() -> megashare::Result<()> {
//! let client = MegaClient::new()?;
//!
//! match client.of("https://mega.nz/folder/ABC123#key").await? {
//!     ShareContent::Folder(tree) => {
//!         for node in &tree {
//!             println!("{:?} ({} bytes)", tree.path(node), node.size());
//!         }
//!         for photo in tree.media() {
//!             let thumbnail = client.thumbnail(photo).await?;
//!             println!("{}: {} byte thumbnail", photo.id(), thumbnail.len());
//!         }
//!     }
//!     ShareContent::File(file) => println!("{:?}", file.name()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod attributes;
pub mod base64;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod http;
pub mod share;
pub mod sync;

// Re-export commonly used types
pub use attributes::{FileAttribute, FileAttributes, PREVIEW, THUMBNAIL};
pub use client::{MegaClient, ShareContent};
pub use config::MegaConfig;
pub use error::{MegaError, Result};
pub use fs::{FolderNodes, Node, NodeKind};
pub use http::{HttpClient, Transport};
pub use share::Share;
