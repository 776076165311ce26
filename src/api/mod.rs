//! MEGA API client and types.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ApiClient, repeat_if_error};
pub use error::ApiErrorCode;
pub use types::{FolderInfo, NodeInfo, NodeType, RawNode};
