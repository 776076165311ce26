//! Cryptographic operations for MEGA share access.

pub mod aes;
pub mod attributes;
pub mod keys;

pub use self::aes::*;
pub use attributes::{
    Fingerprint, NodeAttributes, decrypt_node_attributes, parse_fingerprint, redacted_name,
};
pub use keys::*;
