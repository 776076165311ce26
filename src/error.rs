//! Error types for the megashare library.

use std::sync::Arc;

use thiserror::Error;

use crate::api::ApiErrorCode;

/// Main error type for megashare operations.
///
/// The enum is `Clone` so that one failure can be handed to every caller that
/// shared a coalesced request.
#[derive(Error, Debug, Clone)]
pub enum MegaError {
    /// HTTP request failed with status code.
    #[error("HTTP error: {0}")]
    HttpError(u16),

    /// Network request error.
    #[error("Request error: {0}")]
    RequestError(#[source] Arc<reqwest::Error>),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    JsonError(#[source] Arc<serde_json::Error>),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// A MEGA base64 string whose length can not come from any byte sequence.
    #[error("Wrong Mega Base64 string: {0}")]
    MalformedBase64(String),

    /// Invalid or unexpected response from server.
    #[error("Invalid response from server")]
    InvalidResponse,

    /// The HTTP request did not complete in time.
    #[error("HTTP request timed out")]
    Timeout,

    /// MEGA API returned an error code.
    #[error("API error: {code} - {message}")]
    ApiError { code: i32, message: String },

    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// The serialized file fingerprint could not be decoded.
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// The share URL matches none of the known link formats.
    #[error("Unsupported URL (\"{0}\")")]
    UnsupportedUrl(String),

    /// No key is available to decrypt a file attribute (strict mode only).
    #[error("No key specified for the file attribute decryption")]
    MissingKey,

    /// The file attribute kind has no downloadable bytes.
    #[error("File attribute of type {0} has no bytes")]
    NoAttributeBytes(u32),

    /// The node has no file attribute of the requested kind.
    #[error("Node has no file attribute of type {0}")]
    MissingAttribute(u32),

    /// A node references a parent folder that was not listed before it.
    #[error("Node {id} references unknown parent {parent_id}")]
    OrphanNode { id: String, parent_id: String },

    /// A coalesced request was dropped before its batch produced a result.
    #[error("Request was dropped before completion")]
    Dropped,

    /// Custom error message.
    #[error("{0}")]
    Custom(String),
}

impl MegaError {
    /// Build an API error from a raw negative code.
    pub fn from_code(code: i64) -> Self {
        let error_code = ApiErrorCode::from(code);
        MegaError::ApiError {
            code: code as i32,
            message: error_code.description().to_string(),
        }
    }

    /// Numeric MEGA error code, if this is an API error.
    pub fn api_code(&self) -> Option<i32> {
        match self {
            MegaError::ApiError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a repeat of the same request may succeed.
    ///
    /// Transport failures, undecodable bodies and `-3` (EAGAIN) are transient.
    /// Other API codes and malformed input are final.
    pub fn is_transient(&self) -> bool {
        match self {
            MegaError::HttpError(_)
            | MegaError::RequestError(_)
            | MegaError::JsonError(_)
            | MegaError::InvalidResponse
            | MegaError::Timeout => true,
            MegaError::ApiError { code, .. } => {
                ApiErrorCode::from(*code as i64) == ApiErrorCode::Again
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for MegaError {
    fn from(err: reqwest::Error) -> Self {
        MegaError::RequestError(Arc::new(err))
    }
}

impl From<serde_json::Error> for MegaError {
    fn from(err: serde_json::Error) -> Self {
        MegaError::JsonError(Arc::new(err))
    }
}

/// Result type alias for megashare operations.
pub type Result<T> = std::result::Result<T, MegaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_code() {
        let err = MegaError::from_code(-9);
        assert_eq!(err.api_code(), Some(-9));
        assert_eq!(err.to_string(), "API error: -9 - Resource does not exist");
        assert_eq!(MegaError::InvalidResponse.api_code(), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(MegaError::from_code(-3).is_transient());
        assert!(MegaError::HttpError(500).is_transient());
        assert!(MegaError::InvalidResponse.is_transient());
        assert!(!MegaError::from_code(-9).is_transient());
        assert!(!MegaError::from_code(-16).is_transient());
        assert!(!MegaError::MalformedBase64("abcde".into()).is_transient());
        assert!(!MegaError::UnsupportedUrl("x".into()).is_transient());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: MegaError = serde_json::from_str::<serde_json::Value>("")
            .unwrap_err()
            .into();
        assert!(matches!(err, MegaError::JsonError(_)));
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
