//! MEGA-style URL-safe base64 encoding/decoding.
//!
//! MEGA uses a variant of base64 that:
//! - Replaces `+` with `-`
//! - Replaces `/` with `_`
//! - Removes padding `=` characters

use base64::{Engine, engine::general_purpose};

use crate::error::{MegaError, Result};

/// Convert a MEGA base64 string to standard padded base64.
///
/// A string whose length leaves a remainder of 1 modulo 4 can not be produced
/// by any byte sequence and is rejected instead of being padded.
///
/// # Example
/// ```
/// use megashare::base64::mega_to_standard_base64;
/// let standard = mega_to_standard_base64("AWJuto8_fhleAI2WG0RvACtKkL_s9tAtvBXXDUp2bQk").unwrap();
/// assert_eq!(standard, "AWJuto8/fhleAI2WG0RvACtKkL/s9tAtvBXXDUp2bQk=");
/// ```
pub fn mega_to_standard_base64(s: &str) -> Result<String> {
    let padding = (4 - (s.len() % 4)) % 4;
    if padding == 3 {
        return Err(MegaError::MalformedBase64(s.to_string()));
    }

    let padded = format!("{}{}", s, "=".repeat(padding));
    Ok(padded.replace('-', "+").replace('_', "/"))
}

/// Convert standard base64 to MEGA base64 (URL-safe alphabet, no padding).
pub fn standard_to_mega_base64(s: &str) -> String {
    s.replace('=', "").replace('+', "-").replace('/', "_")
}

/// Encode bytes to MEGA's URL-safe base64 (no padding).
///
/// # Example
/// ```
/// use megashare::base64::base64url_encode;
/// let encoded = base64url_encode(b"hello");
/// assert!(!encoded.contains('='));
/// assert!(!encoded.contains('+'));
/// assert!(!encoded.contains('/'));
/// ```
pub fn base64url_encode(data: &[u8]) -> String {
    standard_to_mega_base64(&general_purpose::STANDARD.encode(data))
}

/// Decode MEGA's URL-safe base64 to bytes.
///
/// # Example
/// ```
/// use megashare::base64::{base64url_encode, base64url_decode};
/// let original = b"hello world";
/// let encoded = base64url_encode(original);
/// let decoded = base64url_decode(&encoded).unwrap();
/// assert_eq!(decoded, original);
/// ```
pub fn base64url_decode(s: &str) -> Result<Vec<u8>> {
    let standard = mega_to_standard_base64(s)?;
    Ok(general_purpose::STANDARD.decode(&standard)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_roundtrip() {
        let original = b"Hello, MEGA!";
        let encoded = base64url_encode(original);
        let decoded = base64url_decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_no_padding() {
        let encoded = base64url_encode(b"test");
        assert!(!encoded.contains('='));
    }

    #[test]
    fn test_url_safe_chars() {
        // Create data that would normally produce + and / in base64
        let data: Vec<u8> = (0..255).collect();
        let encoded = base64url_encode(&data);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn test_padding_lengths() {
        assert_eq!(mega_to_standard_base64("QUJD").unwrap(), "QUJD");
        assert_eq!(mega_to_standard_base64("QUI").unwrap(), "QUI=");
        assert_eq!(mega_to_standard_base64("QQ").unwrap(), "QQ==");
    }

    #[test]
    fn test_malformed_length_rejected() {
        let err = mega_to_standard_base64("QUJDR").unwrap_err();
        assert!(matches!(err, MegaError::MalformedBase64(s) if s == "QUJDR"));
        assert!(base64url_decode("A").is_err());
    }

    #[test]
    fn test_standard_to_mega() {
        assert_eq!(
            standard_to_mega_base64("AWJuto8/fhleAI2WG0RvACtKkL/s9tAtvBXXDUp2bQk="),
            "AWJuto8_fhleAI2WG0RvACtKkL_s9tAtvBXXDUp2bQk"
        );
        assert_eq!(standard_to_mega_base64("a+b/c=="), "a-b_c");
    }

    proptest! {
        #[test]
        fn prop_mega_base64_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let standard = general_purpose::STANDARD.encode(&bytes);
            let mega = standard_to_mega_base64(&standard);
            prop_assert_eq!(base64url_decode(&mega).unwrap(), bytes);
            prop_assert_eq!(mega_to_standard_base64(&mega).unwrap(), standard);
        }
    }
}
