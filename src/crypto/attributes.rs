//! Encrypted node attributes and file fingerprints.
//!
//! A node's `a` field is MEGA base64 of `AES-CBC(key, "MEGA" + json)` with a
//! zero IV and zero padding. The JSON carries the name (`n`) and, for files,
//! the serialized fingerprint (`c`) holding the modification time.

use serde::Deserialize;

use super::aes::aes128_cbc_decrypt_zero_padded;
use crate::base64::base64url_decode;
use crate::error::{MegaError, Result};

const ATTRIBUTES_MAGIC: &[u8] = b"MEGA";

/// Placeholder glyph of redacted names.
pub const REDACTED_CHAR: char = '█';

/// Decrypted node attributes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeAttributes {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "c", default)]
    pub fingerprint: Option<String>,
}

/// Decoded file fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// Four CRC32s of the file content (not verified)
    pub checksum: [u8; 16],
    /// Modification time in seconds since the Unix epoch
    pub modification_date: u64,
}

/// Decrypt and parse the encoded attributes of a node.
pub fn decrypt_node_attributes(encoded: &str, key: &[u8; 16]) -> Result<NodeAttributes> {
    let encrypted = base64url_decode(encoded)?;
    let plain = aes128_cbc_decrypt_zero_padded(&encrypted, key)?;

    let json = plain
        .strip_prefix(ATTRIBUTES_MAGIC)
        .ok_or_else(|| MegaError::CryptoError("Invalid decryption key".to_string()))?;
    let json = std::str::from_utf8(json)
        .map_err(|_| MegaError::CryptoError("Attributes are not valid UTF-8".to_string()))?;

    Ok(serde_json::from_str(json)?)
}

/// Decode a serialized fingerprint.
///
/// Layout: 16 checksum bytes, one length byte `L` (at most 5), then `L`
/// little-endian bytes of the modification time.
pub fn parse_fingerprint(serialized: &str) -> Result<Fingerprint> {
    let bytes = base64url_decode(serialized)?;
    if bytes.len() < 17 {
        return Err(MegaError::InvalidFingerprint(format!(
            "expected at least 17 bytes, got {}",
            bytes.len()
        )));
    }

    let mut checksum = [0u8; 16];
    checksum.copy_from_slice(&bytes[..16]);

    let time_len = bytes[16] as usize;
    if time_len > 5 {
        return Err(MegaError::InvalidFingerprint(format!(
            "time length {} is over 5 bytes",
            time_len
        )));
    }
    let time_bytes = bytes.get(17..17 + time_len).ok_or_else(|| {
        MegaError::InvalidFingerprint(format!(
            "truncated time: need {} bytes, got {}",
            time_len,
            bytes.len() - 17
        ))
    })?;

    let modification_date = time_bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);

    Ok(Fingerprint {
        checksum,
        modification_date,
    })
}

/// Placeholder for a name that can't be decrypted.
///
/// The length approximates the plaintext name from the length of the encoded
/// attributes: the `MEGA{"c":"","n":""}` frame is 19 bytes and a fingerprint
/// adds about 28 more.
pub fn redacted_name(encoded_len: usize, has_fingerprint: bool) -> String {
    let mut count = (encoded_len * 3 / 4) as i64 - 19;
    if has_fingerprint {
        count -= 28;
    }
    count -= 1;
    if count < 0 {
        count = 16;
    }
    REDACTED_CHAR.to_string().repeat(count as usize)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::base64::base64url_encode;
    use crate::crypto::aes::aes128_cbc_encrypt_zero_padded;

    /// Encrypt attributes the way MEGA stores them.
    pub(crate) fn encrypt_attributes(json: &str, key: &[u8; 16]) -> String {
        let plain = format!("MEGA{}", json);
        base64url_encode(&aes128_cbc_encrypt_zero_padded(plain.as_bytes(), key))
    }

    /// Serialize a fingerprint with a 4-byte time.
    pub(crate) fn encode_fingerprint(mtime: u32) -> String {
        let mut bytes = vec![0xAAu8; 16];
        bytes.push(4);
        bytes.extend_from_slice(&mtime.to_le_bytes());
        base64url_encode(&bytes)
    }

    #[test]
    fn test_decrypt_folder_attributes() {
        let key = [3u8; 16];
        let encoded = encrypt_attributes(r#"{"n":"Photos"}"#, &key);

        let attrs = decrypt_node_attributes(&encoded, &key).unwrap();
        assert_eq!(attrs.name, "Photos");
        assert_eq!(attrs.fingerprint, None);
    }

    #[test]
    fn test_decrypt_file_attributes() {
        let key = [9u8; 16];
        let fingerprint = encode_fingerprint(1_600_000_000);
        let encoded = encrypt_attributes(
            &format!(r#"{{"c":"{}","n":"photo.jpg"}}"#, fingerprint),
            &key,
        );

        let attrs = decrypt_node_attributes(&encoded, &key).unwrap();
        assert_eq!(attrs.name, "photo.jpg");
        let parsed = parse_fingerprint(attrs.fingerprint.as_deref().unwrap()).unwrap();
        assert_eq!(parsed.modification_date, 1_600_000_000);
        assert_eq!(parsed.checksum, [0xAA; 16]);
    }

    #[test]
    fn test_wrong_key_fails_magic() {
        let encoded = encrypt_attributes(r#"{"n":"x"}"#, &[1u8; 16]);
        let err = decrypt_node_attributes(&encoded, &[2u8; 16]).unwrap_err();
        assert!(matches!(err, MegaError::CryptoError(_)));
    }

    #[test]
    fn test_fingerprint_five_byte_time() {
        let mut bytes = vec![0u8; 16];
        bytes.push(5);
        bytes.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        let parsed = parse_fingerprint(&base64url_encode(&bytes)).unwrap();
        assert_eq!(parsed.modification_date, 0x05_0403_0201);
    }

    #[test]
    fn test_fingerprint_errors() {
        let mut too_long = vec![0u8; 16];
        too_long.push(6);
        too_long.extend_from_slice(&[0u8; 6]);
        assert!(matches!(
            parse_fingerprint(&base64url_encode(&too_long)),
            Err(MegaError::InvalidFingerprint(_))
        ));

        let mut truncated = vec![0u8; 16];
        truncated.push(4);
        truncated.push(1);
        assert!(matches!(
            parse_fingerprint(&base64url_encode(&truncated)),
            Err(MegaError::InvalidFingerprint(_))
        ));

        assert!(parse_fingerprint(&base64url_encode(&[0u8; 10])).is_err());
    }

    #[test]
    fn test_redacted_name() {
        // 96 encoded chars -> 72 bytes -> 72 - 19 - 1
        assert_eq!(redacted_name(96, false).chars().count(), 52);
        assert_eq!(redacted_name(96, true).chars().count(), 24);
        assert!(redacted_name(96, true).chars().all(|c| c == REDACTED_CHAR));
        assert_eq!(redacted_name(64, true), "");
        assert_eq!(redacted_name(0, false).chars().count(), 16);
    }
}
