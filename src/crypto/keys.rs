//! MEGA-specific node key handling.
//!
//! Node keys arrive wrapped (AES-ECB encrypted) with the share key. File keys
//! unwrap to 32 bytes which fold into a 16-byte content key; folder keys unwrap
//! to 16 bytes and are used directly.

use super::aes::aes128_ecb_decrypt;
use crate::base64::base64url_decode;
use crate::error::{MegaError, Result};

/// The parts of an unwrapped 256-bit file key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyParts {
    /// 128-bit content key
    pub key: [u8; 16],
    /// CTR nonce (unused for share browsing)
    pub iv: [u8; 8],
    /// Expected meta-MAC (not verified)
    pub meta_mac: [u8; 8],
}

impl KeyParts {
    /// Split an unwrapped 256-bit key.
    ///
    /// The content key is `k[i] ^ k[i + 16]` for `i` in `0..16`.
    pub fn from_unwrapped(k: &[u8; 32]) -> Self {
        let mut key = [0u8; 16];
        for i in 0..16 {
            key[i] = k[i] ^ k[i + 16];
        }

        let mut iv = [0u8; 8];
        iv.copy_from_slice(&k[16..24]);
        let mut meta_mac = [0u8; 8];
        meta_mac.copy_from_slice(&k[24..32]);

        Self { key, iv, meta_mac }
    }

    /// Split an unwrapped key given as a slice, which must be 32 bytes long.
    pub fn from_slice(k: &[u8]) -> Result<Self> {
        let k: &[u8; 32] = k.try_into().map_err(|_| {
            MegaError::CryptoError(format!(
                "Invalid file key length: expected 32, got {}",
                k.len()
            ))
        })?;
        Ok(Self::from_unwrapped(k))
    }
}

/// Fold a 256-bit key into the 128-bit content key.
pub fn fold_key(k: &[u8; 32]) -> [u8; 16] {
    KeyParts::from_unwrapped(k).key
}

/// Unwrap an encrypted node key with the share key.
///
/// Each 16-byte block is decrypted independently (AES-ECB).
pub fn unwrap_key(encrypted: &[u8], share_key: &[u8; 16]) -> Result<Vec<u8>> {
    aes128_ecb_decrypt(encrypted, share_key)
}

/// Decode a share key from the MEGA base64 token of a link.
///
/// Folder links carry 16 bytes; file links carry 32 bytes.
pub fn decode_share_key(token: &str) -> Result<Vec<u8>> {
    let key = base64url_decode(token)?;
    if key.len() != 16 && key.len() != 32 {
        return Err(MegaError::CryptoError(format!(
            "Invalid key length: expected 16 or 32, got {}",
            key.len()
        )));
    }
    Ok(key)
}

/// Convert a 16-byte slice into an AES key.
pub fn aes_key(key: &[u8]) -> Result<[u8; 16]> {
    key.try_into().map_err(|_| {
        MegaError::CryptoError(format!(
            "Invalid AES key length: expected 16, got {}",
            key.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aes::aes128_ecb_encrypt;
    use proptest::prelude::*;

    #[test]
    fn test_key_parts_layout() {
        let mut k = [0u8; 32];
        for (i, b) in k.iter_mut().enumerate() {
            *b = i as u8;
        }
        let parts = KeyParts::from_unwrapped(&k);

        assert_eq!(parts.key[0], 0 ^ 16);
        assert_eq!(parts.key[15], 15 ^ 31);
        assert_eq!(parts.iv, [16, 17, 18, 19, 20, 21, 22, 23]);
        assert_eq!(parts.meta_mac, [24, 25, 26, 27, 28, 29, 30, 31]);
    }

    #[test]
    fn test_from_slice_length() {
        assert!(KeyParts::from_slice(&[0u8; 16]).is_err());
        assert!(KeyParts::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_unwrap_key() {
        let share_key = [7u8; 16];
        let node_key: Vec<u8> = (0..32).collect();
        let wrapped = aes128_ecb_encrypt(&node_key, &share_key).unwrap();

        assert_eq!(unwrap_key(&wrapped, &share_key).unwrap(), node_key);
    }

    #[test]
    fn test_decode_share_key() {
        let key = decode_share_key("_FttzCVkgnOY_-8znSTegg").unwrap();
        assert_eq!(key.len(), 16);
        assert!(decode_share_key("AAAA").is_err());
    }

    proptest! {
        #[test]
        fn prop_fold_is_xor_of_halves(k in proptest::array::uniform32(any::<u8>())) {
            let folded = fold_key(&k);
            for i in 0..16 {
                prop_assert_eq!(folded[i], k[i] ^ k[i + 16]);
            }
        }
    }
}
