//! AES-128 encryption operations.
//!
//! MEGA uses AES-128 in two modes for share access:
//! - ECB: for unwrapping node keys with the share key
//! - CBC (zero IV): for node attributes and file attribute bytes

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};

use crate::error::{MegaError, Result};

fn check_block_aligned(data: &[u8]) -> Result<()> {
    if data.len() % 16 != 0 {
        return Err(MegaError::CryptoError(format!(
            "Data length must be multiple of 16, got {}",
            data.len()
        )));
    }
    Ok(())
}

/// AES-128-ECB encrypt a single 16-byte block.
pub fn aes128_ecb_encrypt_block(data: &[u8; 16], key: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(data);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// AES-128-ECB decrypt a single 16-byte block.
pub fn aes128_ecb_decrypt_block(data: &[u8; 16], key: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(data);
    cipher.decrypt_block(&mut block);
    block.into()
}

/// AES-128-ECB decrypt multiple independent blocks.
///
/// No padding is removed: a trailing zero byte is part of the key material.
pub fn aes128_ecb_decrypt(data: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    check_block_aligned(data)?;

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut result = data.to_vec();

    for chunk in result.chunks_mut(16) {
        let block = GenericArray::from_mut_slice(chunk);
        cipher.decrypt_block(block);
    }

    Ok(result)
}

/// AES-128-ECB encrypt multiple independent blocks.
pub fn aes128_ecb_encrypt(data: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    check_block_aligned(data)?;

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut result = data.to_vec();

    for chunk in result.chunks_mut(16) {
        let block = GenericArray::from_mut_slice(chunk);
        cipher.encrypt_block(block);
    }

    Ok(result)
}

/// AES-128-CBC decrypt with zero IV, keeping any padding.
pub fn aes128_cbc_decrypt(data: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    check_block_aligned(data)?;

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut result = Vec::with_capacity(data.len());
    let mut iv = GenericArray::from([0u8; 16]);

    for chunk in data.chunks(16) {
        let mut block = GenericArray::clone_from_slice(chunk);

        cipher.decrypt_block(&mut block);

        // XOR with previous ciphertext block (or IV for first block)
        for i in 0..16 {
            block[i] ^= iv[i];
        }

        result.extend_from_slice(&block);
        iv.copy_from_slice(chunk);
    }

    Ok(result)
}

/// AES-128-CBC decrypt with zero IV and zero padding.
///
/// Trailing NUL bytes are stripped from the plaintext.
pub fn aes128_cbc_decrypt_zero_padded(data: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    let mut plain = aes128_cbc_decrypt(data, key)?;
    let len = plain.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
    plain.truncate(len);
    Ok(plain)
}

/// AES-128-CBC encrypt with zero IV, zero-padding the input to a block boundary.
pub fn aes128_cbc_encrypt_zero_padded(data: &[u8], key: &[u8; 16]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut padded = data.to_vec();
    while padded.len() % 16 != 0 {
        padded.push(0);
    }

    let mut result = Vec::with_capacity(padded.len());
    let mut iv = GenericArray::from([0u8; 16]);

    for chunk in padded.chunks(16) {
        let mut block = GenericArray::clone_from_slice(chunk);

        for i in 0..16 {
            block[i] ^= iv[i];
        }

        cipher.encrypt_block(&mut block);
        result.extend_from_slice(&block);
        iv.copy_from_slice(&block);
    }

    result
}
