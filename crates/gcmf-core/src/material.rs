//! Hex-encoded key, nonce and AAD material as it arrives from flags,
//! environment variables and config files.
//!
//! Decoded buffers are wrapped in [`Zeroizing`] so key bytes do not outlive
//! the session that consumes them.

use zeroize::Zeroizing;

use crate::error::{GcmfError, GcmfResult};
use crate::types::{KEY_SIZE, MIN_NONCE_SIZE};

/// Decode a hex key; must be exactly [`KEY_SIZE`] bytes.
pub fn parse_key_hex(input: &str) -> GcmfResult<Zeroizing<Vec<u8>>> {
    let key = decode("key", input)?;
    if key.len() != KEY_SIZE {
        return Err(GcmfError::KeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    Ok(key)
}

/// Decode a hex nonce/IV of at least [`MIN_NONCE_SIZE`] bytes.
pub fn parse_nonce_hex(input: &str) -> GcmfResult<Vec<u8>> {
    let nonce = decode("nonce", input)?;
    if nonce.len() < MIN_NONCE_SIZE {
        return Err(GcmfError::NonceLength {
            min: MIN_NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    Ok(nonce.to_vec())
}

/// Decode hex AAD. Any length is accepted, including empty.
pub fn parse_aad_hex(input: &str) -> GcmfResult<Vec<u8>> {
    Ok(decode("aad", input)?.to_vec())
}

fn decode(field: &'static str, input: &str) -> GcmfResult<Zeroizing<Vec<u8>>> {
    hex::decode(input.trim())
        .map(Zeroizing::new)
        .map_err(|source| GcmfError::Hex { field, source })
}
