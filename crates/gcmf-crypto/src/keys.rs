//! Session key material: the AES-256 key, base nonce, AAD and chunk size.

use zeroize::Zeroize;

use crate::error::StreamError;
use crate::{CHUNK_SIZE, KEY_SIZE, MIN_NONCE_SIZE};

/// A 256-bit stream encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct StreamKey {
    bytes: [u8; KEY_SIZE],
}

impl StreamKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, StreamError> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| StreamError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for StreamKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Everything both ends of a stream must agree on out of band.
///
/// Sessions copy the nonce and AAD out of these params, so one `StreamParams`
/// can seed any number of sessions.
#[derive(Debug, Clone)]
pub struct StreamParams {
    key: StreamKey,
    nonce: Vec<u8>,
    aad: Vec<u8>,
    chunk_size: usize,
}

impl StreamParams {
    /// Validate key and nonce lengths. Chunk size defaults to [`CHUNK_SIZE`].
    pub fn new(key: &[u8], nonce: &[u8], aad: &[u8]) -> Result<Self, StreamError> {
        let key = StreamKey::from_slice(key)?;
        if nonce.len() < MIN_NONCE_SIZE {
            return Err(StreamError::InvalidNonceLength {
                min: MIN_NONCE_SIZE,
                actual: nonce.len(),
            });
        }
        Ok(Self {
            key,
            nonce: nonce.to_vec(),
            aad: aad.to_vec(),
            chunk_size: CHUNK_SIZE,
        })
    }

    /// Override the plaintext chunk size.
    ///
    /// The chunk size is not written to the output: a stream sealed with a
    /// non-default size can only be opened by a session configured the same
    /// way. The CLI always uses [`CHUNK_SIZE`].
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, StreamError> {
        if chunk_size == 0 {
            return Err(StreamError::InvalidChunkSize(chunk_size));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn aad(&self) -> &[u8] {
        &self.aad
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Ciphertext bytes of a full chunk.
    pub fn sealed_chunk_size(&self) -> usize {
        gcmf_core::types::sealed_len(self.chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_debug_is_redacted() {
        let key = StreamKey::from_bytes([0x42; KEY_SIZE]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("66"));
    }

    #[test]
    fn test_key_from_slice_checks_length() {
        assert!(StreamKey::from_slice(&[0u8; 32]).is_ok());
        assert!(matches!(
            StreamKey::from_slice(&[0u8; 16]),
            Err(StreamError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn test_params_reject_short_nonce() {
        let err = StreamParams::new(&[0u8; 32], &[0u8; 8], b"").unwrap_err();
        assert!(matches!(err, StreamError::InvalidNonceLength { actual: 8, .. }));
    }

    #[test]
    fn test_params_accept_long_nonce() {
        for len in [33, 64, 1024] {
            let params = StreamParams::new(&[0u8; 32], &vec![7u8; len], b"").unwrap();
            assert_eq!(params.nonce().len(), len);
        }
    }

    #[test]
    fn test_params_copy_caller_buffers() {
        let mut nonce = vec![1u8; 12];
        let mut aad = b"header".to_vec();
        let params = StreamParams::new(&[0u8; 32], &nonce, &aad).unwrap();

        nonce[0] = 9;
        aad[0] = b'X';

        assert_eq!(params.nonce(), &[1u8; 12]);
        assert_eq!(params.aad(), b"header");
    }

    #[test]
    fn test_chunk_size_override() {
        let params = StreamParams::new(&[0u8; 32], &[0u8; 12], b"")
            .unwrap()
            .with_chunk_size(64)
            .unwrap();
        assert_eq!(params.chunk_size(), 64);
        assert_eq!(params.sealed_chunk_size(), 80);

        let params = StreamParams::new(&[0u8; 32], &[0u8; 12], b"").unwrap();
        assert_eq!(params.chunk_size(), CHUNK_SIZE);
        assert!(params.with_chunk_size(0).is_err());
    }
}
