//! Protocol constants shared by the sealer, unsealer and outer layers.
//!
//! None of these are recorded in the encrypted output: a stream is only
//! decryptable when both sides agree on them out of band.

/// AES-256 key length in bytes
pub const KEY_SIZE: usize = 32;

/// Shortest accepted nonce (the 96-bit GCM fast path). There is no upper
/// bound: longer nonces are run through GHASH to derive the initial counter
/// block.
pub const MIN_NONCE_SIZE: usize = 12;

/// GCM authentication tag appended to every sealed chunk
pub const TAG_SIZE: usize = 16;

/// Plaintext bytes per chunk: 1 MiB
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Size of a full ciphertext chunk on disk.
pub const fn sealed_len(plaintext_len: usize) -> usize {
    plaintext_len + TAG_SIZE
}
