use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything a sealing or unsealing session can fail with.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid nonce length: expected at least {min} bytes, got {actual}")]
    InvalidNonceLength { min: usize, actual: usize },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    /// Tag mismatch: tampered ciphertext, or wrong key, nonce or AAD.
    #[error("authentication failed for chunk {chunk}")]
    Authentication { chunk: u64 },

    #[error("sealing chunk {chunk} failed")]
    Seal { chunk: u64 },

    /// Finalized while ciphertext beyond `next_offset` was still waiting on a gap.
    #[error("ciphertext incomplete: no data at offset {next_offset} ({pending} ranges pending)")]
    MissingRange { next_offset: u64, pending: usize },

    /// A write whose end lies past the addressable ciphertext range.
    #[error("write of {len} bytes at offset {offset} overflows the stream")]
    OffsetOverflow { offset: u64, len: usize },

    #[error("session already finalized")]
    Finalized,

    #[error("session aborted by an earlier error")]
    Aborted,

    #[error("a file does not exist at {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("persisting output: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, StreamError::Authentication { .. })
    }
}

/// Lets sessions sit behind `std::io::Read`; I/O errors pass through untouched.
impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(e) => e,
            StreamError::Authentication { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            other => io::Error::other(other),
        }
    }
}
