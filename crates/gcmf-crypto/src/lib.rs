//! gcmf-crypto: chunked AES-256-GCM stream encryption
//!
//! A plaintext stream is cut into `CHUNK_SIZE` chunks, each sealed on its own
//! with the same key and AAD and a nonce that advances by one per chunk:
//!
//! ```text
//! chunk i:  nonce = base_nonce + i (big-endian)   →   [ciphertext][16-byte tag]
//! ```
//!
//! The output is the bare concatenation of sealed chunks. There is no header;
//! chunk boundaries follow from `CHUNK_SIZE + TAG_SIZE` arithmetic and only the
//! last chunk may be short. An empty input still produces one (tag-only) chunk.
//!
//! - [`seal::ChunkSealer`] pulls plaintext from a reader and yields ciphertext.
//! - [`unseal::ChunkUnsealer`] takes ciphertext at absolute offsets, in any
//!   order and from any number of threads, and writes plaintext in order.
//! - [`file`] drives both over filesystem paths.

pub mod cipher;
pub mod error;
pub mod file;
pub mod keys;
pub mod nonce;
pub mod seal;
pub mod unseal;

pub use cipher::ChunkCipher;
pub use error::StreamError;
pub use file::{decrypt_file, decrypt_file_parallel, encrypt_file, FileOptions, FileReport, ProgressFn};
pub use keys::{StreamKey, StreamParams};
pub use seal::{seal_stream, ChunkSealer};
pub use unseal::{unseal_stream, ChunkUnsealer};

pub use gcmf_core::{CHUNK_SIZE, KEY_SIZE, MIN_NONCE_SIZE, TAG_SIZE};
