pub mod config;
pub mod error;
pub mod material;
pub mod types;

pub use error::{GcmfError, GcmfResult};
pub use types::{CHUNK_SIZE, KEY_SIZE, MIN_NONCE_SIZE, TAG_SIZE};
