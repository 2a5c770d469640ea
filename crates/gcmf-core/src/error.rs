use thiserror::Error;

pub type GcmfResult<T> = Result<T, GcmfError>;

#[derive(Debug, Error)]
pub enum GcmfError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid hex in {field}: {source}")]
    Hex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("invalid key: expected {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },

    #[error("invalid nonce: expected at least {min} bytes, got {actual}")]
    NonceLength { min: usize, actual: usize },

    #[error("parsing config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
