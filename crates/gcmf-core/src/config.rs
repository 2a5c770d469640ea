use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GcmfError, GcmfResult};

/// AAD used when neither the config file nor the command line supplies one.
/// Embedded at build time from `GCMF_AAD`, hex-encoded.
pub const BUILTIN_AAD_HEX: &str = match option_env!("GCMF_AAD") {
    Some(aad) => aad,
    None => "7f57c07ee9459ed704d5e403086f6503",
};

/// Top-level configuration (loaded from gcmf.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcmfConfig {
    pub stream: StreamConfig,
    pub output: OutputConfig,
    pub log: LogConfig,
}

impl GcmfConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> GcmfResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values serde accepts but the rest of the program cannot use.
    pub fn validate(&self) -> GcmfResult<()> {
        match self.log.format.as_str() {
            "json" | "text" => {}
            other => {
                return Err(GcmfError::Config(format!(
                    "log.format must be \"json\" or \"text\", got {other:?}"
                )))
            }
        }
        if let Some(aad) = &self.stream.aad {
            hex::decode(aad.trim()).map_err(|source| GcmfError::Hex {
                field: "stream.aad",
                source,
            })?;
        }
        Ok(())
    }

    /// Hex AAD for new sessions: config override, else the built-in value.
    pub fn aad_hex(&self) -> &str {
        self.stream.aad.as_deref().unwrap_or(BUILTIN_AAD_HEX)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Hex AAD override (default: built-in value)
    pub aad: Option<String>,
    /// Decrypt with ranged reads on a worker pool
    pub parallel: bool,
    /// Worker thread count for parallel decrypt (0 = cpu_count)
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Replace an existing output file (logged) instead of failing
    pub overwrite: bool,
    /// Write into a temp file and rename only once the whole stream succeeded
    pub atomic: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            overwrite: true,
            atomic: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
