//! Reader configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Default ceiling for a table of contents: 50 MiB.
pub const DEFAULT_MAX_TOC_SIZE: u64 = 50 * 1024 * 1024;

/// Default ceiling for a tar-split stream: 50 MiB.
pub const DEFAULT_MAX_TAR_SPLIT_SIZE: u64 = 50 * 1024 * 1024;

/// Environment variable overriding [`ChunkedConfig::max_toc_size`].
pub const ENV_MAX_TOC_SIZE: &str = "A3S_CHUNKED_MAX_TOC_SIZE";

/// Environment variable overriding [`ChunkedConfig::max_tar_split_size`].
pub const ENV_MAX_TAR_SPLIT_SIZE: &str = "A3S_CHUNKED_MAX_TAR_SPLIT_SIZE";

/// Limits applied while reading a chunked layer manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkedConfig {
    /// Maximum compressed and uncompressed manifest size in bytes.
    /// Also bounds the TOC entry extracted from an estargz archive.
    pub max_toc_size: u64,

    /// Maximum compressed and uncompressed tar-split size in bytes
    pub max_tar_split_size: u64,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            max_toc_size: DEFAULT_MAX_TOC_SIZE,
            max_tar_split_size: DEFAULT_MAX_TAR_SPLIT_SIZE,
        }
    }
}

impl ChunkedConfig {
    /// Create a config with the same ceiling for manifest and tar-split.
    pub fn with_limit(limit: u64) -> Self {
        Self {
            max_toc_size: limit,
            max_tar_split_size: limit,
        }
    }

    /// Load limits from the environment.
    ///
    /// Reads `A3S_CHUNKED_MAX_TOC_SIZE` and `A3S_CHUNKED_MAX_TAR_SPLIT_SIZE`
    /// (e.g. "50m", "1g", "4096"). Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MAX_TOC_SIZE) {
            config.max_toc_size = parse_size(&value)
                .map_err(|e| StorageError::ConfigError(format!("{ENV_MAX_TOC_SIZE}: {e}")))?;
            tracing::debug!(max_toc_size = config.max_toc_size, "TOC size limit overridden");
        }
        if let Some(value) = lookup(ENV_MAX_TAR_SPLIT_SIZE) {
            config.max_tar_split_size = parse_size(&value).map_err(|e| {
                StorageError::ConfigError(format!("{ENV_MAX_TAR_SPLIT_SIZE}: {e}"))
            })?;
            tracing::debug!(
                max_tar_split_size = config.max_tar_split_size,
                "Tar-split size limit overridden"
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would refuse every blob.
    pub fn validate(&self) -> Result<()> {
        if self.max_toc_size == 0 {
            return Err(StorageError::ConfigError(
                "max_toc_size must be greater than zero".to_string(),
            ));
        }
        if self.max_tar_split_size == 0 {
            return Err(StorageError::ConfigError(
                "max_tar_split_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a human-readable size: "1024", "512k", "50m", "1g".
fn parse_size(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim().to_lowercase();
    if let Ok(n) = s.parse::<u64>() {
        return Ok(n);
    }
    let (num, mult) = if s.ends_with("gb") || s.ends_with('g') {
        (s.trim_end_matches("gb").trim_end_matches('g'), 1024u64 * 1024 * 1024)
    } else if s.ends_with("mb") || s.ends_with('m') {
        (s.trim_end_matches("mb").trim_end_matches('m'), 1024u64 * 1024)
    } else if s.ends_with("kb") || s.ends_with('k') {
        (s.trim_end_matches("kb").trim_end_matches('k'), 1024u64)
    } else if s.ends_with('b') {
        (s.trim_end_matches('b'), 1u64)
    } else {
        return Err(format!("unrecognized size format: {s}"));
    };
    let n: u64 = num.parse().map_err(|_| format!("invalid number: {num}"))?;
    n.checked_mul(mult)
        .ok_or_else(|| format!("size overflows: {s}"))
}
