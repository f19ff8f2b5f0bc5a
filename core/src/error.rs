use thiserror::Error;

/// A3S Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Blob is not large enough to hold the format's footer
    #[error("Blob too small: {blob_size} bytes, footer needs more than {footer_size}")]
    BlobTooSmall { blob_size: u64, footer_size: u64 },

    /// A required layer annotation is absent
    #[error("Annotation {0:?} not found")]
    AnnotationMissing(String),

    /// A layer annotation is present but cannot be decoded
    #[error("Malformed annotation {key:?}={value:?}: {reason}")]
    AnnotationMalformed {
        key: String,
        value: String,
        reason: String,
    },

    /// Footer fields are not a valid encoding
    #[error("Invalid footer: {0}")]
    InvalidFooter(String),

    /// Footer magic does not match the zstd:chunked frame magic
    #[error("Invalid magic number: {found}")]
    InvalidMagic { found: String },

    /// Manifest type tag is not one we know how to read
    #[error("Invalid manifest type: {0}")]
    UnsupportedManifestType(u64),

    /// Declared size exceeds the configured ceiling
    #[error("Manifest too big: {what} is {size} bytes, limit is {limit}")]
    ManifestTooLarge {
        what: &'static str,
        size: u64,
        limit: u64,
    },

    /// Ranged fetch failed (transport error, short stream, closed channel)
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Compressed payload could not be decoded
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    /// Digest string could not be parsed
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Computed digest differs from the declared one
    #[error("Invalid blob checksum, expected checksum {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The estargz TOC archive had no entries
    #[error("Manifest not found")]
    ManifestNotFound,

    /// Entry type symbol has no archive type code
    #[error("Unknown type: {0}")]
    UnknownEntryType(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Whether the error means the blob content itself cannot be trusted,
    /// as opposed to a failure reaching it.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidMagic { .. }
                | StorageError::UnsupportedManifestType(_)
                | StorageError::ChecksumMismatch { .. }
                | StorageError::DecompressionFailed(_)
                | StorageError::InvalidFooter(_)
                | StorageError::ManifestNotFound
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S Storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
