//! A3S Storage Chunked - layer manifest reader for chunked container images.
//!
//! Chunked layers (eStargz and zstd:chunked) embed a table of contents so
//! that individual files can be fetched with ranged requests instead of
//! downloading the whole layer. This crate finds that table of contents,
//! fetches it, decompresses it and checks it against the digests carried in
//! the layer annotations.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────── layer blob ────────────────────────┐
//! │ file data (compressed) ... │ manifest │ tar-split │ footer │
//! └────────────────────────────┴──────────┴───────────┴────────┘
//!                                   ▲          ▲          │
//!                                   └──────────┴──────────┘
//!                        located via footer or annotations
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use a3s_storage_chunked::{ChunkedManifestReader, FileBlobSource, ManifestFormat};
//!
//! # async fn example(annotations: HashMap<String, String>) -> a3s_storage_core::Result<()> {
//! let source = FileBlobSource::new("/var/lib/a3s/blobs/sha256/abc");
//! let size = source.size().await?;
//! let reader = ChunkedManifestReader::new(source);
//! let manifest = reader
//!     .read_manifest(ManifestFormat::ZstdChunked, size, &annotations)
//!     .await?;
//! let toc = manifest.toc()?;
//! # let _ = toc;
//! # Ok(())
//! # }
//! ```

pub mod digest;
pub mod format;
pub mod locator;
pub mod reader;
pub mod source;
pub mod toc;
pub mod validate;

// Re-export common types
pub use digest::{Algorithm, Digest};
pub use format::{is_zstd_chunked_frame_magic, EstargzFooter, ZstdChunkedFooter};
pub use locator::{BlobLocation, EstargzLocation, Location, ManifestFormat, ManifestLocation};
pub use reader::{read_layer_manifest, ChunkedManifest, ChunkedManifestReader};
pub use source::{
    BlobSource, BlobStream, ByteRange, FetchOutcome, FileBlobSource, MemoryBlobSource, Outcomes,
};
pub use toc::{type_to_tar_type, Toc, TocEntry};
pub use validate::{decode_and_validate_blob, extract_estargz_toc, verify_digest};

/// A3S Storage Chunked version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
