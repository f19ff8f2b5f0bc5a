//! Decompression and checksum validation of fetched metadata blobs.

use std::io::Read;

use a3s_storage_core::error::{Result, StorageError};
use flate2::read::GzDecoder;
use tar::Archive;

use crate::digest::Digest;

/// Check that `data` hashes to the `expected` digest string.
pub fn verify_digest(data: &[u8], expected: &str) -> Result<()> {
    let digest: Digest = expected.parse()?;
    digest.verify(data)
}

/// Decode a zstd-compressed blob and validate the decompressed bytes.
///
/// The output buffer is bounded by `uncompressed_length`; a frame that
/// expands past it fails instead of growing the buffer.
pub fn decode_and_validate_blob(
    blob: &[u8],
    uncompressed_length: u64,
    expected_uncompressed_checksum: &str,
) -> Result<Vec<u8>> {
    let digest: Digest = expected_uncompressed_checksum.parse()?;

    let capacity = usize::try_from(uncompressed_length).map_err(|_| {
        StorageError::DecompressionFailed(format!(
            "uncompressed length {} does not fit in memory",
            uncompressed_length
        ))
    })?;
    let decoded = zstd::bulk::decompress(blob, capacity)
        .map_err(|e| StorageError::DecompressionFailed(e.to_string()))?;

    digest.verify(&decoded)?;
    Ok(decoded)
}

/// Pull the TOC out of an estargz TOC region.
///
/// The region is a gzip stream wrapping a tar archive whose first entry is
/// the TOC JSON. The entry's declared size must not exceed `max_size`.
pub fn extract_estargz_toc(blob: &[u8], max_size: u64) -> Result<Vec<u8>> {
    let mut archive = Archive::new(GzDecoder::new(blob));
    let mut entries = archive
        .entries()
        .map_err(|e| StorageError::DecompressionFailed(format!("read TOC archive: {}", e)))?;

    let mut entry = match entries.next() {
        Some(entry) => entry
            .map_err(|e| StorageError::DecompressionFailed(format!("read TOC entry: {}", e)))?,
        None => return Err(StorageError::ManifestNotFound),
    };

    let size = entry.size();
    if size > max_size {
        return Err(StorageError::ManifestTooLarge {
            what: "TOC entry",
            size,
            limit: max_size,
        });
    }

    tracing::trace!(
        name = %String::from_utf8_lossy(&entry.path_bytes()),
        size,
        "Extracting estargz TOC entry"
    );

    let mut toc = vec![0u8; size as usize];
    entry
        .read_exact(&mut toc)
        .map_err(|e| StorageError::DecompressionFailed(format!("read TOC entry: {}", e)))?;
    Ok(toc)
}
