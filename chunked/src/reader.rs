//! Chunked manifest reader.
//!
//! Reads the table of contents of an estargz or zstd:chunked layer through
//! a [`BlobSource`], touching only the footer and the metadata ranges, and
//! validates everything it returns against the layer annotations.
//!
//! ```text
//! locate ──► footer fetch (unless annotated) ──► limits
//!        ──► batched fetch [manifest, tar-split] ──► decode + digest
//! ```
//!
//! Any failure ends the read. Retrying is up to the caller.

use std::collections::HashMap;

use a3s_storage_core::config::ChunkedConfig;
use a3s_storage_core::error::{Result, StorageError};

use crate::format::{EstargzFooter, ZstdChunkedFooter, ESTARGZ_TOC_DIGEST_KEY};
use crate::locator::{
    required, EstargzLocation, Location, ManifestFormat, ManifestLocation,
};
use crate::source::{fetch_failed, BlobSource, ByteRange, Outcomes};
use crate::toc::Toc;
use crate::validate::{decode_and_validate_blob, extract_estargz_toc, verify_digest};

/// A validated manifest read from a chunked layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedManifest {
    /// Decompressed TOC bytes.
    pub manifest: Vec<u8>,
    /// Decompressed tar-split stream, empty when the layer has none.
    pub tar_split: Vec<u8>,
    /// Offset of the manifest within the layer blob.
    pub offset: u64,
}

impl ChunkedManifest {
    pub fn has_tar_split(&self) -> bool {
        !self.tar_split.is_empty()
    }

    /// Parse the manifest bytes as a TOC.
    pub fn toc(&self) -> Result<Toc> {
        Toc::from_slice(&self.manifest)
    }
}

/// Reads chunked layer manifests from a blob source.
pub struct ChunkedManifestReader<S> {
    source: S,
    config: ChunkedConfig,
}

impl<S: BlobSource> ChunkedManifestReader<S> {
    /// Create a reader with the default limits.
    pub fn new(source: S) -> Self {
        Self::with_config(source, ChunkedConfig::default())
    }

    /// Create a reader with the given limits.
    pub fn with_config(source: S, config: ChunkedConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &ChunkedConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Read and validate the manifest of a `blob_size`-byte layer.
    pub async fn read_manifest(
        &self,
        format: ManifestFormat,
        blob_size: u64,
        annotations: &HashMap<String, String>,
    ) -> Result<ChunkedManifest> {
        let location = self.locate(format, blob_size, annotations).await?;
        location.check(&self.config)?;

        tracing::debug!(
            format = %format,
            blob_size,
            offset = location.offset(),
            "Located chunked manifest"
        );

        let result = match location {
            Location::Estargz(location) => self.fetch_estargz(&location).await,
            Location::ZstdChunked(location) => self.fetch_zstd_chunked(&location).await,
        };

        if let Err(e) = &result {
            if e.is_integrity_failure() {
                tracing::warn!(format = %format, blob_size, error = %e, "Chunked manifest failed validation");
            }
        }
        result
    }

    /// Read the TOC of an estargz layer.
    ///
    /// The returned manifest carries no tar-split data.
    pub async fn read_estargz_manifest(
        &self,
        blob_size: u64,
        annotations: &HashMap<String, String>,
    ) -> Result<ChunkedManifest> {
        self.read_manifest(ManifestFormat::Estargz, blob_size, annotations)
            .await
    }

    /// Read the manifest and tar-split stream of a zstd:chunked layer.
    pub async fn read_zstd_chunked_manifest(
        &self,
        blob_size: u64,
        annotations: &HashMap<String, String>,
    ) -> Result<ChunkedManifest> {
        self.read_manifest(ManifestFormat::ZstdChunked, blob_size, annotations)
            .await
    }

    /// Work out where the manifest lives.
    ///
    /// For zstd:chunked the position annotation wins and the footer is not
    /// read; otherwise the footer is fetched. Size limits are not applied
    /// here, see [`Location::check`].
    pub async fn locate(
        &self,
        format: ManifestFormat,
        blob_size: u64,
        annotations: &HashMap<String, String>,
    ) -> Result<Location> {
        let footer_range = format.footer_range(blob_size)?;

        match format {
            ManifestFormat::Estargz => {
                let toc_digest = required(annotations, ESTARGZ_TOC_DIGEST_KEY)?;
                let footer = self.read_range(footer_range).await?;
                let footer = EstargzFooter::parse(&footer)?;
                let location = EstargzLocation::from_footer(&footer, blob_size, toc_digest)?;
                Ok(Location::Estargz(location))
            }
            ManifestFormat::ZstdChunked => {
                if let Some(location) = ManifestLocation::from_annotations(annotations)? {
                    return Ok(Location::ZstdChunked(location));
                }
                let footer = self.read_range(footer_range).await?;
                let footer = ZstdChunkedFooter::parse(&footer)?;
                let location = ManifestLocation::from_footer(&footer, annotations)?;
                Ok(Location::ZstdChunked(location))
            }
        }
    }

    async fn fetch(&self, ranges: &[ByteRange]) -> Result<Outcomes> {
        tracing::trace!(ranges = ?ranges, "Requesting blob ranges");
        let rx = self
            .source
            .get_blob_at(ranges)
            .await
            .map_err(fetch_failed)?;
        Ok(Outcomes::new(rx, ranges.len()))
    }

    /// Fetch a single range in full.
    async fn read_range(&self, range: ByteRange) -> Result<Vec<u8>> {
        let mut outcomes = self.fetch(&[range]).await?;
        let result = outcomes.read_blob(range.length).await;
        let drained = outcomes.finish().await;
        let data = result?;
        drained?;
        Ok(data)
    }

    async fn fetch_estargz(&self, location: &EstargzLocation) -> Result<ChunkedManifest> {
        let region = self.read_range(location.range).await?;
        let toc = extract_estargz_toc(&region, self.config.max_toc_size)?;
        verify_digest(&toc, &location.toc_digest)?;

        tracing::debug!(
            offset = location.range.offset,
            compressed = location.range.length,
            size = toc.len(),
            "Read estargz TOC"
        );

        Ok(ChunkedManifest {
            manifest: toc,
            tar_split: Vec::new(),
            offset: location.offset(),
        })
    }

    async fn fetch_zstd_chunked(&self, location: &ManifestLocation) -> Result<ChunkedManifest> {
        let ranges = location.ranges();
        let mut outcomes = self.fetch(&ranges).await?;

        let result = Self::consume_zstd_chunked(&mut outcomes, location).await;
        let drained = outcomes.finish().await;
        let (manifest, tar_split) = result?;
        drained?;

        tracing::debug!(
            offset = location.offset(),
            manifest = manifest.len(),
            tar_split = tar_split.len(),
            "Read zstd:chunked manifest"
        );

        Ok(ChunkedManifest {
            manifest,
            tar_split,
            offset: location.offset(),
        })
    }

    /// Outcomes arrive in request order: manifest, then tar-split.
    async fn consume_zstd_chunked(
        outcomes: &mut Outcomes,
        location: &ManifestLocation,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let manifest = &location.manifest;
        let blob = outcomes.read_blob(manifest.range.length).await?;
        let manifest = decode_and_validate_blob(&blob, manifest.uncompressed_length, &manifest.checksum)?;

        let tar_split = match &location.tar_split {
            Some(tar_split) => {
                let blob = outcomes.read_blob(tar_split.range.length).await?;
                decode_and_validate_blob(&blob, tar_split.uncompressed_length, &tar_split.checksum)?
            }
            None => Vec::new(),
        };

        Ok((manifest, tar_split))
    }
}

impl<S> std::fmt::Debug for ChunkedManifestReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedManifestReader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Read the manifest of a layer, picking the format from its annotations.
pub async fn read_layer_manifest<S: BlobSource>(
    reader: &ChunkedManifestReader<S>,
    blob_size: u64,
    annotations: &HashMap<String, String>,
) -> Result<ChunkedManifest> {
    let format = ManifestFormat::detect(annotations).ok_or_else(|| {
        StorageError::AnnotationMissing(crate::format::MANIFEST_CHECKSUM_KEY.to_string())
    })?;
    reader.read_manifest(format, blob_size, annotations).await
}
