//! Locating the manifest (and tar-split stream) inside a chunked layer blob.
//!
//! Everything here is pure: the reader fetches the footer, these types turn
//! footer bytes or layer annotations into byte ranges and expected digests.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use a3s_storage_core::config::ChunkedConfig;
use a3s_storage_core::error::{Result, StorageError};

use crate::format::{
    EstargzFooter, ZstdChunkedFooter, ESTARGZ_FOOTER_SIZE, ESTARGZ_TOC_DIGEST_KEY,
    MANIFEST_CHECKSUM_KEY, MANIFEST_INFO_KEY, MANIFEST_TYPE_CRFS, TAR_SPLIT_CHECKSUM_KEY,
    TAR_SPLIT_INFO_KEY, ZSTD_CHUNKED_FOOTER_SIZE,
};
use crate::source::ByteRange;

/// Chunked layer formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestFormat {
    /// gzip-based eStargz
    Estargz,
    /// zstd:chunked
    ZstdChunked,
}

impl ManifestFormat {
    /// Size of the fixed footer at the end of the blob.
    pub fn footer_size(&self) -> u64 {
        match self {
            ManifestFormat::Estargz => ESTARGZ_FOOTER_SIZE,
            ManifestFormat::ZstdChunked => ZSTD_CHUNKED_FOOTER_SIZE,
        }
    }

    /// Guess the format from layer annotations.
    ///
    /// Any zstd:chunked annotation selects zstd:chunked, so a layer missing
    /// only its manifest checksum still fails on that annotation.
    pub fn detect(annotations: &HashMap<String, String>) -> Option<Self> {
        let zstd_chunked = [
            MANIFEST_CHECKSUM_KEY,
            MANIFEST_INFO_KEY,
            TAR_SPLIT_CHECKSUM_KEY,
            TAR_SPLIT_INFO_KEY,
        ];
        if zstd_chunked.iter().any(|key| annotations.contains_key(*key)) {
            Some(ManifestFormat::ZstdChunked)
        } else if annotations.contains_key(ESTARGZ_TOC_DIGEST_KEY) {
            Some(ManifestFormat::Estargz)
        } else {
            None
        }
    }

    /// Fail unless the blob is large enough to hold this format's footer.
    pub fn check_blob_size(&self, blob_size: u64) -> Result<()> {
        let footer_size = self.footer_size();
        if blob_size <= footer_size {
            return Err(StorageError::BlobTooSmall {
                blob_size,
                footer_size,
            });
        }
        Ok(())
    }

    /// Range of the footer in a blob of `blob_size` bytes.
    pub fn footer_range(&self, blob_size: u64) -> Result<ByteRange> {
        self.check_blob_size(blob_size)?;
        let footer_size = self.footer_size();
        Ok(ByteRange::new(blob_size - footer_size, footer_size))
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestFormat::Estargz => write!(f, "estargz"),
            ManifestFormat::ZstdChunked => write!(f, "zstd:chunked"),
        }
    }
}

impl FromStr for ManifestFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "estargz" => Ok(ManifestFormat::Estargz),
            "zstd:chunked" => Ok(ManifestFormat::ZstdChunked),
            _ => Err(StorageError::Other(format!(
                "unknown chunked format: '{}' (supported: estargz, zstd:chunked)",
                s
            ))),
        }
    }
}

/// A compressed metadata blob and what it must decode to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    /// Compressed bytes within the layer blob.
    pub range: ByteRange,
    /// Declared size after decompression.
    pub uncompressed_length: u64,
    /// Expected digest of the decompressed bytes.
    pub checksum: String,
}

impl BlobLocation {
    fn check_limit(&self, what: &'static str, limit: u64) -> Result<()> {
        if self.range.length > limit {
            return Err(StorageError::ManifestTooLarge {
                what,
                size: self.range.length,
                limit,
            });
        }
        if self.uncompressed_length > limit {
            return Err(StorageError::ManifestTooLarge {
                what,
                size: self.uncompressed_length,
                limit,
            });
        }
        Ok(())
    }
}

/// Where the zstd:chunked manifest and optional tar-split live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLocation {
    pub manifest: BlobLocation,
    pub manifest_type: u64,
    pub tar_split: Option<BlobLocation>,
}

impl ManifestLocation {
    /// Build the location from the `manifest-position` annotation.
    ///
    /// Returns `Ok(None)` when the annotation is absent, meaning the footer
    /// has to be read. The manifest checksum annotation is always required.
    pub fn from_annotations(annotations: &HashMap<String, String>) -> Result<Option<Self>> {
        let checksum = required(annotations, MANIFEST_CHECKSUM_KEY)?;

        let Some(position) = annotations.get(MANIFEST_INFO_KEY).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let [offset, length, uncompressed_length, manifest_type] =
            parse_fields::<4>(MANIFEST_INFO_KEY, position)?;

        let mut tar_split = None;
        if let Some(position) = annotations.get(TAR_SPLIT_INFO_KEY) {
            let [offset, length, uncompressed_length] =
                parse_fields::<3>(TAR_SPLIT_INFO_KEY, position)?;
            // A zero offset means the layer was written without tar-split data.
            if offset > 0 {
                tar_split = Some(BlobLocation {
                    range: ByteRange::new(offset, length),
                    uncompressed_length,
                    checksum: required(annotations, TAR_SPLIT_CHECKSUM_KEY)?,
                });
            }
        }

        Ok(Some(Self {
            manifest: BlobLocation {
                range: ByteRange::new(offset, length),
                uncompressed_length,
                checksum,
            },
            manifest_type,
            tar_split,
        }))
    }

    /// Build the location from a decoded footer. The footer has no room for
    /// tar-split data, and the checksum still comes from the annotations.
    pub fn from_footer(
        footer: &ZstdChunkedFooter,
        annotations: &HashMap<String, String>,
    ) -> Result<Self> {
        Ok(Self {
            manifest: BlobLocation {
                range: ByteRange::new(footer.offset, footer.length_compressed),
                uncompressed_length: footer.length_uncompressed,
                checksum: required(annotations, MANIFEST_CHECKSUM_KEY)?,
            },
            manifest_type: footer.manifest_type,
            tar_split: None,
        })
    }

    /// Offset of the manifest within the layer blob.
    pub fn offset(&self) -> u64 {
        self.manifest.range.offset
    }

    /// Ranges to fetch, manifest first.
    pub fn ranges(&self) -> Vec<ByteRange> {
        let mut ranges = vec![self.manifest.range];
        if let Some(tar_split) = &self.tar_split {
            ranges.push(tar_split.range);
        }
        ranges
    }

    /// Reject unknown manifest types and anything over the size ceilings.
    pub fn check(&self, config: &ChunkedConfig) -> Result<()> {
        if self.manifest_type != MANIFEST_TYPE_CRFS {
            return Err(StorageError::UnsupportedManifestType(self.manifest_type));
        }
        self.manifest.check_limit("manifest", config.max_toc_size)?;
        if let Some(tar_split) = &self.tar_split {
            tar_split.check_limit("tar-split", config.max_tar_split_size)?;
        }
        Ok(())
    }
}

/// Where the estargz TOC region lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstargzLocation {
    /// From the TOC offset up to the footer.
    pub range: ByteRange,
    /// Expected digest of the extracted TOC JSON.
    pub toc_digest: String,
}

impl EstargzLocation {
    /// Derive the TOC region from the footer; its length is whatever lies
    /// between the TOC offset and the footer.
    pub fn from_footer(footer: &EstargzFooter, blob_size: u64, toc_digest: String) -> Result<Self> {
        ManifestFormat::Estargz.check_blob_size(blob_size)?;
        let footer_offset = blob_size - ESTARGZ_FOOTER_SIZE;
        let length = footer_offset.checked_sub(footer.toc_offset).ok_or_else(|| {
            StorageError::InvalidFooter(format!(
                "ToC offset {} is past the footer at {}",
                footer.toc_offset, footer_offset
            ))
        })?;

        Ok(Self {
            range: ByteRange::new(footer.toc_offset, length),
            toc_digest,
        })
    }

    pub fn offset(&self) -> u64 {
        self.range.offset
    }

    pub fn check(&self, config: &ChunkedConfig) -> Result<()> {
        if self.range.length > config.max_toc_size {
            return Err(StorageError::ManifestTooLarge {
                what: "TOC region",
                size: self.range.length,
                limit: config.max_toc_size,
            });
        }
        Ok(())
    }
}

/// A located manifest, per format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Estargz(EstargzLocation),
    ZstdChunked(ManifestLocation),
}

impl Location {
    pub fn format(&self) -> ManifestFormat {
        match self {
            Location::Estargz(_) => ManifestFormat::Estargz,
            Location::ZstdChunked(_) => ManifestFormat::ZstdChunked,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            Location::Estargz(location) => location.offset(),
            Location::ZstdChunked(location) => location.offset(),
        }
    }

    pub fn check(&self, config: &ChunkedConfig) -> Result<()> {
        match self {
            Location::Estargz(location) => location.check(config),
            Location::ZstdChunked(location) => location.check(config),
        }
    }
}

pub(crate) fn required(annotations: &HashMap<String, String>, key: &str) -> Result<String> {
    annotations
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| StorageError::AnnotationMissing(key.to_string()))
}

/// Parse exactly `N` colon-separated decimal integers.
fn parse_fields<const N: usize>(key: &str, value: &str) -> Result<[u64; N]> {
    let malformed = |reason: String| StorageError::AnnotationMalformed {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    };

    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != N {
        return Err(malformed(format!("expected {} fields, got {}", N, parts.len())));
    }

    let mut fields = [0u64; N];
    for (field, part) in fields.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed(format!("{:?} is not an unsigned integer", part)));
        }
        *field = part
            .parse()
            .map_err(|e| malformed(format!("{:?}: {}", part, e)))?;
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUM: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn annotations(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_format_footer_sizes() {
        assert_eq!(ManifestFormat::Estargz.footer_size(), 51);
        assert_eq!(ManifestFormat::ZstdChunked.footer_size(), 56);
    }

    #[test]
    fn test_format_display_from_str() {
        for format in [ManifestFormat::Estargz, ManifestFormat::ZstdChunked] {
            assert_eq!(format.to_string().parse::<ManifestFormat>().unwrap(), format);
        }
        assert!("gzip".parse::<ManifestFormat>().is_err());
    }

    #[test]
    fn test_format_detect() {
        assert_eq!(
            ManifestFormat::detect(&annotations(&[(MANIFEST_CHECKSUM_KEY, CHECKSUM)])),
            Some(ManifestFormat::ZstdChunked)
        );
        assert_eq!(
            ManifestFormat::detect(&annotations(&[(ESTARGZ_TOC_DIGEST_KEY, CHECKSUM)])),
            Some(ManifestFormat::Estargz)
        );
        assert_eq!(
            ManifestFormat::detect(&annotations(&[
                (MANIFEST_INFO_KEY, "1:2:3:1"),
                (ESTARGZ_TOC_DIGEST_KEY, CHECKSUM),
            ])),
            Some(ManifestFormat::ZstdChunked)
        );
        assert_eq!(
            ManifestFormat::detect(&annotations(&[(TAR_SPLIT_INFO_KEY, "1:2:3")])),
            Some(ManifestFormat::ZstdChunked)
        );
        assert_eq!(
            ManifestFormat::detect(&annotations(&[(TAR_SPLIT_CHECKSUM_KEY, CHECKSUM)])),
            Some(ManifestFormat::ZstdChunked)
        );
        assert_eq!(ManifestFormat::detect(&HashMap::new()), None);
    }

    #[test]
    fn test_blob_too_small() {
        for format in [ManifestFormat::Estargz, ManifestFormat::ZstdChunked] {
            let size = format.footer_size();
            for blob_size in [0, size - 1, size] {
                let err = format.footer_range(blob_size).unwrap_err();
                assert!(matches!(err, StorageError::BlobTooSmall { .. }));
            }
            assert_eq!(
                format.footer_range(size + 1).unwrap(),
                ByteRange::new(1, size)
            );
        }
    }

    #[test]
    fn test_from_annotations_manifest_and_tar_split() {
        let location = ManifestLocation::from_annotations(&annotations(&[
            (MANIFEST_CHECKSUM_KEY, CHECKSUM),
            (MANIFEST_INFO_KEY, "100:200:800:1"),
            (TAR_SPLIT_INFO_KEY, "300:40:90"),
            (TAR_SPLIT_CHECKSUM_KEY, CHECKSUM),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(location.manifest.range, ByteRange::new(100, 200));
        assert_eq!(location.manifest.uncompressed_length, 800);
        assert_eq!(location.manifest_type, MANIFEST_TYPE_CRFS);
        let tar_split = location.tar_split.as_ref().unwrap();
        assert_eq!(tar_split.range, ByteRange::new(300, 40));
        assert_eq!(tar_split.uncompressed_length, 90);
        assert_eq!(
            location.ranges(),
            vec![ByteRange::new(100, 200), ByteRange::new(300, 40)]
        );
    }

    #[test]
    fn test_from_annotations_zero_tar_split_offset_is_absent() {
        let location = ManifestLocation::from_annotations(&annotations(&[
            (MANIFEST_CHECKSUM_KEY, CHECKSUM),
            (MANIFEST_INFO_KEY, "100:200:800:1"),
            (TAR_SPLIT_INFO_KEY, "0:0:0"),
        ]))
        .unwrap()
        .unwrap();
        assert!(location.tar_split.is_none());
        assert_eq!(location.ranges().len(), 1);
    }

    #[test]
    fn test_from_annotations_without_position_falls_back_to_footer() {
        let location =
            ManifestLocation::from_annotations(&annotations(&[(MANIFEST_CHECKSUM_KEY, CHECKSUM)]))
                .unwrap();
        assert!(location.is_none());
    }

    #[test]
    fn test_from_annotations_requires_checksums() {
        let err = ManifestLocation::from_annotations(&annotations(&[(MANIFEST_INFO_KEY, "1:2:3:1")]))
            .unwrap_err();
        assert!(matches!(err, StorageError::AnnotationMissing(ref k) if k == MANIFEST_CHECKSUM_KEY));

        let err = ManifestLocation::from_annotations(&annotations(&[
            (MANIFEST_CHECKSUM_KEY, CHECKSUM),
            (MANIFEST_INFO_KEY, "1:2:3:1"),
            (TAR_SPLIT_INFO_KEY, "10:2:3"),
        ]))
        .unwrap_err();
        assert!(matches!(err, StorageError::AnnotationMissing(ref k) if k == TAR_SPLIT_CHECKSUM_KEY));
    }

    #[test]
    fn test_from_annotations_malformed() {
        for bad in ["1:2:3", "1:2:3:4:5", "a:2:3:1", "1::3:1", "-1:2:3:1", "+1:2:3:1", " 1:2:3:1"] {
            let err = ManifestLocation::from_annotations(&annotations(&[
                (MANIFEST_CHECKSUM_KEY, CHECKSUM),
                (MANIFEST_INFO_KEY, bad),
            ]))
            .unwrap_err();
            assert!(matches!(err, StorageError::AnnotationMalformed { .. }), "{bad}");
        }

        let err = ManifestLocation::from_annotations(&annotations(&[
            (MANIFEST_CHECKSUM_KEY, CHECKSUM),
            (MANIFEST_INFO_KEY, "1:2:3:1"),
            (TAR_SPLIT_INFO_KEY, "1:2:3:4"),
        ]))
        .unwrap_err();
        assert!(matches!(err, StorageError::AnnotationMalformed { .. }));
    }

    #[test]
    fn test_check_manifest_type() {
        let mut location = ManifestLocation::from_footer(
            &ZstdChunkedFooter {
                offset: 10,
                length_compressed: 20,
                length_uncompressed: 30,
                manifest_type: 2,
            },
            &annotations(&[(MANIFEST_CHECKSUM_KEY, CHECKSUM)]),
        )
        .unwrap();
        let err = location.check(&ChunkedConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedManifestType(2)));

        location.manifest_type = MANIFEST_TYPE_CRFS;
        location.check(&ChunkedConfig::default()).unwrap();
    }

    #[test]
    fn test_check_limits() {
        let config = ChunkedConfig::with_limit(100);
        let footer = |length_compressed, length_uncompressed| ZstdChunkedFooter {
            offset: 0,
            length_compressed,
            length_uncompressed,
            manifest_type: MANIFEST_TYPE_CRFS,
        };
        let checksum = annotations(&[(MANIFEST_CHECKSUM_KEY, CHECKSUM)]);

        ManifestLocation::from_footer(&footer(100, 100), &checksum)
            .unwrap()
            .check(&config)
            .unwrap();
        for (compressed, uncompressed) in [(101, 10), (10, 101)] {
            let err = ManifestLocation::from_footer(&footer(compressed, uncompressed), &checksum)
                .unwrap()
                .check(&config)
                .unwrap_err();
            assert!(matches!(err, StorageError::ManifestTooLarge { limit: 100, .. }));
        }
    }

    #[test]
    fn test_check_tar_split_limit() {
        let location = ManifestLocation::from_annotations(&annotations(&[
            (MANIFEST_CHECKSUM_KEY, CHECKSUM),
            (MANIFEST_INFO_KEY, "100:10:10:1"),
            (TAR_SPLIT_INFO_KEY, "300:10:5000"),
            (TAR_SPLIT_CHECKSUM_KEY, CHECKSUM),
        ]))
        .unwrap()
        .unwrap();
        let config = ChunkedConfig {
            max_toc_size: 100,
            max_tar_split_size: 1000,
        };
        let err = location.check(&config).unwrap_err();
        assert!(matches!(err, StorageError::ManifestTooLarge { what: "tar-split", .. }));
    }

    #[test]
    fn test_estargz_location() {
        let location =
            EstargzLocation::from_footer(&EstargzFooter { toc_offset: 400 }, 1051, CHECKSUM.to_string())
                .unwrap();
        assert_eq!(location.range, ByteRange::new(400, 600));

        let err = EstargzLocation::from_footer(&EstargzFooter { toc_offset: 1001 }, 1051, CHECKSUM.to_string())
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidFooter(_)));
    }

    #[test]
    fn test_estargz_location_limit() {
        let location =
            EstargzLocation::from_footer(&EstargzFooter { toc_offset: 0 }, 1051, CHECKSUM.to_string())
                .unwrap();
        let err = Location::Estargz(location)
            .check(&ChunkedConfig::with_limit(999))
            .unwrap_err();
        assert!(matches!(err, StorageError::ManifestTooLarge { size: 1000, .. }));
    }
}
