//! On-disk constants and footer layouts for estargz and zstd:chunked blobs.

use a3s_storage_core::error::{Result, StorageError};

/// Size of the estargz footer (a complete, empty gzip member).
pub const ESTARGZ_FOOTER_SIZE: u64 = 51;

/// Size of the zstd:chunked footer.
pub const ZSTD_CHUNKED_FOOTER_SIZE: u64 = 56;

/// Magic at the end of the zstd:chunked footer.
pub const ZSTD_CHUNKED_FRAME_MAGIC: [u8; 8] = [0x47, 0x4e, 0x55, 0x6c, 0x49, 0x6e, 0x55, 0x78];

/// The only manifest type understood: a CRFS-style JSON table of contents.
pub const MANIFEST_TYPE_CRFS: u64 = 1;

/// Digest of the uncompressed zstd:chunked manifest.
pub const MANIFEST_CHECKSUM_KEY: &str = "io.github.containers.zstd-chunked.manifest-checksum";

/// `offset:length:uncompressedLength:type` of the zstd:chunked manifest.
pub const MANIFEST_INFO_KEY: &str = "io.github.containers.zstd-chunked.manifest-position";

/// Digest of the uncompressed tar-split stream.
pub const TAR_SPLIT_CHECKSUM_KEY: &str = "io.github.containers.zstd-chunked.tarsplit-checksum";

/// `offset:length:uncompressedLength` of the tar-split stream.
pub const TAR_SPLIT_INFO_KEY: &str = "io.github.containers.zstd-chunked.tarsplit-position";

/// Digest of the estargz TOC JSON.
pub const ESTARGZ_TOC_DIGEST_KEY: &str = "containerd.io/snapshot/stargz/toc.digest";

/// Name of the TOC entry inside the estargz TOC archive.
pub const ESTARGZ_TOC_NAME: &str = "stargz.index.json";

// Estargz footer:
//   10 bytes gzip header (FEXTRA set)
//    2 bytes XLEN = 26
//    2 bytes subfield id 'S' 'G'
//    2 bytes subfield LEN = 22
//   22 bytes "%016x" TOC offset followed by "STARGZ"
//    5 bytes final stored block of length 0
//    8 bytes gzip trailer (CRC32 and ISIZE of nothing)
const ESTARGZ_OFFSET_RANGE: std::ops::Range<usize> = 16..32;
const ESTARGZ_SUBFIELD_TAG: &[u8; 6] = b"STARGZ";

/// Whether `data` starts with the zstd:chunked frame magic.
pub fn is_zstd_chunked_frame_magic(data: &[u8]) -> bool {
    data.len() >= 8 && data[..8] == ZSTD_CHUNKED_FRAME_MAGIC
}

/// Decoded estargz footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstargzFooter {
    /// Offset of the gzip member holding the TOC archive.
    pub toc_offset: u64,
}

impl EstargzFooter {
    /// Parse the 51-byte footer.
    pub fn parse(footer: &[u8]) -> Result<Self> {
        if footer.len() != ESTARGZ_FOOTER_SIZE as usize {
            return Err(StorageError::InvalidFooter(format!(
                "estargz footer is {} bytes, expected {}",
                footer.len(),
                ESTARGZ_FOOTER_SIZE
            )));
        }

        let digits = &footer[ESTARGZ_OFFSET_RANGE];
        if !digits.iter().all(u8::is_ascii_hexdigit) {
            return Err(StorageError::InvalidFooter(format!(
                "parse ToC offset: {:?} is not hexadecimal",
                String::from_utf8_lossy(digits)
            )));
        }
        // All ASCII hex digits, so valid UTF-8 and at most 16 nibbles.
        let digits = std::str::from_utf8(digits)
            .map_err(|e| StorageError::InvalidFooter(format!("parse ToC offset: {}", e)))?;
        let toc_offset = u64::from_str_radix(digits, 16)
            .map_err(|e| StorageError::InvalidFooter(format!("parse ToC offset: {}", e)))?;

        Ok(Self { toc_offset })
    }

    /// Encode the footer for a blob whose TOC starts at `toc_offset`.
    pub fn encode(&self) -> [u8; ESTARGZ_FOOTER_SIZE as usize] {
        let mut footer = [0u8; ESTARGZ_FOOTER_SIZE as usize];
        footer[..10].copy_from_slice(&[0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff]);
        footer[10..12].copy_from_slice(&26u16.to_le_bytes());
        footer[12..14].copy_from_slice(b"SG");
        footer[14..16].copy_from_slice(&22u16.to_le_bytes());
        footer[ESTARGZ_OFFSET_RANGE].copy_from_slice(format!("{:016x}", self.toc_offset).as_bytes());
        footer[32..38].copy_from_slice(ESTARGZ_SUBFIELD_TAG);
        footer[38..43].copy_from_slice(&[0x01, 0x00, 0x00, 0xff, 0xff]);
        // CRC32 and ISIZE of empty content are both zero.
        footer
    }
}

/// Decoded zstd:chunked footer.
///
/// Layout, all integers little-endian:
/// `[0,8)` manifest offset, `[8,16)` compressed length, `[16,24)`
/// uncompressed length, `[24,32)` manifest type, `[32,48)` reserved,
/// `[48,56)` frame magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZstdChunkedFooter {
    pub offset: u64,
    pub length_compressed: u64,
    pub length_uncompressed: u64,
    pub manifest_type: u64,
}

impl ZstdChunkedFooter {
    /// Parse the 56-byte footer, checking the magic.
    ///
    /// The manifest type is returned as found; callers decide whether they
    /// support it.
    pub fn parse(footer: &[u8]) -> Result<Self> {
        if footer.len() != ZSTD_CHUNKED_FOOTER_SIZE as usize {
            return Err(StorageError::InvalidFooter(format!(
                "zstd:chunked footer is {} bytes, expected {}",
                footer.len(),
                ZSTD_CHUNKED_FOOTER_SIZE
            )));
        }
        if !is_zstd_chunked_frame_magic(&footer[48..56]) {
            return Err(StorageError::InvalidMagic {
                found: hex::encode(&footer[48..56]),
            });
        }

        Ok(Self {
            offset: le_u64(&footer[0..8]),
            length_compressed: le_u64(&footer[8..16]),
            length_uncompressed: le_u64(&footer[16..24]),
            manifest_type: le_u64(&footer[24..32]),
        })
    }

    pub fn encode(&self) -> [u8; ZSTD_CHUNKED_FOOTER_SIZE as usize] {
        let mut footer = [0u8; ZSTD_CHUNKED_FOOTER_SIZE as usize];
        footer[0..8].copy_from_slice(&self.offset.to_le_bytes());
        footer[8..16].copy_from_slice(&self.length_compressed.to_le_bytes());
        footer[16..24].copy_from_slice(&self.length_uncompressed.to_le_bytes());
        footer[24..32].copy_from_slice(&self.manifest_type.to_le_bytes());
        footer[48..56].copy_from_slice(&ZSTD_CHUNKED_FRAME_MAGIC);
        footer
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}
